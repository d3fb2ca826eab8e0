//! Local summarization providers.

use crate::features::providers::SummarizationProvider;
use crate::shared::models::Result;

/// Default summary length when the caller does not specify one.
pub const DEFAULT_SUMMARY_LENGTH: usize = 200;

/// Summary = leading content truncated at a word boundary.
pub struct TruncateSummarization {
    max_length: usize,
}

impl TruncateSummarization {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }
}

impl Default for TruncateSummarization {
    fn default() -> Self {
        Self::new(DEFAULT_SUMMARY_LENGTH)
    }
}

impl SummarizationProvider for TruncateSummarization {
    fn summarize(
        &self,
        content: &str,
        max_length: usize,
        _context: Option<&str>,
    ) -> Result<String> {
        let limit = if max_length > 0 { max_length } else { self.max_length };
        Ok(truncate_at_word(content.trim(), limit))
    }
}

/// Summary = content, untouched. Useful when items are already short.
pub struct PassthroughSummarization;

impl SummarizationProvider for PassthroughSummarization {
    fn summarize(
        &self,
        content: &str,
        _max_length: usize,
        _context: Option<&str>,
    ) -> Result<String> {
        Ok(content.trim().to_string())
    }
}

/// Cut at the last word boundary before `limit` chars, appending an ellipsis.
pub fn truncate_at_word(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let prefix: String = text.chars().take(limit).collect();
    let cut = prefix.rfind(' ').unwrap_or(prefix.len());
    format!("{}...", prefix[..cut].trim_end())
}
