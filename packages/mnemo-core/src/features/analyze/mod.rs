//! Decomposition analysis.
//!
//! The default analyzer concatenates the input chunks, asks the configured
//! summarization provider's `generate` to split the document into sections
//! as JSON, and parses the result tolerantly (code fences, wrapper objects).
//! Without an LLM it falls back to paragraph-based chunking. The overview
//! builder assembles the `@p0` version-history part.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::features::providers::{AnalysisChunk, AnalyzerProvider, PartDraft, SummarizationProvider};
use crate::shared::models::{Result, Tags, VersionInfo};

pub const DECOMPOSITION_SYSTEM_PROMPT: &str = "You are a document analysis assistant. Your task is to decompose a document into its meaningful structural sections.

For each section, provide:
- \"summary\": A concise summary of the section (1-3 sentences)
- \"content\": The exact text of the section
- \"tags\": A dict of relevant tags for this section (optional)

Return a JSON array of section objects.

Guidelines:
- Identify natural section boundaries (headings, topic shifts, structural breaks)
- Each section should be a coherent unit of meaning
- Preserve the original text exactly in the \"content\" field
- Keep summaries concise but descriptive
- Return valid JSON only, no commentary outside the JSON array";

const OVERVIEW_SYSTEM_PROMPT: &str = "You summarize how a document evolved across versions. \
Given dated version summaries, produce a 1-3 sentence overview of the trajectory: \
what it started as, how it changed, where it is now. Return plain text only.";

/// Max content fed to the LLM for one decomposition call.
const DECOMPOSITION_CONTENT_LIMIT: usize = 80_000;

/// Minimum combined paragraph size for one fallback chunk.
const FALLBACK_CHUNK_TARGET: usize = 500;

static PARAGRAPH_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n").expect("static regex"));

/// Parse LLM decomposition output into part drafts.
///
/// Handles markdown code fences, wrapper objects such as
/// `{"sections": [...]}`, and direct arrays. Entries missing both summary
/// and content are dropped.
pub fn parse_decomposition_json(text: &str) -> Vec<PartDraft> {
    let text = strip_code_fences(text.trim());
    if text.is_empty() {
        return Vec::new();
    }

    let parsed: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => {
            warn!("failed to parse decomposition JSON");
            return Vec::new();
        }
    };

    let entries = match parsed {
        serde_json::Value::Array(entries) => entries,
        serde_json::Value::Object(map) => {
            let mut found = None;
            for key in ["sections", "parts", "chunks", "result", "data"] {
                if let Some(serde_json::Value::Array(entries)) = map.get(key) {
                    found = Some(entries.clone());
                    break;
                }
            }
            match found {
                Some(entries) => entries,
                None => return Vec::new(),
            }
        }
        _ => return Vec::new(),
    };

    let mut drafts = Vec::new();
    for entry in entries {
        let map = match entry.as_object() {
            Some(map) => map,
            None => continue,
        };
        let summary = map.get("summary").and_then(|v| v.as_str()).unwrap_or("");
        let content = map.get("content").and_then(|v| v.as_str()).unwrap_or("");
        if summary.is_empty() && content.is_empty() {
            continue;
        }
        let tags = map.get("tags").and_then(|v| v.as_object()).map(|obj| {
            obj.iter()
                .map(|(k, v)| {
                    let value = match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect::<Tags>()
        });
        drafts.push(PartDraft {
            summary: summary.to_string(),
            content: content.to_string(),
            tags,
        });
    }
    drafts
}

fn strip_code_fences(text: &str) -> &str {
    if !text.starts_with("```") {
        return text;
    }
    let without_open = match text.find('\n') {
        Some(pos) => &text[pos + 1..],
        None => return "",
    };
    without_open
        .trim_end()
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

/// Paragraph-based fallback when no LLM is available. Groups paragraphs to
/// roughly 500-char chunks; a document that yields a single chunk returns
/// nothing (decomposing it would add no structure).
pub fn paragraph_chunks(content: &str) -> Vec<PartDraft> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for paragraph in PARAGRAPH_SPLIT.split(content.trim()) {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        current.push(paragraph);
        current_len += paragraph.len();
        if current_len >= FALLBACK_CHUNK_TARGET {
            chunks.push(current.join("\n\n"));
            current.clear();
            current_len = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current.join("\n\n"));
    }

    if chunks.len() <= 1 {
        return Vec::new();
    }

    chunks
        .into_iter()
        .map(|chunk| {
            let summary = crate::features::providers::summarize::truncate_at_word(&chunk, 200);
            PartDraft {
                summary,
                content: chunk,
                tags: None,
            }
        })
        .collect()
}

/// Single-pass LLM decomposition with paragraph fallback.
pub struct DefaultAnalyzer {
    provider: Option<Arc<dyn SummarizationProvider>>,
}

impl DefaultAnalyzer {
    pub fn new(provider: Option<Arc<dyn SummarizationProvider>>) -> Self {
        Self { provider }
    }

    fn call_llm(&self, content: &str, guide_context: &str) -> Vec<PartDraft> {
        let provider = match &self.provider {
            Some(provider) => provider,
            None => return Vec::new(),
        };

        let truncated: String = content.chars().take(DECOMPOSITION_CONTENT_LIMIT).collect();
        let user_prompt = if guide_context.is_empty() {
            truncated
        } else {
            format!(
                "Decompose this document into meaningful sections.\n\n\
                 Use these tag definitions to guide your tagging:\n\n{}\n\n\
                 Document to analyze:\n\n{}",
                guide_context, truncated
            )
        };

        match provider.generate(DECOMPOSITION_SYSTEM_PROMPT, &user_prompt, 4096) {
            Ok(Some(raw)) => parse_decomposition_json(&raw),
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(error = %err, "LLM decomposition failed, falling back to chunking");
                Vec::new()
            }
        }
    }
}

impl AnalyzerProvider for DefaultAnalyzer {
    fn analyze(&self, chunks: &[AnalysisChunk], guide_context: &str) -> Result<Vec<PartDraft>> {
        let content = chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");

        let mut drafts = self.call_llm(&content, guide_context);
        if drafts.is_empty() {
            drafts = paragraph_chunks(&content);
        }
        Ok(drafts)
    }
}

/// Assemble the `@p0` overview content and summary from version history.
///
/// Versions arrive newest-first (store order); the overview reads
/// oldest→newest with date markers. The summary comes from the LLM when one
/// is available, a rule-based line otherwise.
pub fn build_overview(
    versions: &[VersionInfo],
    current_summary: &str,
    provider: Option<&Arc<dyn SummarizationProvider>>,
) -> (String, String) {
    let mut lines: Vec<String> = versions
        .iter()
        .rev()
        .map(|v| {
            let date: String = v.created_at.chars().take(10).collect();
            format!("[{}]\n{}", date, v.summary)
        })
        .collect();
    lines.push(format!("[current]\n{}", current_summary));
    let content = lines.join("\n\n");

    let generated = provider.and_then(|p| {
        match p.generate(OVERVIEW_SYSTEM_PROMPT, &content, 512) {
            Ok(generated) => generated,
            Err(err) => {
                warn!(error = %err, "overview generation failed, using fallback");
                None
            }
        }
    });

    let summary = generated.unwrap_or_else(|| {
        format!(
            "History across {} versions; currently: {}",
            versions.len() + 1,
            crate::features::providers::summarize::truncate_at_word(current_summary, 120)
        )
    });

    (content, summary)
}
