//! Document (URI) providers.
//!
//! `put` accepts a URI instead of inline content; the document provider
//! fetches it. The composite provider dispatches on scheme across its
//! registered fetchers, first match wins.

use std::path::Path;
use std::sync::Arc;

use crate::features::providers::DocumentProvider;
use crate::shared::models::{MemoryError, Result, Tags};

/// A fetched document.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedDocument {
    pub uri: String,
    pub content: String,
    pub content_type: Option<String>,
    pub tags: Option<Tags>,
}

/// Fetches `file://` URIs and bare filesystem paths.
pub struct FileDocumentProvider;

impl FileDocumentProvider {
    fn resolve(uri: &str) -> &str {
        uri.strip_prefix("file://").unwrap_or(uri)
    }

    fn content_type_for(path: &Path) -> Option<String> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        let mime = match ext.as_str() {
            "txt" => "text/plain",
            "md" | "markdown" => "text/markdown",
            "json" => "application/json",
            "html" | "htm" => "text/html",
            "csv" => "text/csv",
            _ => return None,
        };
        Some(mime.to_string())
    }
}

impl DocumentProvider for FileDocumentProvider {
    fn supports(&self, uri: &str) -> bool {
        if uri.starts_with("file://") {
            return true;
        }
        // A bare path with no scheme
        !uri.contains("://")
    }

    fn fetch(&self, uri: &str) -> Result<FetchedDocument> {
        let path = Path::new(Self::resolve(uri));
        let content = std::fs::read_to_string(path).map_err(|e| {
            MemoryError::provider(format!("cannot fetch '{}': {}", uri, e)).with_source(e)
        })?;
        Ok(FetchedDocument {
            uri: uri.to_string(),
            content,
            content_type: Self::content_type_for(path),
            tags: None,
        })
    }
}

/// Dispatches to the first registered provider that supports the URI.
pub struct CompositeDocumentProvider {
    providers: Vec<Arc<dyn DocumentProvider>>,
}

impl CompositeDocumentProvider {
    pub fn new(providers: Vec<Arc<dyn DocumentProvider>>) -> Self {
        Self { providers }
    }

    pub fn with_defaults() -> Self {
        Self::new(vec![Arc::new(FileDocumentProvider)])
    }

    pub fn push(&mut self, provider: Arc<dyn DocumentProvider>) {
        self.providers.push(provider);
    }
}

impl DocumentProvider for CompositeDocumentProvider {
    fn supports(&self, uri: &str) -> bool {
        self.providers.iter().any(|p| p.supports(uri))
    }

    fn fetch(&self, uri: &str) -> Result<FetchedDocument> {
        for provider in &self.providers {
            if provider.supports(uri) {
                return provider.fetch(uri);
            }
        }
        Err(MemoryError::provider(format!(
            "no document provider supports '{}'",
            uri
        )))
    }
}
