//! Provider contracts and registry.
//!
//! Providers are the engine's only external collaborators: embedding,
//! summarization, document fetching, and decomposition analysis. Each family
//! is a capability trait with concrete implementations registered under a
//! name; the store config selects one by name and free-form parameters.
//!
//! The implementations shipped here are deterministic and offline (hash
//! embeddings, truncation summaries, filesystem fetches). Network-backed
//! providers plug in through the same registry.

pub mod documents;
pub mod embedding;
pub mod summarize;

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ProviderConfig, ProviderParams};
use crate::features::analyze::DefaultAnalyzer;
use crate::shared::models::{MemoryError, PartInfo, Result, Tags};

pub use documents::{CompositeDocumentProvider, FetchedDocument, FileDocumentProvider};
pub use embedding::HashEmbeddingProvider;
pub use summarize::{PassthroughSummarization, TruncateSummarization};

/// Dense text embeddings with a fixed dimension per model.
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Short human-readable summaries, optionally with free-form generation for
/// decomposition and overviews.
pub trait SummarizationProvider: Send + Sync {
    fn summarize(&self, content: &str, max_length: usize, context: Option<&str>)
        -> Result<String>;

    /// Free-form generation. Providers without an LLM return `Ok(None)` and
    /// callers fall back to rule-based behavior.
    fn generate(&self, _system: &str, _user: &str, _max_tokens: usize) -> Result<Option<String>> {
        Ok(None)
    }
}

/// URI fetching.
pub trait DocumentProvider: Send + Sync {
    fn supports(&self, uri: &str) -> bool;

    fn fetch(&self, uri: &str) -> Result<FetchedDocument>;
}

/// One unit of input to the decomposition analyzer.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisChunk {
    pub content: String,
    pub tags: Tags,
    pub index: usize,
}

/// A part proposed by the analyzer, before numbering and tag inheritance.
#[derive(Debug, Clone, PartialEq)]
pub struct PartDraft {
    pub summary: String,
    pub content: String,
    pub tags: Option<Tags>,
}

/// Decomposition of content chunks into ordered parts.
pub trait AnalyzerProvider: Send + Sync {
    fn analyze(&self, chunks: &[AnalysisChunk], guide_context: &str) -> Result<Vec<PartDraft>>;
}

/// Assembled parts ready for storage (used by the engine).
pub type Parts = Vec<PartInfo>;

type EmbeddingCtor = Box<dyn Fn(&ProviderParams) -> Result<Arc<dyn EmbeddingProvider>> + Send + Sync>;
type SummarizationCtor =
    Box<dyn Fn(&ProviderParams) -> Result<Arc<dyn SummarizationProvider>> + Send + Sync>;
type DocumentCtor = Box<dyn Fn(&ProviderParams) -> Result<Arc<dyn DocumentProvider>> + Send + Sync>;
type AnalyzerCtor =
    Box<dyn Fn(Option<Arc<dyn SummarizationProvider>>) -> Arc<dyn AnalyzerProvider> + Send + Sync>;

/// Maps provider names to constructor closures.
pub struct ProviderRegistry {
    embedding: HashMap<String, EmbeddingCtor>,
    summarization: HashMap<String, SummarizationCtor>,
    document: HashMap<String, DocumentCtor>,
    analyzer: HashMap<String, AnalyzerCtor>,
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self {
            embedding: HashMap::new(),
            summarization: HashMap::new(),
            document: HashMap::new(),
            analyzer: HashMap::new(),
        }
    }

    /// Registry with the built-in local providers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();

        registry.register_embedding("hash", |params| {
            let dimension = params
                .get("dimension")
                .and_then(|v| v.as_integer())
                .map(|v| v as usize)
                .unwrap_or(crate::config::DEFAULT_EMBEDDING_DIMENSION);
            Ok(Arc::new(HashEmbeddingProvider::new(dimension)))
        });

        registry.register_summarization("truncate", |params| {
            let max_length = params
                .get("max_length")
                .and_then(|v| v.as_integer())
                .map(|v| v as usize)
                .unwrap_or(summarize::DEFAULT_SUMMARY_LENGTH);
            Ok(Arc::new(TruncateSummarization::new(max_length)))
        });
        registry.register_summarization("passthrough", |_| Ok(Arc::new(PassthroughSummarization)));

        registry.register_document("file", |_| Ok(Arc::new(FileDocumentProvider)));
        registry.register_document("composite", |_| {
            Ok(Arc::new(CompositeDocumentProvider::with_defaults()))
        });

        registry.register_analyzer("default", |provider| Arc::new(DefaultAnalyzer::new(provider)));

        registry
    }

    pub fn register_embedding(
        &mut self,
        name: impl Into<String>,
        ctor: impl Fn(&ProviderParams) -> Result<Arc<dyn EmbeddingProvider>> + Send + Sync + 'static,
    ) {
        self.embedding.insert(name.into(), Box::new(ctor));
    }

    pub fn register_summarization(
        &mut self,
        name: impl Into<String>,
        ctor: impl Fn(&ProviderParams) -> Result<Arc<dyn SummarizationProvider>> + Send + Sync + 'static,
    ) {
        self.summarization.insert(name.into(), Box::new(ctor));
    }

    pub fn register_document(
        &mut self,
        name: impl Into<String>,
        ctor: impl Fn(&ProviderParams) -> Result<Arc<dyn DocumentProvider>> + Send + Sync + 'static,
    ) {
        self.document.insert(name.into(), Box::new(ctor));
    }

    pub fn register_analyzer(
        &mut self,
        name: impl Into<String>,
        ctor: impl Fn(Option<Arc<dyn SummarizationProvider>>) -> Arc<dyn AnalyzerProvider>
            + Send
            + Sync
            + 'static,
    ) {
        self.analyzer.insert(name.into(), Box::new(ctor));
    }

    pub fn create_embedding(&self, config: &ProviderConfig) -> Result<Arc<dyn EmbeddingProvider>> {
        let ctor = self.embedding.get(&config.name).ok_or_else(|| {
            MemoryError::config(format!("Unknown embedding provider '{}'", config.name))
        })?;
        ctor(&config.params)
    }

    pub fn create_summarization(
        &self,
        config: &ProviderConfig,
    ) -> Result<Arc<dyn SummarizationProvider>> {
        let ctor = self.summarization.get(&config.name).ok_or_else(|| {
            MemoryError::config(format!("Unknown summarization provider '{}'", config.name))
        })?;
        ctor(&config.params)
    }

    pub fn create_document(&self, config: &ProviderConfig) -> Result<Arc<dyn DocumentProvider>> {
        let ctor = self.document.get(&config.name).ok_or_else(|| {
            MemoryError::config(format!("Unknown document provider '{}'", config.name))
        })?;
        ctor(&config.params)
    }

    pub fn create_analyzer(
        &self,
        name: &str,
        summarization: Option<Arc<dyn SummarizationProvider>>,
    ) -> Result<Arc<dyn AnalyzerProvider>> {
        let ctor = self
            .analyzer
            .get(name)
            .ok_or_else(|| MemoryError::config(format!("Unknown analyzer '{}'", name)))?;
        Ok(ctor(summarization))
    }
}
