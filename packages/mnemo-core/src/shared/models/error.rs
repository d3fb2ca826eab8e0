//! Error types for mnemo-core

use std::fmt;
use thiserror::Error;

/// Error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-supplied input is malformed (collection name, tag filter, dimension mismatch)
    InvalidInput,
    /// Database errors (SQLite)
    Storage,
    /// The store file is malformed and could not be recovered
    Corruption,
    /// Embedding / summarization / document provider failure
    Provider,
    /// Serialization/deserialization errors
    Serialization,
    /// Configuration errors
    Config,
    /// I/O errors (lock files, vector segments)
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Storage => "storage",
            ErrorKind::Corruption => "corruption",
            ErrorKind::Provider => "provider",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unified error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct MemoryError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl MemoryError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // Convenience constructors
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Corruption, message)
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Provider, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    /// True when the underlying SQLite error reports a malformed database image.
    pub fn is_malformed(&self) -> bool {
        self.kind == ErrorKind::Corruption || self.message.contains("malformed")
    }
}

/// SQLite "database disk image is malformed" maps to Corruption so callers
/// can route into the recovery path; everything else is Storage.
impl From<rusqlite::Error> for MemoryError {
    fn from(err: rusqlite::Error) -> Self {
        let text = err.to_string();
        let kind = if text.contains("malformed") || text.contains("not a database") {
            ErrorKind::Corruption
        } else {
            ErrorKind::Storage
        };
        MemoryError::new(kind, format!("SQLite error: {}", text)).with_source(err)
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        MemoryError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

impl From<std::io::Error> for MemoryError {
    fn from(err: std::io::Error) -> Self {
        MemoryError::io(format!("I/O error: {}", err)).with_source(err)
    }
}

impl From<toml::de::Error> for MemoryError {
    fn from(err: toml::de::Error) -> Self {
        MemoryError::config(format!("TOML parse error: {}", err)).with_source(err)
    }
}

impl From<toml::ser::Error> for MemoryError {
    fn from(err: toml::ser::Error) -> Self {
        MemoryError::config(format!("TOML write error: {}", err)).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, MemoryError>;
