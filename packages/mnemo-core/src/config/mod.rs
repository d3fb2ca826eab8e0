//! Store configuration.
//!
//! The configuration lives as `mnemo.toml` inside the store directory. It
//! records which providers the store was created with and their parameters;
//! it is written once on store creation and read on every open. Opening a
//! store with a config newer than this library supports is an error.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::shared::models::{MemoryError, Result};
use crate::shared::utils::time::now_iso;

pub const CONFIG_FILENAME: &str = "mnemo.toml";
pub const CONFIG_VERSION: i64 = 1;

/// Default embedding dimension for the built-in hash provider.
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;

/// Free-form provider parameters (everything in the section except `name`).
pub type ProviderParams = BTreeMap<String, toml::Value>;

/// Configuration for a single provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(flatten)]
    pub params: ProviderParams,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: ProviderParams::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param_usize(&self, key: &str) -> Option<usize> {
        self.params
            .get(key)
            .and_then(|v| v.as_integer())
            .map(|v| v as usize)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreSection {
    pub version: i64,
    pub created: String,
}

/// Complete store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    pub store: StoreSection,
    pub embedding: ProviderConfig,
    pub summarization: ProviderConfig,
    pub document: ProviderConfig,
}

impl StoreConfig {
    /// Defaults: deterministic local providers, no network.
    pub fn default_config() -> Self {
        Self {
            store: StoreSection {
                version: CONFIG_VERSION,
                created: now_iso(),
            },
            embedding: ProviderConfig::new("hash")
                .with_param("dimension", DEFAULT_EMBEDDING_DIMENSION as i64),
            summarization: ProviderConfig::new("truncate"),
            document: ProviderConfig::new("composite"),
        }
    }

    /// Embedding dimension recorded for this store.
    pub fn embedding_dimension(&self) -> usize {
        self.embedding
            .param_usize("dimension")
            .unwrap_or(DEFAULT_EMBEDDING_DIMENSION)
    }
}

pub fn config_path(store_path: &Path) -> PathBuf {
    store_path.join(CONFIG_FILENAME)
}

/// Load configuration from a store directory.
pub fn load_config(store_path: &Path) -> Result<StoreConfig> {
    let path = config_path(store_path);
    let text = fs::read_to_string(&path)
        .map_err(|e| MemoryError::config(format!("Config not found: {}", path.display())).with_source(e))?;
    let config: StoreConfig = toml::from_str(&text)?;

    if config.store.version > CONFIG_VERSION {
        return Err(MemoryError::config(format!(
            "Config version {} is newer than supported ({})",
            config.store.version, CONFIG_VERSION
        )));
    }
    Ok(config)
}

/// Save configuration, creating the store directory if needed.
pub fn save_config(store_path: &Path, config: &StoreConfig) -> Result<()> {
    fs::create_dir_all(store_path)?;
    let text = toml::to_string_pretty(config)?;
    fs::write(config_path(store_path), text)?;
    Ok(())
}

/// Load existing config or create a new one with defaults.
pub fn load_or_create_config(store_path: &Path) -> Result<StoreConfig> {
    if config_path(store_path).exists() {
        load_config(store_path)
    } else {
        let config = StoreConfig::default_config();
        save_config(store_path, &config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let created = load_or_create_config(dir.path()).unwrap();
        assert!(config_path(dir.path()).exists());

        let loaded = load_or_create_config(dir.path()).unwrap();
        assert_eq!(created, loaded);
        assert_eq!(loaded.embedding.name, "hash");
        assert_eq!(loaded.embedding_dimension(), DEFAULT_EMBEDDING_DIMENSION);
    }

    #[test]
    fn test_newer_version_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = StoreConfig::default_config();
        config.store.version = CONFIG_VERSION + 1;
        save_config(dir.path(), &config).unwrap();

        let err = load_config(dir.path()).unwrap_err();
        assert!(err.to_string().contains("newer than supported"));
    }

    #[test]
    fn test_provider_params_survive_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut config = StoreConfig::default_config();
        config.summarization = ProviderConfig::new("truncate").with_param("max_length", 120i64);
        save_config(dir.path(), &config).unwrap();

        let loaded = load_config(dir.path()).unwrap();
        assert_eq!(loaded.summarization.param_usize("max_length"), Some(120));
    }

    #[test]
    fn test_missing_config_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(load_config(dir.path()).is_err());
    }
}
