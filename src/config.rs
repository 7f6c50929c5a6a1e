//! Configuration parsing and validation.
//!
//! tenant-rag is configured via a TOML file (default: `config/trag.toml`).
//! Every section has serde defaults, so an empty file is a valid config that
//! stores data under `./data`, uses the offline hash embedder, and answers
//! with the fallback generator unless an API key is present.
//!
//! # Example
//!
//! ```toml
//! [storage]
//! root = "./data"
//!
//! [chunking]
//! size = 800
//! overlap = 120
//!
//! [retrieval]
//! top_k = 3
//!
//! [embedding]
//! provider = "local"          # "hash", "openai", "ollama", or "local"
//! model = "all-minilm-l6-v2"
//!
//! [generator]
//! model = "gpt-3.5-turbo"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [index]
//! backend = "sqlite"          # or "memory"
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use tenant_rag_core::chunk::validate_params;

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Default configuration with all data stored under `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig { root: root.into() },
            ..Self::default()
        }
    }

    /// Path of the metadata database.
    pub fn metadata_path(&self) -> PathBuf {
        self.storage.root.join("metadata.sqlite")
    }

    /// Directory holding one subdirectory per app.
    pub fn apps_dir(&self) -> PathBuf {
        self.storage.root.join("apps")
    }

    /// Check every bound. Called by [`load_config`] and by the engine.
    pub fn validate(&self) -> Result<()> {
        validate_params(self.chunking.size, self.chunking.overlap)?;

        if self.retrieval.top_k < 1 {
            return Err(Error::InvalidConfig("retrieval.top_k must be >= 1".into()));
        }

        match self.embedding.provider.as_str() {
            "hash" | "openai" | "ollama" | "local" => {}
            other => {
                return Err(Error::InvalidConfig(format!(
                    "Unknown embedding provider: '{}'. Must be hash, openai, ollama, or local.",
                    other
                )))
            }
        }
        if self.embedding.dims == Some(0) {
            return Err(Error::InvalidConfig("embedding.dims must be > 0".into()));
        }
        if self.embedding.provider == "ollama" && self.embedding.model.is_none() {
            return Err(Error::InvalidConfig(
                "embedding.model must be specified when provider is 'ollama'".into(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(Error::InvalidConfig(
                "embedding.batch_size must be > 0".into(),
            ));
        }

        if !(0.0..=2.0).contains(&self.generator.temperature) {
            return Err(Error::InvalidConfig(
                "generator.temperature must be in [0.0, 2.0]".into(),
            ));
        }

        match self.index.backend.as_str() {
            "sqlite" | "memory" => {}
            other => {
                return Err(Error::InvalidConfig(format!(
                    "Unknown index backend: '{}'. Must be sqlite or memory.",
                    other
                )))
            }
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("./data")
}

/// Character-based chunking window.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    800
}
fn default_chunk_overlap() -> usize {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    tenant_rag_core::search::DEFAULT_TOP_K
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "default_generator_model")]
    pub model: String,
    /// Name of the environment variable holding the API key. The model
    /// generator is used only when this variable is set and non-empty.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_generator_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generator_timeout")]
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            model: default_generator_model(),
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            temperature: 0.0,
            max_retries: default_generator_retries(),
            timeout_secs: default_generator_timeout(),
        }
    }
}

fn default_generator_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_generator_retries() -> u32 {
    3
}
fn default_generator_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
        }
    }
}

fn default_backend() -> String {
    "sqlite".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

/// Read, parse, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::InvalidConfig(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.chunking.size, 800);
        assert_eq!(config.chunking.overlap, 120);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.generator.model, "gpt-3.5-turbo");
        assert_eq!(config.generator.temperature, 0.0);
        assert_eq!(config.index.backend, "sqlite");
        assert_eq!(config.server.bind, "127.0.0.1:8000");
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = toml::from_str(
            r#"
            [storage]
            root = "/tmp/trag"

            [chunking]
            size = 200
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.root, PathBuf::from("/tmp/trag"));
        assert_eq!(config.chunking.size, 200);
        assert_eq!(config.chunking.overlap, 120);
        assert_eq!(config.metadata_path(), PathBuf::from("/tmp/trag/metadata.sqlite"));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let mut config = Config::default();
        config.chunking.size = 100;
        config.chunking.overlap = 100;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_top_k_rejected() {
        let mut config = Config::default();
        config.retrieval.top_k = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut config = Config::default();
        config.embedding.provider = "magic".into();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let mut config = Config::default();
        config.index.backend = "chroma".into();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_load_config_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[chunking\nsize = ").unwrap();
        assert!(matches!(load_config(&path), Err(Error::TomlParse(_))));
    }
}
