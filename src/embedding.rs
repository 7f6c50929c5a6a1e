//! Embedding backends and provider selection.
//!
//! The [`EmbeddingProvider`] trait and the offline [`HashEmbedder`] live in
//! `tenant-rag-core`. This module adds the backends that need the network or
//! native inference:
//! - **[`OpenAIProvider`]**: `POST /v1/embeddings` with batching, retry, and backoff.
//! - **[`OllamaProvider`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **[`LocalProvider`]**: on-device models via fastembed (feature `local-embeddings`).
//!
//! Every backend failure surfaces as
//! [`CoreError::EmbeddingUnavailable`]; the training pipeline records it as a
//! `FAILED` run and the service keeps running.
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use tenant_rag::config::EmbeddingConfig;
//! # use tenant_rag::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "hash"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "hash");
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

pub use tenant_rag_core::embedding::{EmbeddingProvider, HashEmbedder};
use tenant_rag_core::{CoreError, CoreResult};

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::http;

/// Dimensionality of the hash embedder when `embedding.dims` is unset.
pub const DEFAULT_HASH_DIMS: usize = 384;

const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Embed a single query text.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let results = provider.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| Error::EmbeddingUnavailable("empty embedding response".into()))
}

/// Check that a backend returned one vector per input.
fn check_count(expected: usize, got: &[Vec<f32>], service: &str) -> CoreResult<()> {
    if expected != got.len() {
        return Err(CoreError::EmbeddingUnavailable(format!(
            "{} returned {} embeddings for {} inputs",
            service,
            got.len(),
            expected
        )));
    }
    Ok(())
}

fn json_vectors(items: &[serde_json::Value], what: &str) -> CoreResult<Vec<Vec<f32>>> {
    items
        .iter()
        .map(|item| {
            item.as_array()
                .map(|values| {
                    values
                        .iter()
                        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                        .collect()
                })
                .ok_or_else(|| {
                    CoreError::EmbeddingUnavailable(format!(
                        "Invalid {} response: embedding is not an array",
                        what
                    ))
                })
        })
        .collect()
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// The `OPENAI_API_KEY` environment variable is read on every call, so a
/// missing key fails the training run rather than startup.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
        let dims = config.dims.unwrap_or(match model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        });

        Ok(Self {
            model,
            dims,
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs).map_err(Error::InvalidConfig)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| CoreError::EmbeddingUnavailable("OPENAI_API_KEY not set".into()))?;

        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let json = http::post_json_with_retry(
                &self.client,
                "https://api.openai.com/v1/embeddings",
                Some(&api_key),
                &body,
                self.max_retries,
                "OpenAI",
            )
            .await
            .map_err(CoreError::EmbeddingUnavailable)?;

            let vectors = parse_openai_response(&json)?;
            check_count(batch.len(), &vectors, "OpenAI")?;
            out.extend(vectors);
        }
        Ok(out)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> CoreResult<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| {
            CoreError::EmbeddingUnavailable("Invalid OpenAI response: missing data array".into())
        })?;

    let mut indexed: Vec<(u64, serde_json::Value)> = data
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let index = item.get("index").and_then(|v| v.as_u64()).unwrap_or(i as u64);
            let embedding = item.get("embedding").cloned().unwrap_or_default();
            (index, embedding)
        })
        .collect();
    indexed.sort_by_key(|(index, _)| *index);

    let items: Vec<serde_json::Value> = indexed.into_iter().map(|(_, e)| e).collect();
    json_vectors(&items, "OpenAI")
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST {url}/api/embed` (default url `http://localhost:11434`).
/// Requires an embedding model pulled into Ollama, e.g. `nomic-embed-text`.
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            Error::InvalidConfig("embedding.model required for Ollama provider".into())
        })?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());

        Ok(Self {
            model,
            dims: config.dims.unwrap_or(768),
            url: url.trim_end_matches('/').to_string(),
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs).map_err(Error::InvalidConfig)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        let endpoint = format!("{}/api/embed", self.url);
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size.max(1)) {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let json = http::post_json_with_retry(
                &self.client,
                &endpoint,
                None,
                &body,
                self.max_retries,
                "Ollama",
            )
            .await
            .map_err(CoreError::EmbeddingUnavailable)?;

            let embeddings = json
                .get("embeddings")
                .and_then(|e| e.as_array())
                .ok_or_else(|| {
                    CoreError::EmbeddingUnavailable(
                        "Invalid Ollama response: missing embeddings array".into(),
                    )
                })?;
            let vectors = json_vectors(embeddings, "Ollama")?;
            check_count(batch.len(), &vectors, "Ollama")?;
            out.extend(vectors);
        }
        Ok(out)
    }
}

// ============ Local Provider (fastembed) ============

/// On-device embedding via fastembed.
///
/// The model is downloaded from Hugging Face on first use and cached; it is
/// loaded once, lazily, on the blocking thread pool and then reused.
#[cfg(feature = "local-embeddings")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        // Validate the name up front so a typo is a config error
        fastembed_model(&model_name).map_err(|e| Error::InvalidConfig(e.to_string()))?;

        let dims = config.dims.unwrap_or(match model_name.as_str() {
            "bge-base-en-v1.5" | "nomic-embed-text-v1.5" | "multilingual-e5-base" => 768,
            "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
            _ => 384,
        });

        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings")]
fn fastembed_model(name: &str) -> CoreResult<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => Err(CoreError::InvalidConfig(format!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small, multilingual-e5-base, \
             multilingual-e5-large",
            other
        ))),
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        let slot = Arc::clone(&self.model);
        let name = self.model_name.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| CoreError::EmbeddingUnavailable("local model lock poisoned".into()))?;

            if guard.is_none() {
                debug!(model = %name, "loading local embedding model");
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model(&name)?)
                        .with_show_download_progress(false),
                )
                .map_err(|e| {
                    CoreError::EmbeddingUnavailable(format!(
                        "Failed to initialize local embedding model: {}",
                        e
                    ))
                })?;
                *guard = Some(model);
            }

            let model = guard.as_mut().ok_or_else(|| {
                CoreError::EmbeddingUnavailable("local model not loaded".into())
            })?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| CoreError::EmbeddingUnavailable(format!("Local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| CoreError::EmbeddingUnavailable(format!("embedding task failed: {}", e)))?
    }
}

/// Create the [`EmbeddingProvider`] named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"hash"` | [`HashEmbedder`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (feature `local-embeddings`) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    debug!(provider = %config.provider, "creating embedding provider");
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        ))),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(Error::InvalidConfig(
            "Local embedding provider requires --features local-embeddings".into(),
        )),
        other => Err(Error::InvalidConfig(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}
