// Embedding Providers
// Text -> vector for the memory store: remote OpenAI-compatible API, optional
// local fastembed model, and a deterministic lexical fallback.

use crate::config::MemoryStoreConfig;
use crate::types::{MemoryError, MemoryResult, DEFAULT_EMBEDDING_DIMENSION};
use agent_memory_observability::MEMORY_LOG_TARGET;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Model name reported by [`LexicalEmbeddings`].
pub const LEXICAL_MODEL_NAME: &str = "lexical-hash-v1";

/// Something that turns text into fixed-length vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Generate embeddings for multiple texts, in input order.
    async fn embed_batch(&self, texts: &[String]) -> MemoryResult<Vec<Vec<f32>>>;

    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> MemoryResult<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| MemoryError::Embedding("no embedding generated".to_string()))
    }
}

fn ensure_dimension(expected: usize, embedding: &[f32]) -> MemoryResult<()> {
    if embedding.len() != expected {
        return Err(MemoryError::Embedding(format!(
            "embedding dimension mismatch: expected {}, got {}",
            expected,
            embedding.len()
        )));
    }
    Ok(())
}

/// Dimension of well-known OpenAI embedding models.
pub fn known_model_dimension(model: &str) -> Option<usize> {
    match model.trim() {
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

/// Pick the embedding provider described by `config`.
///
/// `Ok(None)` means no semantic provider is configured and callers must fall
/// back to [`LexicalEmbeddings`].
pub fn build_embedding_provider(
    config: &MemoryStoreConfig,
) -> MemoryResult<Option<Arc<dyn EmbeddingProvider>>> {
    if let Some(api_key) = &config.openai_api_key {
        let provider = OpenAiEmbeddings::from_config(api_key.clone(), config)?;
        tracing::info!(
            target: MEMORY_LOG_TARGET,
            "Embeddings enabled: model={} dimension={} base_url={}",
            provider.model_name(),
            provider.dimension(),
            provider.base_url()
        );
        return Ok(Some(Arc::new(provider)));
    }

    if config.local_embeddings {
        #[cfg(feature = "local-embeddings")]
        {
            let provider = LocalEmbeddings::new()?;
            tracing::info!(
                target: MEMORY_LOG_TARGET,
                "Embeddings enabled: model={} dimension={}",
                provider.model_name(),
                provider.dimension()
            );
            return Ok(Some(Arc::new(provider)));
        }

        #[cfg(not(feature = "local-embeddings"))]
        return Err(MemoryError::InvalidConfig(
            "local embeddings requested but the crate was built without the `local-embeddings` feature"
                .to_string(),
        ));
    }

    Ok(None)
}

// ---------------------------------------------------------------------------
// OpenAI-compatible HTTP provider
// ---------------------------------------------------------------------------

/// Embedding provider for `POST {base_url}/embeddings`.
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
    /// Sent as `dimensions` when the caller overrides the model default.
    requested_dimension: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    model: String,
    usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingUsage {
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl OpenAiEmbeddings {
    pub fn from_config(api_key: String, config: &MemoryStoreConfig) -> MemoryResult<Self> {
        let dimension = match config.embedding_dimension {
            Some(dim) => dim,
            None => known_model_dimension(&config.embedding_model).ok_or_else(|| {
                MemoryError::InvalidConfig(format!(
                    "unknown dimension for embedding model '{}'; set MEMORY_EMBEDDING_DIMENSION",
                    config.embedding_model
                ))
            })?,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.embedding_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: config.embedding_base_url.trim_end_matches('/').to_string(),
            model: config.embedding_model.clone(),
            dimension,
            requested_dimension: config.embedding_dimension,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> MemoryResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!(target: MEMORY_LOG_TARGET, "Generating embeddings for {} texts", texts.len());

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.requested_dimension,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ErrorResponse>(&body) {
                return Err(MemoryError::Embedding(format!(
                    "embedding API error ({}): {}",
                    status, error.error.message
                )));
            }
            return Err(MemoryError::Embedding(format!(
                "embedding API error ({}): {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&body).map_err(|e| {
            MemoryError::Embedding(format!("failed to parse embedding response: {e}"))
        })?;

        if let Some(usage) = &parsed.usage {
            tracing::debug!(
                target: MEMORY_LOG_TARGET,
                "Embedding tokens used: {} (model: {})",
                usage.total_tokens,
                parsed.model
            );
        }

        let embeddings = order_by_index(parsed.data);
        if embeddings.len() != texts.len() {
            return Err(MemoryError::Embedding(format!(
                "embedding API returned {} vectors for {} inputs",
                embeddings.len(),
                texts.len()
            )));
        }
        for embedding in &embeddings {
            ensure_dimension(self.dimension, embedding)?;
        }
        Ok(embeddings)
    }
}

fn order_by_index(data: Vec<EmbeddingData>) -> Vec<Vec<f32>> {
    let mut indexed: Vec<(usize, Vec<f32>)> =
        data.into_iter().map(|d| (d.index, d.embedding)).collect();
    indexed.sort_by_key(|(idx, _)| *idx);
    indexed.into_iter().map(|(_, e)| e).collect()
}

// ---------------------------------------------------------------------------
// Local fastembed provider
// ---------------------------------------------------------------------------

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbeddings;

#[cfg(feature = "local-embeddings")]
mod local {
    use super::{ensure_dimension, EmbeddingProvider};
    use crate::types::{
        MemoryError, MemoryResult, DEFAULT_EMBEDDING_DIMENSION, LOCAL_EMBEDDING_MODEL,
    };
    use async_trait::async_trait;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

    /// all-MiniLM-L6-v2 running in-process.
    pub struct LocalEmbeddings {
        model: TextEmbedding,
    }

    impl LocalEmbeddings {
        pub fn new() -> MemoryResult<Self> {
            let options = InitOptions::new(EmbeddingModel::AllMiniLML6V2);
            let model = TextEmbedding::try_new(options).map_err(|err| {
                MemoryError::Embedding(format!(
                    "failed to initialize embedding model '{}': {}",
                    LOCAL_EMBEDDING_MODEL, err
                ))
            })?;
            Ok(Self { model })
        }
    }

    #[async_trait]
    impl EmbeddingProvider for LocalEmbeddings {
        fn model_name(&self) -> &str {
            LOCAL_EMBEDDING_MODEL
        }

        fn dimension(&self) -> usize {
            DEFAULT_EMBEDDING_DIMENSION
        }

        async fn embed_batch(&self, texts: &[String]) -> MemoryResult<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let embeddings = self
                .model
                .embed(texts.to_vec(), None)
                .map_err(|e| MemoryError::Embedding(e.to_string()))?;
            for embedding in &embeddings {
                ensure_dimension(DEFAULT_EMBEDDING_DIMENSION, embedding)?;
            }
            Ok(embeddings)
        }
    }
}

// ---------------------------------------------------------------------------
// Lexical fallback
// ---------------------------------------------------------------------------

/// Bag-of-words feature hashing.
///
/// Used when no semantic provider is configured: identical wording scores
/// high, paraphrases do not. Vectors are non-negative and unit length, so
/// cosine distance stays within [0, 1].
#[derive(Debug, Clone)]
pub struct LexicalEmbeddings {
    dimension: usize,
}

impl LexicalEmbeddings {
    pub fn new() -> Self {
        Self::with_dimension(DEFAULT_EMBEDDING_DIMENSION)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            embedding[index] += 1.0;
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for x in embedding.iter_mut() {
                *x /= magnitude;
            }
        } else {
            // token-free text still needs a unit vector for cosine distance
            embedding[0] = 1.0;
        }
        embedding
    }
}

impl Default for LexicalEmbeddings {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for LexicalEmbeddings {
    fn model_name(&self) -> &str {
        LEXICAL_MODEL_NAME
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> MemoryResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// Calculate cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        0.0
    } else {
        dot_product / (magnitude_a * magnitude_b)
    }
}
