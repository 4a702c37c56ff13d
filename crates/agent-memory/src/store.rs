// Memory Store Module
// High-level memory operations (add, query, delete, clear)

use crate::backend::{Candidate, VectorBackend, VectorRecord};
use crate::config::MemoryStoreConfig;
use crate::db::SqliteVecBackend;
use crate::embeddings::{
    build_embedding_provider, EmbeddingProvider, LexicalEmbeddings, LEXICAL_MODEL_NAME,
};
use crate::types::{
    EmbeddingHealth, MemoryError, MemoryRecord, MemoryResult, Metadata, MetadataFilter,
    NewMemory, TIMESTAMP_KEY,
};
use agent_memory_observability::{
    emit_event, redact_text, MemoryEvent, MEMORY_LOG_TARGET,
};
use chrono::{SecondsFormat, Utc};
use std::sync::Arc;
use tracing::Level;

const COMPONENT: &str = "memory.store";

/// Store-and-retrieve memory for agents.
///
/// Holds no records itself: every operation goes straight to the backend, and
/// text is embedded with the configured provider or, without one, with
/// [`LexicalEmbeddings`].
pub struct MemoryStore {
    config: MemoryStoreConfig,
    backend: Arc<dyn VectorBackend>,
    embeddings: Option<Arc<dyn EmbeddingProvider>>,
    fallback: LexicalEmbeddings,
}

impl MemoryStore {
    /// Open the SQLite-backed store described by `config`.
    pub async fn open(config: MemoryStoreConfig) -> MemoryResult<Self> {
        config.validate()?;

        let embeddings = build_embedding_provider(&config)?;
        let fallback = LexicalEmbeddings::new();

        let (dimension, model) = match &embeddings {
            Some(provider) => (provider.dimension(), provider.model_name().to_string()),
            None => {
                tracing::warn!(
                    target: MEMORY_LOG_TARGET,
                    "No embedding provider configured; falling back to lexical hashing (semantic recall disabled)"
                );
                (fallback.dimension(), LEXICAL_MODEL_NAME.to_string())
            }
        };

        let backend = SqliteVecBackend::open(
            &config.database_path(),
            &config.collection_name,
            dimension,
            &model,
        )
        .await?;

        Self::with_backend(config, Arc::new(backend), embeddings)
    }

    /// Read configuration from the environment (and `.env`) and open the store.
    pub async fn from_env() -> MemoryResult<Self> {
        Self::open(MemoryStoreConfig::from_env()?).await
    }

    /// Build a store over any backend.
    ///
    /// The backend must accept vectors of the active embedder's dimension.
    pub fn with_backend(
        config: MemoryStoreConfig,
        backend: Arc<dyn VectorBackend>,
        embeddings: Option<Arc<dyn EmbeddingProvider>>,
    ) -> MemoryResult<Self> {
        config.validate()?;

        let store = Self {
            config,
            backend,
            embeddings,
            fallback: LexicalEmbeddings::new(),
        };

        let expected = store.embedding_dimension();
        if store.backend.dimension() != expected {
            return Err(MemoryError::InvalidConfig(format!(
                "collection '{}' stores {}-dimensional vectors but embedder '{}' produces {}",
                store.backend.collection(),
                store.backend.dimension(),
                store.embedding_model(),
                expected
            )));
        }

        let health = store.embedding_health();
        emit_event(
            Level::INFO,
            MemoryEvent::new("memory.store.opened", COMPONENT)
                .collection(store.backend.collection())
                .status(&health.status)
                .detail(&health.model),
        );

        Ok(store)
    }

    pub fn config(&self) -> &MemoryStoreConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn VectorBackend> {
        &self.backend
    }

    fn embedding_model(&self) -> &str {
        match &self.embeddings {
            Some(provider) => provider.model_name(),
            None => LEXICAL_MODEL_NAME,
        }
    }

    fn embedding_dimension(&self) -> usize {
        match &self.embeddings {
            Some(provider) => provider.dimension(),
            None => self.fallback.dimension(),
        }
    }

    /// Whether semantic embeddings are active.
    pub fn embedding_health(&self) -> EmbeddingHealth {
        match &self.embeddings {
            Some(provider) => EmbeddingHealth {
                status: "ok".to_string(),
                model: provider.model_name().to_string(),
                reason: None,
            },
            None => EmbeddingHealth {
                status: "degraded_lexical".to_string(),
                model: LEXICAL_MODEL_NAME.to_string(),
                reason: Some(
                    "no embedding provider configured; similarity is word overlap only"
                        .to_string(),
                ),
            },
        }
    }

    async fn embed_one(&self, text: &str) -> MemoryResult<Vec<f32>> {
        match &self.embeddings {
            Some(provider) => provider.embed(text).await,
            None => Ok(self.fallback.embed_text(text)),
        }
    }

    async fn embed_many(&self, texts: &[String]) -> MemoryResult<Vec<Vec<f32>>> {
        match &self.embeddings {
            Some(provider) => provider.embed_batch(texts).await,
            None => Ok(texts.iter().map(|t| self.fallback.embed_text(t)).collect()),
        }
    }

    /// Store one memory and return its id.
    ///
    /// A fresh UUID is used when `id` is `None`. Any caller-supplied
    /// `timestamp` metadata is replaced with the creation time.
    pub async fn add_memory(
        &self,
        content: impl Into<String>,
        metadata: Option<Metadata>,
        id: Option<String>,
    ) -> MemoryResult<String> {
        let memory = NewMemory {
            content: content.into(),
            metadata,
            id,
        };
        let mut ids = self.insert(vec![memory]).await?;
        ids.pop().ok_or_else(|| {
            MemoryError::Storage("backend accepted the memory without an id".to_string())
        })
    }

    /// Store several memories in one backend transaction.
    ///
    /// Either every entry is stored or none is. Ids are returned in input order.
    pub async fn add_memories(&self, memories: Vec<NewMemory>) -> MemoryResult<Vec<String>> {
        self.insert(memories).await
    }

    async fn insert(&self, memories: Vec<NewMemory>) -> MemoryResult<Vec<String>> {
        if memories.is_empty() {
            return Ok(Vec::new());
        }

        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let mut prepared = Vec::with_capacity(memories.len());
        for memory in memories {
            let mut metadata = memory.metadata.unwrap_or_default();
            metadata.validate()?;
            metadata.insert(TIMESTAMP_KEY, timestamp.clone());
            let id = memory
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            prepared.push((id, memory.content, metadata));
        }

        let texts: Vec<String> = prepared.iter().map(|(_, c, _)| c.clone()).collect();
        let vectors = self.embed_many(&texts).await?;
        if vectors.len() != prepared.len() {
            return Err(MemoryError::Embedding(format!(
                "expected {} embeddings, got {}",
                prepared.len(),
                vectors.len()
            )));
        }

        let ids: Vec<String> = prepared.iter().map(|(id, _, _)| id.clone()).collect();
        let records = prepared
            .into_iter()
            .zip(vectors)
            .map(|((id, content, metadata), embedding)| VectorRecord {
                id,
                content,
                metadata,
                embedding,
            })
            .collect();

        let report = match self
            .backend
            .add(records, self.config.storage_limit())
            .await
        {
            Ok(report) => report,
            Err(err) => {
                let detail = err.to_string();
                emit_event(
                    Level::WARN,
                    MemoryEvent::new("memory.add.failed", COMPONENT)
                        .collection(self.backend.collection())
                        .error_code(error_code(&err))
                        .detail(&detail),
                );
                return Err(err);
            }
        };

        if !report.evicted.is_empty() {
            let detail = format!("evicted={}", report.evicted.len());
            emit_event(
                Level::INFO,
                MemoryEvent::new("memory.evicted", COMPONENT)
                    .collection(self.backend.collection())
                    .status("evict_oldest")
                    .detail(&detail),
            );
            tracing::debug!(
                target: MEMORY_LOG_TARGET,
                "Evicted oldest memories: {:?}",
                report.evicted
            );
        }

        tracing::debug!(
            target: MEMORY_LOG_TARGET,
            "Stored {} memories in {}",
            report.inserted,
            self.backend.collection()
        );

        Ok(ids)
    }

    /// Up to `n_results` memories most similar to `query`, best first.
    ///
    /// Results whose relevance falls below the configured threshold are
    /// dropped; the filter, if any, is evaluated by the backend.
    pub async fn query_memories(
        &self,
        query: &str,
        n_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> MemoryResult<Vec<MemoryRecord>> {
        if n_results == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embed_one(query).await?;
        let candidates = self.backend.query(&embedding, n_results, filter).await?;
        let found = candidates.len();
        let results = apply_threshold(candidates, self.config.relevance_threshold);

        tracing::debug!(
            target: MEMORY_LOG_TARGET,
            "Query {} in {}: {} candidates, {} above threshold {}",
            redact_text(query),
            self.backend.collection(),
            found,
            results.len(),
            self.config.relevance_threshold
        );

        Ok(results)
    }

    pub async fn get_memory(&self, id: &str) -> MemoryResult<Option<MemoryRecord>> {
        self.backend.get(id).await
    }

    /// Returns `true` when a memory with `id` existed and was removed.
    pub async fn delete_memory(&self, id: &str) -> MemoryResult<bool> {
        let deleted = self.backend.delete(id).await?;
        if deleted {
            emit_event(
                Level::DEBUG,
                MemoryEvent::new("memory.deleted", COMPONENT)
                    .collection(self.backend.collection())
                    .memory_id(id),
            );
        } else {
            tracing::debug!(target: MEMORY_LOG_TARGET, "No memory {} to delete", id);
        }
        Ok(deleted)
    }

    /// Every stored memory in insertion order.
    pub async fn get_all_memories(&self) -> MemoryResult<Vec<MemoryRecord>> {
        self.backend.list().await
    }

    pub async fn clear_all_memories(&self) -> MemoryResult<()> {
        let before = self.backend.count().await?;
        self.backend.reset().await?;

        let detail = format!("removed={}", before);
        emit_event(
            Level::INFO,
            MemoryEvent::new("memory.cleared", COMPONENT)
                .collection(self.backend.collection())
                .detail(&detail),
        );
        Ok(())
    }

    pub async fn count_memories(&self) -> MemoryResult<u64> {
        self.backend.count().await
    }
}

/// Convert candidates to results, keeping backend order.
///
/// Candidates without a distance pass through unscored.
fn apply_threshold(candidates: Vec<Candidate>, threshold: f64) -> Vec<MemoryRecord> {
    candidates
        .into_iter()
        .filter_map(|candidate| {
            let mut record = candidate.record;
            match candidate.distance {
                Some(distance) => {
                    let relevance = 1.0 - distance;
                    if relevance >= threshold {
                        record.relevance = Some(relevance);
                        Some(record)
                    } else {
                        None
                    }
                }
                None => {
                    record.relevance = None;
                    Some(record)
                }
            }
        })
        .collect()
}

fn error_code(err: &MemoryError) -> &'static str {
    match err {
        MemoryError::Database(_) => "database",
        MemoryError::Io(_) => "io",
        MemoryError::Serialization(_) => "serialization",
        MemoryError::Http(_) => "http",
        MemoryError::Embedding(_) => "embedding",
        MemoryError::InvalidConfig(_) => "invalid_config",
        MemoryError::InvalidMetadata(_) => "invalid_metadata",
        MemoryError::DuplicateId(_) => "duplicate_id",
        MemoryError::CapacityExceeded { .. } => "capacity_exceeded",
        MemoryError::Storage(_) => "storage",
    }
}
