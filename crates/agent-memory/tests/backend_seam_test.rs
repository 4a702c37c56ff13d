use agent_memory::{
    cosine_similarity, AddReport, Candidate, EmbeddingProvider, MemoryError, MemoryRecord,
    MemoryResult, MemoryStore, MemoryStoreConfig, MetadataFilter, StorageLimit, VectorBackend,
    VectorRecord,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// In-memory backend; `scored = false` mimics an engine that returns no distances,
/// `broken = true` one whose storage is unreachable.
struct InMemoryBackend {
    dimension: usize,
    scored: bool,
    records: Mutex<Vec<VectorRecord>>,
    broken: bool,
}

impl InMemoryBackend {
    fn new(dimension: usize, scored: bool) -> Self {
        Self {
            dimension,
            scored,
            records: Mutex::new(Vec::new()),
            broken: false,
        }
    }

    fn failing(dimension: usize) -> Self {
        Self {
            broken: true,
            ..Self::new(dimension, true)
        }
    }

    fn check(&self) -> MemoryResult<()> {
        if self.broken {
            return Err(MemoryError::Storage("disk unavailable".to_string()));
        }
        Ok(())
    }
}

fn to_record(record: &VectorRecord) -> MemoryRecord {
    MemoryRecord {
        id: record.id.clone(),
        content: record.content.clone(),
        metadata: record.metadata.clone(),
        relevance: None,
    }
}

#[async_trait]
impl VectorBackend for InMemoryBackend {
    fn collection(&self) -> &str {
        "in_memory"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn add(
        &self,
        records: Vec<VectorRecord>,
        _limit: Option<StorageLimit>,
    ) -> MemoryResult<AddReport> {
        self.check()?;
        let mut stored = self.records.lock().unwrap();
        for record in &records {
            if stored.iter().any(|r| r.id == record.id) {
                return Err(MemoryError::DuplicateId(record.id.clone()));
            }
        }
        let inserted = records.len();
        stored.extend(records);
        Ok(AddReport {
            inserted,
            evicted: Vec::new(),
        })
    }

    async fn get(&self, id: &str) -> MemoryResult<Option<MemoryRecord>> {
        self.check()?;
        let stored = self.records.lock().unwrap();
        Ok(stored.iter().find(|r| r.id == id).map(to_record))
    }

    async fn delete(&self, id: &str) -> MemoryResult<bool> {
        self.check()?;
        let mut stored = self.records.lock().unwrap();
        let before = stored.len();
        stored.retain(|r| r.id != id);
        Ok(stored.len() < before)
    }

    async fn query(
        &self,
        embedding: &[f32],
        n_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> MemoryResult<Vec<Candidate>> {
        self.check()?;
        let stored = self.records.lock().unwrap();
        let mut candidates: Vec<Candidate> = stored
            .iter()
            .filter(|r| filter.map_or(true, |f| f.matches(&r.metadata)))
            .map(|r| Candidate {
                record: to_record(r),
                distance: self
                    .scored
                    .then(|| 1.0 - f64::from(cosine_similarity(embedding, &r.embedding))),
            })
            .collect();
        candidates.sort_by(|a, b| {
            a.distance
                .unwrap_or(0.0)
                .total_cmp(&b.distance.unwrap_or(0.0))
        });
        candidates.truncate(n_results);
        Ok(candidates)
    }

    async fn list(&self) -> MemoryResult<Vec<MemoryRecord>> {
        self.check()?;
        Ok(self.records.lock().unwrap().iter().map(to_record).collect())
    }

    async fn reset(&self) -> MemoryResult<()> {
        self.check()?;
        self.records.lock().unwrap().clear();
        Ok(())
    }

    async fn count(&self) -> MemoryResult<u64> {
        self.check()?;
        Ok(self.records.lock().unwrap().len() as u64)
    }
}

/// Embeds text as `[len, 1, 0]` so tests can reason about distances.
struct LengthEmbeddings;

#[async_trait]
impl EmbeddingProvider for LengthEmbeddings {
    fn model_name(&self) -> &str {
        "length-test"
    }

    fn dimension(&self) -> usize {
        3
    }

    async fn embed_batch(&self, texts: &[String]) -> MemoryResult<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| vec![t.len() as f32, 1.0, 0.0])
            .collect())
    }
}

fn config(threshold: f64) -> MemoryStoreConfig {
    MemoryStoreConfig {
        relevance_threshold: threshold,
        ..MemoryStoreConfig::default()
    }
}

#[tokio::test]
async fn test_unscored_candidates_are_returned_without_relevance() {
    let store = MemoryStore::with_backend(
        config(0.99),
        Arc::new(InMemoryBackend::new(3, false)),
        Some(Arc::new(LengthEmbeddings)),
    )
    .unwrap();

    store.add_memory("a", None, None).await.unwrap();
    store.add_memory("a much longer memory", None, None).await.unwrap();

    let results = store.query_memories("a", 5, None).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.relevance.is_none()));
}

#[tokio::test]
async fn test_threshold_drops_distant_candidates() {
    let store = MemoryStore::with_backend(
        config(0.99),
        Arc::new(InMemoryBackend::new(3, true)),
        Some(Arc::new(LengthEmbeddings)),
    )
    .unwrap();

    let near = store.add_memory("abc", None, None).await.unwrap();
    store.add_memory("", None, None).await.unwrap();

    let results = store.query_memories("xyz", 5, None).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, near);
    assert!(results[0].relevance.unwrap() > 0.99);
}

#[tokio::test]
async fn test_filter_is_passed_to_backend() {
    let store = MemoryStore::with_backend(
        config(0.0),
        Arc::new(InMemoryBackend::new(3, true)),
        Some(Arc::new(LengthEmbeddings)),
    )
    .unwrap();

    store
        .add_memory("one", Some([("cat", "x")].into()), None)
        .await
        .unwrap();
    store
        .add_memory("two", Some([("cat", "y")].into()), None)
        .await
        .unwrap();

    let filter = MetadataFilter::new().eq("cat", "y");
    let results = store.query_memories("one", 5, Some(&filter)).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, "two");
}

#[tokio::test]
async fn test_backend_failure_propagates() {
    let store = MemoryStore::with_backend(
        config(0.5),
        Arc::new(InMemoryBackend::failing(3)),
        Some(Arc::new(LengthEmbeddings)),
    )
    .unwrap();

    let err = store.add_memory("lost", None, None).await.unwrap_err();
    assert!(err.is_storage_failure());
}

#[tokio::test]
async fn test_read_and_reset_failures_propagate() {
    let store = MemoryStore::with_backend(
        config(0.0),
        Arc::new(InMemoryBackend::failing(3)),
        Some(Arc::new(LengthEmbeddings)),
    )
    .unwrap();

    let err = store.query_memories("anything", 5, None).await.unwrap_err();
    assert!(err.is_storage_failure());

    let err = store.get_all_memories().await.unwrap_err();
    assert!(err.is_storage_failure());

    let err = store.count_memories().await.unwrap_err();
    assert!(err.is_storage_failure());

    let err = store.clear_all_memories().await.unwrap_err();
    assert!(err.is_storage_failure());

    let err = store.get_memory("m1").await.unwrap_err();
    assert!(err.is_storage_failure());

    let err = store.delete_memory("m1").await.unwrap_err();
    assert!(err.is_storage_failure());
}

#[tokio::test]
async fn test_clear_empties_backend() {
    let backend = Arc::new(InMemoryBackend::new(3, true));
    let store = MemoryStore::with_backend(
        config(0.0),
        backend.clone(),
        Some(Arc::new(LengthEmbeddings)),
    )
    .unwrap();
    store.add_memory("kept", None, None).await.unwrap();
    assert_eq!(store.count_memories().await.unwrap(), 1);

    store.clear_all_memories().await.unwrap();
    assert_eq!(store.count_memories().await.unwrap(), 0);
    assert!(backend.records.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_dimension_mismatch_is_rejected() {
    let err = MemoryStore::with_backend(
        config(0.5),
        Arc::new(InMemoryBackend::new(8, true)),
        Some(Arc::new(LengthEmbeddings)),
    )
    .err()
    .unwrap();
    assert!(matches!(err, MemoryError::InvalidConfig(_)));

    // without a provider the lexical fallback needs its own dimension
    let err = MemoryStore::with_backend(config(0.5), Arc::new(InMemoryBackend::new(3, true)), None)
        .err()
        .unwrap();
    assert!(matches!(err, MemoryError::InvalidConfig(_)));
}

#[tokio::test]
async fn test_health_reports_provider() {
    let store = MemoryStore::with_backend(
        config(0.5),
        Arc::new(InMemoryBackend::new(3, true)),
        Some(Arc::new(LengthEmbeddings)),
    )
    .unwrap();

    let health = store.embedding_health();
    assert_eq!(health.status, "ok");
    assert_eq!(health.model, "length-test");
    assert!(health.reason.is_none());
}
