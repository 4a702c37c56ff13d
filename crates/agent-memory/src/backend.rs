// Vector Backend
// Persistence and nearest-neighbour search seam used by the memory store

use crate::config::StorageLimit;
use crate::types::{MemoryRecord, MemoryResult, Metadata, MetadataFilter};
use async_trait::async_trait;

/// A record ready to be persisted, vector included.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
}

/// A nearest-neighbour hit. `distance` is `None` when the backend could not
/// score the candidate.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub record: MemoryRecord,
    pub distance: Option<f64>,
}

/// Outcome of an add.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddReport {
    pub inserted: usize,
    /// Ids removed to honour the storage limit, oldest first.
    pub evicted: Vec<String>,
}

/// A persistent collection of (vector, document, metadata) triples keyed by id.
///
/// Implementations must make `add`, `delete` and `reset` all-or-nothing.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Logical collection name.
    fn collection(&self) -> &str;

    /// Vector length accepted by this collection.
    fn dimension(&self) -> usize;

    /// Persist `records`; fails with `DuplicateId` if any id already exists.
    async fn add(
        &self,
        records: Vec<VectorRecord>,
        limit: Option<StorageLimit>,
    ) -> MemoryResult<AddReport>;

    async fn get(&self, id: &str) -> MemoryResult<Option<MemoryRecord>>;

    /// Returns whether a record existed and was removed.
    async fn delete(&self, id: &str) -> MemoryResult<bool>;

    /// Up to `n_results` nearest neighbours of `embedding`, nearest first,
    /// restricted to records matching `filter`.
    async fn query(
        &self,
        embedding: &[f32],
        n_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> MemoryResult<Vec<Candidate>>;

    /// Every record in insertion order.
    async fn list(&self) -> MemoryResult<Vec<MemoryRecord>>;

    /// Drop and recreate the collection.
    async fn reset(&self) -> MemoryResult<()>;

    async fn count(&self) -> MemoryResult<u64>;
}
