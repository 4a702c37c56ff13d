// Memory Types
// Records, metadata, filters and error types for the memory store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Metadata key the store stamps on every record at creation time.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Default number of candidates requested by `query_memories`.
pub const DEFAULT_N_RESULTS: usize = 5;

/// Dimension of the lexical fallback and the local MiniLM model.
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;

/// Default remote embedding model name
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Local embedding model name (feature `local-embeddings`)
pub const LOCAL_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";

/// A scalar metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    fn from_json(key: &str, value: serde_json::Value) -> MemoryResult<Self> {
        match value {
            serde_json::Value::String(s) => Ok(MetadataValue::String(s)),
            serde_json::Value::Bool(b) => Ok(MetadataValue::Bool(b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(MetadataValue::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(MetadataValue::Float(f))
                } else {
                    Err(MemoryError::InvalidMetadata(format!(
                        "metadata value for '{key}' is not representable: {n}"
                    )))
                }
            }
            other => Err(MemoryError::InvalidMetadata(format!(
                "metadata value for '{key}' must be a string, number or boolean, got {other}"
            ))),
        }
    }
}

impl std::fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(x) => write!(f, "{x}"),
            MetadataValue::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Integer(value)
    }
}

impl From<i32> for MetadataValue {
    fn from(value: i32) -> Self {
        MetadataValue::Integer(i64::from(value))
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

/// Open key/value metadata attached to a memory.
///
/// Any key is accepted; values are restricted to scalars. The only key with
/// store-defined meaning is [`TIMESTAMP_KEY`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, MetadataValue>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Option<MetadataValue> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<MetadataValue> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.0.iter()
    }

    /// Creation time stamped by the store, if present and parseable.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.get(TIMESTAMP_KEY)
            .and_then(MetadataValue::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Build metadata from an arbitrary JSON object, rejecting nested values.
    pub fn from_json(value: serde_json::Value) -> MemoryResult<Self> {
        let serde_json::Value::Object(map) = value else {
            return Err(MemoryError::InvalidMetadata(
                "metadata must be a JSON object".to_string(),
            ));
        };

        let mut metadata = Metadata::new();
        for (key, value) in map {
            let value = MetadataValue::from_json(&key, value)?;
            metadata.0.insert(key, value);
        }
        metadata.validate()?;
        Ok(metadata)
    }

    /// Check invariants that the type alone cannot express.
    pub fn validate(&self) -> MemoryResult<()> {
        for (key, value) in &self.0 {
            if key.is_empty() {
                return Err(MemoryError::InvalidMetadata(
                    "metadata keys must not be empty".to_string(),
                ));
            }
            if let MetadataValue::Float(f) = value {
                if !f.is_finite() {
                    return Err(MemoryError::InvalidMetadata(format!(
                        "metadata value for '{key}' must be finite"
                    )));
                }
            }
        }
        Ok(())
    }

    /// True when every entry in `other` is present here with an equal value.
    pub fn is_superset_of(&self, other: &Metadata) -> bool {
        other.iter().all(|(k, v)| self.get(k) == Some(v))
    }
}

impl<K, V> FromIterator<(K, V)> for Metadata
where
    K: Into<String>,
    V: Into<MetadataValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for Metadata
where
    K: Into<String>,
    V: Into<MetadataValue>,
{
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl<'a> IntoIterator for &'a Metadata {
    type Item = (&'a String, &'a MetadataValue);
    type IntoIter = std::collections::btree_map::Iter<'a, String, MetadataValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Exact-match conjunction over metadata keys.
///
/// The store hands this to the backend untouched; each backend decides how
/// to evaluate it natively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter(BTreeMap<String, MetadataValue>);

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn conditions(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.0.iter()
    }

    /// In-process evaluation for backends without a native filter language.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.0
            .iter()
            .all(|(key, expected)| match (metadata.get(key), expected) {
                (Some(MetadataValue::Integer(a)), MetadataValue::Float(b))
                | (Some(MetadataValue::Float(b)), MetadataValue::Integer(a)) => {
                    (*a as f64) == *b
                }
                (Some(actual), expected) => actual == expected,
                (None, _) => false,
            })
    }
}

impl<K, V> FromIterator<(K, V)> for MetadataFilter
where
    K: Into<String>,
    V: Into<MetadataValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for MetadataFilter
where
    K: Into<String>,
    V: Into<MetadataValue>,
{
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

/// A stored memory as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    /// `1 - distance`; only set on query results that were threshold-checked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f64>,
}

/// Input for batch inserts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewMemory {
    pub content: String,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub id: Option<String>,
}

impl NewMemory {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: None,
            id: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Embedding backend health surfaced to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingHealth {
    /// "ok" when a semantic provider is configured, "degraded_lexical" otherwise.
    pub status: String,
    pub model: String,
    pub reason: Option<String>,
}

/// Memory error types
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("Memory id already exists: {0}")]
    DuplicateId(String),

    #[error("Memory capacity exceeded (max {max} records)")]
    CapacityExceeded { max: usize },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl MemoryError {
    /// Whether the error came from the vector backend rather than from the
    /// caller's input or the embedding provider.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            MemoryError::Database(_) | MemoryError::Io(_) | MemoryError::Storage(_)
        )
    }
}

impl serde::Serialize for MemoryError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type MemoryResult<T> = Result<T, MemoryError>;
