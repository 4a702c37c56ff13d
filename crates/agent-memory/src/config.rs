// Memory Store Configuration
// Environment-sourced settings with validation

use crate::types::{MemoryError, MemoryResult, DEFAULT_EMBEDDING_MODEL};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
pub const ENV_EMBEDDING_MODEL: &str = "MEMORY_EMBEDDING_MODEL";
pub const ENV_EMBEDDING_DIMENSION: &str = "MEMORY_EMBEDDING_DIMENSION";
pub const ENV_EMBEDDING_TIMEOUT_SECS: &str = "MEMORY_EMBEDDING_TIMEOUT_SECS";
pub const ENV_LOCAL_EMBEDDINGS: &str = "MEMORY_LOCAL_EMBEDDINGS";
pub const ENV_PERSIST_DIRECTORY: &str = "MEMORY_PERSIST_DIRECTORY";
pub const ENV_COLLECTION_NAME: &str = "MEMORY_COLLECTION_NAME";
pub const ENV_MAX_MEMORY_SIZE: &str = "MAX_MEMORY_SIZE";
pub const ENV_OVERFLOW_POLICY: &str = "MEMORY_OVERFLOW_POLICY";
pub const ENV_RELEVANCE_THRESHOLD: &str = "MEMORY_RELEVANCE_THRESHOLD";

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_PERSIST_DIRECTORY: &str = "./memory_db";
pub const DEFAULT_COLLECTION_NAME: &str = "agent_memory";
pub const DEFAULT_MAX_MEMORY_SIZE: usize = 100;
pub const DEFAULT_RELEVANCE_THRESHOLD: f64 = 0.7;
pub const DEFAULT_EMBEDDING_TIMEOUT_SECS: u64 = 30;

const MAX_COLLECTION_NAME_LEN: usize = 63;

/// What to do when an add would push the collection past `max_memory_size`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Delete the oldest records (by insertion order) to make room.
    #[default]
    EvictOldest,
    /// Fail the add and write nothing.
    Reject,
}

impl std::str::FromStr for OverflowPolicy {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "evict_oldest" | "evict-oldest" | "evict" => Ok(OverflowPolicy::EvictOldest),
            "reject" => Ok(OverflowPolicy::Reject),
            other => Err(MemoryError::InvalidConfig(format!(
                "{ENV_OVERFLOW_POLICY} must be 'evict_oldest' or 'reject', got '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverflowPolicy::EvictOldest => write!(f, "evict_oldest"),
            OverflowPolicy::Reject => write!(f, "reject"),
        }
    }
}

/// Capacity rule handed to the backend on every add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageLimit {
    pub max_records: usize,
    pub policy: OverflowPolicy,
}

/// Memory store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStoreConfig {
    /// Credential for the OpenAI-compatible embeddings API. `None` degrades
    /// similarity search to lexical hashing.
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,
    pub embedding_base_url: String,
    pub embedding_model: String,
    /// Overrides the dimension inferred from `embedding_model`.
    pub embedding_dimension: Option<usize>,
    pub embedding_timeout_secs: u64,
    /// Use the bundled fastembed model when no API key is set.
    pub local_embeddings: bool,
    pub persist_directory: PathBuf,
    pub collection_name: String,
    /// Maximum records per collection; 0 disables the cap.
    pub max_memory_size: usize,
    pub overflow_policy: OverflowPolicy,
    /// Minimum `1 - distance` for a query result to be returned.
    pub relevance_threshold: f64,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            embedding_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dimension: None,
            embedding_timeout_secs: DEFAULT_EMBEDDING_TIMEOUT_SECS,
            local_embeddings: false,
            persist_directory: PathBuf::from(DEFAULT_PERSIST_DIRECTORY),
            collection_name: DEFAULT_COLLECTION_NAME.to_string(),
            max_memory_size: DEFAULT_MAX_MEMORY_SIZE,
            overflow_policy: OverflowPolicy::default(),
            relevance_threshold: DEFAULT_RELEVANCE_THRESHOLD,
        }
    }
}

impl MemoryStoreConfig {
    /// Load from the process environment, honouring a `.env` file if present.
    pub fn from_env() -> MemoryResult<Self> {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                return Err(MemoryError::InvalidConfig(format!(
                    "failed to load .env file: {err}"
                )));
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unset or blank keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> MemoryResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let defaults = Self::default();
        let config = Self {
            openai_api_key: get(ENV_OPENAI_API_KEY),
            embedding_base_url: get(ENV_OPENAI_BASE_URL).unwrap_or(defaults.embedding_base_url),
            embedding_model: get(ENV_EMBEDDING_MODEL).unwrap_or(defaults.embedding_model),
            embedding_dimension: get(ENV_EMBEDDING_DIMENSION)
                .map(|v| parse_number::<usize>(ENV_EMBEDDING_DIMENSION, &v))
                .transpose()?,
            embedding_timeout_secs: get(ENV_EMBEDDING_TIMEOUT_SECS)
                .map(|v| parse_number::<u64>(ENV_EMBEDDING_TIMEOUT_SECS, &v))
                .transpose()?
                .unwrap_or(defaults.embedding_timeout_secs),
            local_embeddings: get(ENV_LOCAL_EMBEDDINGS)
                .map(|v| parse_bool(ENV_LOCAL_EMBEDDINGS, &v))
                .transpose()?
                .unwrap_or(defaults.local_embeddings),
            persist_directory: get(ENV_PERSIST_DIRECTORY)
                .map(PathBuf::from)
                .unwrap_or(defaults.persist_directory),
            collection_name: get(ENV_COLLECTION_NAME).unwrap_or(defaults.collection_name),
            max_memory_size: get(ENV_MAX_MEMORY_SIZE)
                .map(|v| parse_number::<usize>(ENV_MAX_MEMORY_SIZE, &v))
                .transpose()?
                .unwrap_or(defaults.max_memory_size),
            overflow_policy: get(ENV_OVERFLOW_POLICY)
                .map(|v| v.parse::<OverflowPolicy>())
                .transpose()?
                .unwrap_or(defaults.overflow_policy),
            relevance_threshold: get(ENV_RELEVANCE_THRESHOLD)
                .map(|v| parse_number::<f64>(ENV_RELEVANCE_THRESHOLD, &v))
                .transpose()?
                .unwrap_or(defaults.relevance_threshold),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MemoryResult<()> {
        if !(0.0..=1.0).contains(&self.relevance_threshold) {
            return Err(MemoryError::InvalidConfig(format!(
                "relevance threshold must be within [0, 1], got {}",
                self.relevance_threshold
            )));
        }
        if self.persist_directory.as_os_str().is_empty() {
            return Err(MemoryError::InvalidConfig(
                "persist directory must not be empty".to_string(),
            ));
        }
        validate_collection_name(&self.collection_name)?;
        if self.embedding_dimension == Some(0) {
            return Err(MemoryError::InvalidConfig(
                "embedding dimension must be positive".to_string(),
            ));
        }
        if self.embedding_timeout_secs == 0 {
            return Err(MemoryError::InvalidConfig(
                "embedding timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The capacity rule, or `None` when the cap is disabled.
    pub fn storage_limit(&self) -> Option<StorageLimit> {
        (self.max_memory_size > 0).then_some(StorageLimit {
            max_records: self.max_memory_size,
            policy: self.overflow_policy,
        })
    }

    pub fn has_embedding_credential(&self) -> bool {
        self.openai_api_key.is_some()
    }

    pub fn database_path(&self) -> PathBuf {
        self.persist_directory.join("agent_memory.db")
    }
}

/// Collection names become SQL identifiers, so they are restricted to
/// `[A-Za-z][A-Za-z0-9_]*` and at most 63 characters. Names that differ
/// only in case refer to the same collection.
pub fn validate_collection_name(name: &str) -> MemoryResult<()> {
    let mut chars = name.chars();
    let valid_start = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_start || !valid_rest || name.len() > MAX_COLLECTION_NAME_LEN {
        return Err(MemoryError::InvalidConfig(format!(
            "collection name '{name}' must start with a letter, contain only letters, digits or '_', and be at most {MAX_COLLECTION_NAME_LEN} characters"
        )));
    }
    Ok(())
}

fn parse_number<T>(key: &str, raw: &str) -> MemoryResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| MemoryError::InvalidConfig(format!("{key}='{raw}' is not a valid number: {e}")))
}

fn parse_bool(key: &str, raw: &str) -> MemoryResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(MemoryError::InvalidConfig(format!(
            "{key}='{raw}' is not a valid boolean"
        ))),
    }
}
