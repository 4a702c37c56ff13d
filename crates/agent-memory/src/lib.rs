pub mod backend;
pub mod config;
pub mod db;
pub mod embeddings;
pub mod helpers;
pub mod store;
pub mod types;

pub use backend::{AddReport, Candidate, VectorBackend, VectorRecord};
pub use config::{MemoryStoreConfig, OverflowPolicy, StorageLimit};
pub use db::SqliteVecBackend;
pub use embeddings::{cosine_similarity, EmbeddingProvider, LexicalEmbeddings, OpenAiEmbeddings};
pub use helpers::*;
pub use store::MemoryStore;
pub use types::*;
