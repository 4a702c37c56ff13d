// Database Layer Module
// SQLite + sqlite-vec implementation of the vector backend

use crate::backend::{AddReport, Candidate, VectorBackend, VectorRecord};
use crate::config::{validate_collection_name, OverflowPolicy, StorageLimit};
use crate::types::{
    MemoryError, MemoryRecord, MemoryResult, Metadata, MetadataFilter, MetadataValue,
};
use agent_memory_observability::MEMORY_LOG_TARGET;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{
    ffi::sqlite3_auto_extension, params, params_from_iter, Connection, OptionalExtension, Row,
    Transaction,
};
use sqlite_vec::sqlite3_vec_init;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::Mutex;

/// Largest `k` sqlite-vec accepts for a KNN query.
pub const MAX_QUERY_RESULTS: usize = 4096;

static REGISTER_SQLITE_VEC: Once = Once::new();

fn register_sqlite_vec() {
    REGISTER_SQLITE_VEC.call_once(|| unsafe {
        sqlite3_auto_extension(Some(std::mem::transmute::<
            *const (),
            unsafe extern "C" fn(
                *mut rusqlite::ffi::sqlite3,
                *mut *mut std::os::raw::c_char,
                *const rusqlite::ffi::sqlite3_api_routines,
            ) -> std::os::raw::c_int,
        >(sqlite3_vec_init as *const ())));
    });
}

/// One collection inside a SQLite database file.
pub struct SqliteVecBackend {
    conn: Arc<Mutex<Connection>>,
    collection: String,
    dimension: usize,
    records_table: String,
    vectors_table: String,
}

impl SqliteVecBackend {
    /// Open (or create) `collection` in the database at `db_path`.
    ///
    /// A collection remembers the dimension and embedding model it was
    /// created with; reopening it with different ones is a configuration
    /// error rather than a silent mix of incomparable vectors. Names are
    /// case-insensitive and stored lowercased.
    pub async fn open(
        db_path: &Path,
        collection: &str,
        dimension: usize,
        embedding_model: &str,
    ) -> MemoryResult<Self> {
        validate_collection_name(collection)?;
        // SQLite identifiers are case-insensitive, so `Notes` and `notes` share tables
        let collection = collection.to_ascii_lowercase();
        if dimension == 0 {
            return Err(MemoryError::InvalidConfig(
                "vector dimension must be positive".to_string(),
            ));
        }

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        register_sqlite_vec();

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(10))?;

        // PRAGMA journal_mode returns a row, so query_row is used to ignore it
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute("PRAGMA synchronous = NORMAL", [])?;

        let backend = Self {
            conn: Arc::new(Mutex::new(conn)),
            records_table: format!("{collection}_records"),
            vectors_table: format!("{collection}_vectors"),
            collection,
            dimension,
        };

        backend.init_schema(embedding_model).await?;

        tracing::debug!(
            target: MEMORY_LOG_TARGET,
            "Opened collection {} (dimension={}, model={}) at {}",
            backend.collection,
            dimension,
            embedding_model,
            db_path.display()
        );

        Ok(backend)
    }

    async fn init_schema(&self, embedding_model: &str) -> MemoryResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        tx.execute(
            "CREATE TABLE IF NOT EXISTS memory_collections (
                name TEXT PRIMARY KEY COLLATE NOCASE,
                dimension INTEGER NOT NULL,
                embedding_model TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        let existing: Option<(i64, String)> = tx
            .query_row(
                "SELECT dimension, embedding_model FROM memory_collections WHERE name = ?1",
                params![self.collection],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match existing {
            Some((dimension, model)) => {
                if dimension as usize != self.dimension || model != embedding_model {
                    return Err(MemoryError::InvalidConfig(format!(
                        "collection '{}' was created for model '{}' (dimension {}), not '{}' (dimension {}); clear it or choose another collection name",
                        self.collection, model, dimension, embedding_model, self.dimension
                    )));
                }
            }
            None => {
                tx.execute(
                    "INSERT INTO memory_collections (name, dimension, embedding_model, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        self.collection,
                        self.dimension as i64,
                        embedding_model,
                        Utc::now().to_rfc3339()
                    ],
                )?;
            }
        }

        self.create_collection_tables(&tx)?;
        tx.commit()?;
        Ok(())
    }

    fn create_collection_tables(&self, tx: &Transaction<'_>) -> MemoryResult<()> {
        tx.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL UNIQUE,
                    content TEXT NOT NULL,
                    metadata TEXT NOT NULL,
                    created_at TEXT NOT NULL
                )",
                self.records_table
            ),
            [],
        )?;

        tx.execute(
            &format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS \"{}\" USING vec0(
                    memory_id TEXT PRIMARY KEY,
                    embedding float[{}] distance_metric=cosine
                )",
                self.vectors_table, self.dimension
            ),
            [],
        )?;

        Ok(())
    }

    fn drop_collection_tables(&self, tx: &Transaction<'_>) -> MemoryResult<()> {
        for table in [&self.vectors_table, &self.records_table] {
            tx.execute(&format!("DROP TABLE IF EXISTS \"{}\"", table), [])?;
        }
        Ok(())
    }

    fn ensure_dimension(&self, embedding: &[f32]) -> MemoryResult<()> {
        if embedding.len() != self.dimension {
            return Err(MemoryError::Embedding(format!(
                "embedding dimension mismatch for collection '{}': expected {}, got {}",
                self.collection,
                self.dimension,
                embedding.len()
            )));
        }
        Ok(())
    }

    fn count_in(&self, tx: &Transaction<'_>) -> MemoryResult<u64> {
        let n: i64 = tx.query_row(
            &format!("SELECT COUNT(*) FROM \"{}\"", self.records_table),
            [],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Remove the `n` oldest records inside `tx`, returning their ids.
    fn evict_oldest(&self, tx: &Transaction<'_>, n: usize) -> MemoryResult<Vec<String>> {
        let ids = {
            let mut stmt = tx.prepare(&format!(
                "SELECT id FROM \"{}\" ORDER BY seq ASC LIMIT ?1",
                self.records_table
            ))?;
            let ids = stmt
                .query_map(params![n as i64], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };

        for id in &ids {
            self.delete_in(tx, id)?;
        }
        Ok(ids)
    }

    fn delete_in(&self, tx: &Transaction<'_>, id: &str) -> MemoryResult<bool> {
        tx.execute(
            &format!("DELETE FROM \"{}\" WHERE memory_id = ?1", self.vectors_table),
            params![id],
        )?;
        let deleted = tx.execute(
            &format!("DELETE FROM \"{}\" WHERE id = ?1", self.records_table),
            params![id],
        )?;
        Ok(deleted > 0)
    }

    fn id_exists(&self, tx: &Transaction<'_>, id: &str) -> MemoryResult<bool> {
        let found: Option<i64> = tx
            .query_row(
                &format!("SELECT 1 FROM \"{}\" WHERE id = ?1", self.records_table),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn knn_sql(&self) -> String {
        format!(
            "SELECT r.id, r.content, r.metadata, v.distance
             FROM \"{}\" AS v
             JOIN \"{}\" AS r ON v.memory_id = r.id
             WHERE v.embedding MATCH ?1 AND k = ?2
             ORDER BY v.distance, r.seq",
            self.vectors_table, self.records_table
        )
    }

    /// Filtered search scans the matching rows so the filter is applied
    /// before the limit, not after the KNN cut.
    fn filtered_sql(&self, filter: &MetadataFilter) -> MemoryResult<(String, Vec<SqlValue>)> {
        let mut clauses = Vec::with_capacity(filter.len());
        let mut values = Vec::with_capacity(filter.len() * 2);
        let mut next_param = 3;

        for (key, value) in filter.conditions() {
            if key.contains('"') {
                return Err(MemoryError::InvalidMetadata(format!(
                    "filter key {key:?} cannot contain a double quote"
                )));
            }
            // booleans come back from json_extract as 0/1, so compare the JSON type instead
            let function = match value {
                MetadataValue::Bool(_) => "json_type",
                _ => "json_extract",
            };
            clauses.push(format!(
                "{}(r.metadata, ?{}) = ?{}",
                function,
                next_param,
                next_param + 1
            ));
            next_param += 2;
            values.push(SqlValue::Text(format!("$.\"{key}\"")));
            values.push(to_sql_value(value));
        }

        let sql = format!(
            "SELECT r.id, r.content, r.metadata, vec_distance_cosine(v.embedding, ?1) AS distance
             FROM \"{}\" AS r
             JOIN \"{}\" AS v ON v.memory_id = r.id
             WHERE {}
             ORDER BY distance, r.seq
             LIMIT ?2",
            self.records_table,
            self.vectors_table,
            clauses.join(" AND ")
        );
        Ok((sql, values))
    }
}

#[async_trait]
impl VectorBackend for SqliteVecBackend {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn add(
        &self,
        records: Vec<VectorRecord>,
        limit: Option<StorageLimit>,
    ) -> MemoryResult<AddReport> {
        if records.is_empty() {
            return Ok(AddReport::default());
        }

        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            self.ensure_dimension(&record.embedding)?;
            if !seen.insert(record.id.as_str()) {
                return Err(MemoryError::DuplicateId(record.id.clone()));
            }
        }

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        for record in &records {
            if self.id_exists(&tx, &record.id)? {
                return Err(MemoryError::DuplicateId(record.id.clone()));
            }
        }

        let mut evicted = Vec::new();
        if let Some(limit) = limit {
            if records.len() > limit.max_records {
                return Err(MemoryError::CapacityExceeded {
                    max: limit.max_records,
                });
            }
            let current = self.count_in(&tx)? as usize;
            let overflow = (current + records.len()).saturating_sub(limit.max_records);
            if overflow > 0 {
                match limit.policy {
                    OverflowPolicy::Reject => {
                        return Err(MemoryError::CapacityExceeded {
                            max: limit.max_records,
                        });
                    }
                    OverflowPolicy::EvictOldest => {
                        evicted = self.evict_oldest(&tx, overflow)?;
                    }
                }
            }
        }

        let created_at = Utc::now().to_rfc3339();
        for record in &records {
            let metadata_str = serde_json::to_string(&record.metadata)?;
            tx.execute(
                &format!(
                    "INSERT INTO \"{}\" (id, content, metadata, created_at) VALUES (?1, ?2, ?3, ?4)",
                    self.records_table
                ),
                params![record.id, record.content, metadata_str, created_at],
            )?;
            tx.execute(
                &format!(
                    "INSERT INTO \"{}\" (memory_id, embedding) VALUES (?1, ?2)",
                    self.vectors_table
                ),
                params![record.id, embedding_to_json(&record.embedding)],
            )?;
        }

        tx.commit()?;

        Ok(AddReport {
            inserted: records.len(),
            evicted,
        })
    }

    async fn get(&self, id: &str) -> MemoryResult<Option<MemoryRecord>> {
        let conn = self.conn.lock().await;
        let record = conn
            .query_row(
                &format!(
                    "SELECT id, content, metadata FROM \"{}\" WHERE id = ?1",
                    self.records_table
                ),
                params![id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    async fn delete(&self, id: &str) -> MemoryResult<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let deleted = self.delete_in(&tx, id)?;
        tx.commit()?;
        Ok(deleted)
    }

    async fn query(
        &self,
        embedding: &[f32],
        n_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> MemoryResult<Vec<Candidate>> {
        if n_results == 0 {
            return Ok(Vec::new());
        }
        self.ensure_dimension(embedding)?;

        let k = n_results.min(MAX_QUERY_RESULTS);
        if k < n_results {
            tracing::debug!(
                target: MEMORY_LOG_TARGET,
                "Capping n_results {} to {}",
                n_results,
                MAX_QUERY_RESULTS
            );
        }

        let embedding_json = embedding_to_json(embedding);
        let conn = self.conn.lock().await;

        let rows = match filter.filter(|f| !f.is_empty()) {
            None => {
                let mut stmt = conn.prepare(&self.knn_sql())?;
                let rows = stmt
                    .query_map(params![embedding_json, k as i64], row_to_candidate)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            Some(filter) => {
                let (sql, filter_values) = self.filtered_sql(filter)?;
                let mut values = vec![SqlValue::Text(embedding_json), SqlValue::Integer(k as i64)];
                values.extend(filter_values);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(values), row_to_candidate)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };

        Ok(rows)
    }

    async fn list(&self) -> MemoryResult<Vec<MemoryRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, content, metadata FROM \"{}\" ORDER BY seq ASC",
            self.records_table
        ))?;
        let records = stmt
            .query_map([], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    async fn reset(&self) -> MemoryResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        self.drop_collection_tables(&tx)?;
        self.create_collection_tables(&tx)?;
        tx.commit()?;
        Ok(())
    }

    async fn count(&self) -> MemoryResult<u64> {
        let conn = self.conn.lock().await;
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM \"{}\"", self.records_table),
            [],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }
}

fn embedding_to_json(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

fn to_sql_value(value: &MetadataValue) -> SqlValue {
    match value {
        MetadataValue::String(s) => SqlValue::Text(s.clone()),
        MetadataValue::Integer(i) => SqlValue::Integer(*i),
        MetadataValue::Float(f) => SqlValue::Real(*f),
        MetadataValue::Bool(b) => SqlValue::Text(b.to_string()),
    }
}

/// Convert a database row to a MemoryRecord
fn row_to_record(row: &Row) -> Result<MemoryRecord, rusqlite::Error> {
    let id: String = row.get(0)?;
    let content: String = row.get(1)?;
    let metadata_str: String = row.get(2)?;

    let metadata: Metadata = serde_json::from_str(&metadata_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(MemoryRecord {
        id,
        content,
        metadata,
        relevance: None,
    })
}

fn row_to_candidate(row: &Row) -> Result<Candidate, rusqlite::Error> {
    let record = row_to_record(row)?;
    let distance: Option<f64> = row.get(3)?;
    Ok(Candidate { record, distance })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIM: usize = 4;

    async fn setup_test_db() -> (SqliteVecBackend, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test_memory.db");
        let db = SqliteVecBackend::open(&db_path, "test_memories", DIM, "test-model")
            .await
            .unwrap();
        (db, temp_dir)
    }

    fn record(id: &str, content: &str, metadata: Metadata, embedding: [f32; DIM]) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            content: content.to_string(),
            metadata,
            embedding: embedding.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_init_schema() {
        let (db, _temp) = setup_test_db().await;
        assert_eq!(db.count().await.unwrap(), 0);
        assert!(db.list().await.unwrap().is_empty());
        assert_eq!(db.collection(), "test_memories");
        assert_eq!(db.dimension(), DIM);
    }

    #[tokio::test]
    async fn test_store_and_retrieve_record() {
        let (db, _temp) = setup_test_db().await;

        let metadata = Metadata::from([("cat", "x")]).with("n", 3);
        db.add(
            vec![record("m1", "Test content", metadata.clone(), [1.0, 0.0, 0.0, 0.0])],
            None,
        )
        .await
        .unwrap();

        let stored = db.get("m1").await.unwrap().unwrap();
        assert_eq!(stored.content, "Test content");
        assert_eq!(stored.metadata, metadata);
        assert!(stored.relevance.is_none());
        assert!(db.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_rejected() {
        let (db, _temp) = setup_test_db().await;
        db.add(
            vec![record("m1", "first", Metadata::new(), [1.0, 0.0, 0.0, 0.0])],
            None,
        )
        .await
        .unwrap();

        let err = db
            .add(
                vec![record("m1", "second", Metadata::new(), [0.0, 1.0, 0.0, 0.0])],
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::DuplicateId(id) if id == "m1"));
        assert_eq!(db.get("m1").await.unwrap().unwrap().content, "first");
    }

    #[tokio::test]
    async fn test_knn_orders_by_distance() {
        let (db, _temp) = setup_test_db().await;
        db.add(
            vec![
                record("far", "far", Metadata::new(), [0.0, 0.0, 1.0, 0.0]),
                record("near", "near", Metadata::new(), [1.0, 0.0, 0.0, 0.0]),
                record("mid", "mid", Metadata::new(), [1.0, 1.0, 0.0, 0.0]),
            ],
            None,
        )
        .await
        .unwrap();

        let hits = db.query(&[1.0, 0.0, 0.0, 0.0], 3, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|c| c.record.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);

        let near = hits[0].distance.unwrap();
        let far = hits[2].distance.unwrap();
        assert!(near.abs() < 1e-5);
        assert!((far - 1.0).abs() < 1e-5);

        let limited = db.query(&[1.0, 0.0, 0.0, 0.0], 1, None).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert!(db.query(&[1.0, 0.0, 0.0, 0.0], 0, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_filtered_query_applies_before_limit() {
        let (db, _temp) = setup_test_db().await;
        db.add(
            vec![
                record("a", "A", Metadata::from([("cat", "x")]), [0.0, 0.0, 1.0, 0.0]),
                record("b", "B", Metadata::from([("cat", "y")]), [1.0, 0.0, 0.0, 0.0]),
                record("c", "C", Metadata::from([("cat", "x")]).with("flag", true), [0.0, 1.0, 0.0, 0.0]),
            ],
            None,
        )
        .await
        .unwrap();

        let filter = MetadataFilter::from([("cat", "x")]);
        let hits = db.query(&[1.0, 0.0, 0.0, 0.0], 2, Some(&filter)).await.unwrap();
        let mut ids: Vec<&str> = hits.iter().map(|c| c.record.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(hits.iter().all(|c| c.distance.is_some()));

        let flagged = MetadataFilter::new().eq("cat", "x").eq("flag", true);
        let hits = db.query(&[1.0, 0.0, 0.0, 0.0], 5, Some(&flagged)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, "c");

        let none = MetadataFilter::from([("cat", "z")]);
        assert!(db.query(&[1.0, 0.0, 0.0, 0.0], 5, Some(&none)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_filter_distinguishes_bool_from_integer() {
        let (db, _temp) = setup_test_db().await;
        db.add(
            vec![
                record("flag", "x", Metadata::new().with("pinned", true), [1.0, 0.0, 0.0, 0.0]),
                record("one", "y", Metadata::new().with("pinned", 1), [1.0, 0.0, 0.0, 0.0]),
                record("float", "z", Metadata::new().with("score", 2.0), [1.0, 0.0, 0.0, 0.0]),
            ],
            None,
        )
        .await
        .unwrap();

        let hits = db
            .query(&[1.0, 0.0, 0.0, 0.0], 5, Some(&MetadataFilter::new().eq("pinned", true)))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, "flag");

        let hits = db
            .query(&[1.0, 0.0, 0.0, 0.0], 5, Some(&MetadataFilter::new().eq("score", 2)))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, "float");
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let (db, _temp) = setup_test_db().await;
        db.add(
            vec![record("m1", "x", Metadata::new(), [1.0, 0.0, 0.0, 0.0])],
            None,
        )
        .await
        .unwrap();

        assert!(db.delete("m1").await.unwrap());
        assert!(!db.delete("m1").await.unwrap());
        assert_eq!(db.count().await.unwrap(), 0);
        assert!(db.query(&[1.0, 0.0, 0.0, 0.0], 5, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_evict_oldest_keeps_newest() {
        let (db, _temp) = setup_test_db().await;
        let limit = Some(StorageLimit {
            max_records: 2,
            policy: OverflowPolicy::EvictOldest,
        });

        for id in ["m1", "m2", "m3"] {
            db.add(vec![record(id, id, Metadata::new(), [1.0, 0.0, 0.0, 0.0])], limit)
                .await
                .unwrap();
        }

        let ids: Vec<String> = db.list().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["m2".to_string(), "m3".to_string()]);
    }

    #[tokio::test]
    async fn test_reject_policy_writes_nothing() {
        let (db, _temp) = setup_test_db().await;
        let limit = Some(StorageLimit {
            max_records: 1,
            policy: OverflowPolicy::Reject,
        });

        db.add(vec![record("m1", "x", Metadata::new(), [1.0, 0.0, 0.0, 0.0])], limit)
            .await
            .unwrap();
        let err = db
            .add(vec![record("m2", "y", Metadata::new(), [1.0, 0.0, 0.0, 0.0])], limit)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::CapacityExceeded { max: 1 }));
        assert_eq!(db.count().await.unwrap(), 1);
        assert!(db.get("m2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_empties_collection() {
        let (db, _temp) = setup_test_db().await;
        db.add(
            vec![
                record("m1", "x", Metadata::new(), [1.0, 0.0, 0.0, 0.0]),
                record("m2", "y", Metadata::new(), [0.0, 1.0, 0.0, 0.0]),
            ],
            None,
        )
        .await
        .unwrap();

        db.reset().await.unwrap();
        assert_eq!(db.count().await.unwrap(), 0);
        assert!(db.list().await.unwrap().is_empty());

        db.add(
            vec![record("m1", "again", Metadata::new(), [1.0, 0.0, 0.0, 0.0])],
            None,
        )
        .await
        .unwrap();
        assert_eq!(db.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reopen_with_other_dimension_fails() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test_memory.db");
        {
            SqliteVecBackend::open(&db_path, "shared", DIM, "test-model")
                .await
                .unwrap();
        }

        let err = SqliteVecBackend::open(&db_path, "shared", DIM * 2, "test-model")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MemoryError::InvalidConfig(_)));

        let other = SqliteVecBackend::open(&db_path, "other", DIM * 2, "test-model")
            .await
            .unwrap();
        assert_eq!(other.dimension(), DIM * 2);
    }

    #[tokio::test]
    async fn test_collection_names_ignore_case() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test_memory.db");

        let mixed = SqliteVecBackend::open(&db_path, "Notes", DIM, "test-model")
            .await
            .unwrap();
        assert_eq!(mixed.collection(), "notes");
        mixed
            .add(
                vec![record("m1", "x", Metadata::new(), [1.0, 0.0, 0.0, 0.0])],
                None,
            )
            .await
            .unwrap();

        let lower = SqliteVecBackend::open(&db_path, "notes", DIM, "test-model")
            .await
            .unwrap();
        assert_eq!(lower.count().await.unwrap(), 1);
        assert!(lower.get("m1").await.unwrap().is_some());

        let err = SqliteVecBackend::open(&db_path, "NOTES", DIM * 2, "other-model")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MemoryError::InvalidConfig(_)));

        let err = SqliteVecBackend::open(&db_path, "NOTES", DIM, "other-model")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MemoryError::InvalidConfig(_)));
        assert_eq!(mixed.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_rejected() {
        let (db, _temp) = setup_test_db().await;
        let err = db
            .add(
                vec![VectorRecord {
                    id: "m1".to_string(),
                    content: "x".to_string(),
                    metadata: Metadata::new(),
                    embedding: vec![1.0; DIM + 1],
                }],
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Embedding(_)));
    }
}
