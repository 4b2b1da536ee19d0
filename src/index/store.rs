//! Embedding-backed chunk store, partitioned into per-user collections.
//!
//! One SQLite file holds every collection; the `collection` column is the
//! isolation boundary and every query filters on it. Embeddings are stored
//! as little-endian f32 blobs. Retrieval scans the collection's rows,
//! scores by cosine similarity, and selects the final set with maximal
//! marginal relevance so near-duplicate chunks don't crowd out coverage.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

const SCHEMA_VERSION: i64 = 1;

/// Deterministic per-user collection name. User ids are the only input so
/// the same user always lands in the same partition.
pub fn collection_name(user_id: i64) -> String {
    format!("gmail_user_{user_id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub subject: String,
    pub from: String,
    pub thread_id: String,
}

/// A chunk ready to be written: text + parent metadata + embedding.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
}

/// A chunk as read back out (embedding omitted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: StoredChunk,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct VectorStore {
    db_path: PathBuf,
}

impl VectorStore {
    pub fn open(db_path: &Path) -> Result<Self, AppError> {
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.init_db()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Append the records to `collection`. No dedup here — callers pass only
    /// not-yet-indexed content (the id cache enforces that upstream).
    pub fn upsert(&self, collection: &str, records: &[ChunkRecord]) -> Result<usize, AppError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.open_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Store(format!("vectors: begin tx: {e}")))?;

        for record in records {
            let metadata_json = serde_json::to_string(&record.metadata)
                .map_err(|e| AppError::Store(format!("vectors: serialize metadata: {e}")))?;
            tx.execute(
                "INSERT INTO chunks (id, collection, text, metadata, embedding) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id,
                    collection,
                    record.text,
                    metadata_json,
                    embedding_to_bytes(&record.embedding),
                ],
            )
            .map_err(|e| AppError::Store(format!("vectors: insert chunk: {e}")))?;
        }

        tx.commit()
            .map_err(|e| AppError::Store(format!("vectors: commit upsert: {e}")))?;
        Ok(records.len())
    }

    pub fn count(&self, collection: &str) -> Result<usize, AppError> {
        let conn = self.open_conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM chunks WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            )
            .map_err(|e| AppError::Store(format!("vectors: count {collection}: {e}")))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self, collection: &str) -> Result<bool, AppError> {
        Ok(self.count(collection)? == 0)
    }

    /// All chunks of a collection in insertion order, bounded by `limit`.
    /// Insertion order makes repeated listings byte-identical.
    pub fn list(&self, collection: &str, limit: usize) -> Result<Vec<StoredChunk>, AppError> {
        let conn = self.open_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, text, metadata FROM chunks WHERE collection = ?1 ORDER BY rowid LIMIT ?2",
            )
            .map_err(|e| AppError::Store(format!("vectors: prepare list: {e}")))?;

        let rows = stmt
            .query_map(params![collection, limit as i64], |row| {
                let metadata_json: String = row.get(2)?;
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, metadata_json))
            })
            .map_err(|e| AppError::Store(format!("vectors: query list: {e}")))?;

        let mut chunks = Vec::new();
        for row in rows {
            let (id, text, metadata_json) =
                row.map_err(|e| AppError::Store(format!("vectors: map list row: {e}")))?;
            chunks.push(StoredChunk {
                id,
                text,
                metadata: parse_metadata(&metadata_json),
            });
        }
        Ok(chunks)
    }

    /// Top-`top_k` chunks for `query` from `collection`.
    ///
    /// Scans the collection, ranks by cosine, keeps the best `candidate_pool`
    /// and applies MMR with `mmr_lambda` (1.0 = pure relevance, 0.0 = pure
    /// diversity) to pick the final set.
    pub fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        candidate_pool: usize,
        mmr_lambda: f32,
    ) -> Result<Vec<ScoredChunk>, AppError> {
        if top_k == 0 || query.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.open_conn()?;
        let mut stmt = conn
            .prepare("SELECT id, text, metadata, embedding FROM chunks WHERE collection = ?1 ORDER BY rowid")
            .map_err(|e| AppError::Store(format!("vectors: prepare search: {e}")))?;

        let rows = stmt
            .query_map(params![collection], |row| {
                let metadata_json: String = row.get(2)?;
                let blob: Vec<u8> = row.get(3)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    metadata_json,
                    blob,
                ))
            })
            .map_err(|e| AppError::Store(format!("vectors: query search: {e}")))?;

        let mut candidates = Vec::new();
        for row in rows {
            let (id, text, metadata_json, blob) =
                row.map_err(|e| AppError::Store(format!("vectors: map search row: {e}")))?;
            let embedding = embedding_from_bytes(&blob);
            let score = cosine(query, &embedding);
            candidates.push(Candidate {
                chunk: StoredChunk {
                    id,
                    text,
                    metadata: parse_metadata(&metadata_json),
                },
                embedding,
                score,
            });
        }

        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(candidate_pool.max(top_k));

        Ok(mmr_select(candidates, top_k, mmr_lambda))
    }

    fn init_db(&self) -> Result<(), AppError> {
        let conn = self.open_conn()?;
        let version: i64 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .map_err(|e| AppError::Store(format!("vectors: read schema version: {e}")))?;

        if version == 0 {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS chunks (
                    id TEXT PRIMARY KEY,
                    collection TEXT NOT NULL,
                    text TEXT NOT NULL,
                    metadata TEXT NOT NULL,
                    embedding BLOB NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_chunks_collection ON chunks(collection);

                PRAGMA user_version = 1;
                ",
            )
            .map_err(|e| AppError::Store(format!("vectors: initialize schema: {e}")))?;
            return Ok(());
        }

        if version != SCHEMA_VERSION {
            return Err(AppError::Store(format!(
                "vectors: unsupported schema version {version}, expected {SCHEMA_VERSION}"
            )));
        }

        Ok(())
    }

    fn open_conn(&self) -> Result<Connection, AppError> {
        let conn = Connection::open(&self.db_path).map_err(|e| {
            AppError::Store(format!("vectors: open {}: {e}", self.db_path.display()))
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| AppError::Store(format!("vectors: set journal_mode WAL: {e}")))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|e| AppError::Store(format!("vectors: set busy_timeout: {e}")))?;
        Ok(conn)
    }
}

struct Candidate {
    chunk: StoredChunk,
    embedding: Vec<f32>,
    score: f32,
}

fn parse_metadata(json: &str) -> ChunkMetadata {
    serde_json::from_str(json).unwrap_or(ChunkMetadata {
        subject: String::new(),
        from: String::new(),
        thread_id: String::new(),
    })
}

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn embedding_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity; mismatched or zero-length vectors score 0.
fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Greedy maximal-marginal-relevance selection over cosine-ranked candidates.
fn mmr_select(mut candidates: Vec<Candidate>, top_k: usize, lambda: f32) -> Vec<ScoredChunk> {
    let mut selected: Vec<Candidate> = Vec::new();

    while selected.len() < top_k && !candidates.is_empty() {
        let mut best_idx = 0;
        let mut best_value = f32::NEG_INFINITY;

        for (idx, cand) in candidates.iter().enumerate() {
            let max_sim_to_selected = selected
                .iter()
                .map(|s| cosine(&cand.embedding, &s.embedding))
                .fold(0.0f32, f32::max);
            let value = lambda * cand.score - (1.0 - lambda) * max_sim_to_selected;
            if value > best_value {
                best_value = value;
                best_idx = idx;
            }
        }

        selected.push(candidates.swap_remove(best_idx));
    }

    selected
        .into_iter()
        .map(|c| ScoredChunk {
            score: c.score,
            chunk: c.chunk,
        })
        .collect()
}
