//! Vector index abstraction and implementations.
//!
//! A [`VectorIndex`] stores `(chunk, vector, metadata)` triples keyed by
//! `(file_path, chunk_id)` and answers nearest-neighbour queries by cosine distance
//! (`1 - cos`, ascending). Writes are upserts, so re-submitting a batch after
//! a partial failure never duplicates entries. Chunk ids derive from the
//! content hash, so two files with identical bytes share ids; the file path
//! keeps their entries apart.
//!
//! Metadata values must be primitive (string, number, boolean, null).
//! A batch carrying a list or map is rejected whole with
//! [`IndexError::InvalidMetadata`] and nothing from it is written.
//!
//! - **[`SqliteVectorIndex`]**: persistent, one table in `<storage>/vectors.sqlite`.
//! - **[`InMemoryVectorIndex`]**: for tests and ephemeral runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::db;
use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use crate::error::IndexError;
use crate::models::{DocumentChunk, Metadata};
use crate::sanitize::first_non_primitive;

/// One nearest-neighbour result.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub file_path: String,
    pub chunk_id: String,
    pub text: String,
    pub metadata: Metadata,
    /// Cosine distance; lower is more similar.
    pub distance: f64,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Whether an index has been created at this location.
    async fn exists(&self) -> Result<bool, IndexError>;

    /// Create the index seeded with a first batch.
    async fn create_with_documents(
        &self,
        chunks: &[DocumentChunk],
        vectors: &[Vec<f32>],
    ) -> Result<(), IndexError>;

    /// Upsert a batch into an existing index.
    async fn append(&self, chunks: &[DocumentChunk], vectors: &[Vec<f32>])
        -> Result<(), IndexError>;

    /// Up to `k` hits ordered by ascending distance.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>, IndexError>;

    async fn count(&self) -> Result<usize, IndexError>;

    /// Drop every entry and the index itself.
    async fn reset(&self) -> Result<(), IndexError>;
}

/// Reject mismatched lengths and non-primitive metadata before any write.
pub fn validate_batch(chunks: &[DocumentChunk], vectors: &[Vec<f32>]) -> Result<(), IndexError> {
    if chunks.len() != vectors.len() {
        return Err(IndexError::Storage(format!(
            "{} chunks but {} vectors",
            chunks.len(),
            vectors.len()
        )));
    }
    for chunk in chunks {
        if let Some((key, kind)) = first_non_primitive(&chunk.metadata) {
            return Err(IndexError::InvalidMetadata {
                key: key.to_string(),
                kind: kind.to_string(),
            });
        }
    }
    Ok(())
}

fn rank(mut hits: Vec<IndexHit>, k: usize) -> Vec<IndexHit> {
    hits.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
            .then_with(|| a.file_path.cmp(&b.file_path))
    });
    hits.truncate(k);
    hits
}

// ============ SQLite ============

pub struct SqliteVectorIndex {
    path: PathBuf,
    pool: Mutex<Option<SqlitePool>>,
}

impl SqliteVectorIndex {
    pub fn new(storage_dir: &Path) -> Self {
        Self {
            path: storage_dir.join(db::INDEX_FILE),
            pool: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Connect on first use and ensure the schema exists.
    async fn pool(&self) -> Result<SqlitePool, IndexError> {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }
        let pool = db::connect(&self.path)
            .await
            .map_err(|e| IndexError::Unavailable(format!("{}: {:#}", self.path.display(), e)))?;
        db::run_migrations(&pool)
            .await
            .map_err(|e| IndexError::Unavailable(format!("{:#}", e)))?;
        *guard = Some(pool.clone());
        Ok(pool)
    }

    async fn write(&self, chunks: &[DocumentChunk], vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        validate_batch(chunks, vectors)?;
        let pool = self.pool().await?;
        let mut tx = pool.begin().await.map_err(storage)?;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            let metadata_json = serde_json::to_string(&chunk.metadata).map_err(storage)?;
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, file_path, chunk_index, text, metadata_json, dims, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(file_path, chunk_id) DO UPDATE SET
                    chunk_index = excluded.chunk_index,
                    text = excluded.text,
                    metadata_json = excluded.metadata_json,
                    dims = excluded.dims,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.file_path)
            .bind(chunk.chunk_index as i64)
            .bind(&chunk.text)
            .bind(&metadata_json)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        }
        tx.commit().await.map_err(storage)?;
        debug!(chunks = chunks.len(), "vector index upsert");
        Ok(())
    }
}

/// A corrupt row still ranks; its hit just carries no metadata.
fn parse_metadata(chunk_id: &str, json: &str) -> Metadata {
    match serde_json::from_str(json) {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!(chunk_id, error = %e, "unreadable metadata in vector index");
            Metadata::new()
        }
    }
}

fn storage(e: impl std::fmt::Display) -> IndexError {
    IndexError::Storage(e.to_string())
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn exists(&self) -> Result<bool, IndexError> {
        if !self.path.exists() {
            return Ok(false);
        }
        let pool = self.pool().await?;
        db::table_exists(&pool).await.map_err(storage)
    }

    async fn create_with_documents(
        &self,
        chunks: &[DocumentChunk],
        vectors: &[Vec<f32>],
    ) -> Result<(), IndexError> {
        self.write(chunks, vectors).await
    }

    async fn append(
        &self,
        chunks: &[DocumentChunk],
        vectors: &[Vec<f32>],
    ) -> Result<(), IndexError> {
        self.write(chunks, vectors).await
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>, IndexError> {
        if !self.exists().await? {
            return Err(IndexError::Unavailable(format!(
                "no index at {}",
                self.path.display()
            )));
        }
        let pool = self.pool().await?;
        let rows = sqlx::query(
            "SELECT file_path, chunk_id, text, metadata_json, embedding FROM chunk_vectors",
        )
            .fetch_all(&pool)
            .await
            .map_err(storage)?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.try_get("embedding").map_err(storage)?;
            let metadata_json: String = row.try_get("metadata_json").map_err(storage)?;
            let chunk_id: String = row.try_get("chunk_id").map_err(storage)?;
            let metadata = parse_metadata(&chunk_id, &metadata_json);
            hits.push(IndexHit {
                file_path: row.try_get("file_path").map_err(storage)?,
                chunk_id,
                text: row.try_get("text").map_err(storage)?,
                metadata,
                distance: cosine_distance(vector, &blob_to_vec(&blob)),
            });
        }
        Ok(rank(hits, k))
    }

    async fn count(&self) -> Result<usize, IndexError> {
        if !self.exists().await? {
            return Ok(0);
        }
        let pool = self.pool().await?;
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&pool)
            .await
            .map_err(storage)?;
        Ok(n as usize)
    }

    async fn reset(&self) -> Result<(), IndexError> {
        if let Some(pool) = self.pool.lock().await.take() {
            pool.close().await;
        }
        for suffix in ["", "-wal", "-shm"] {
            let file = PathBuf::from(format!("{}{}", self.path.display(), suffix));
            match std::fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(storage(e)),
            }
        }
        Ok(())
    }
}

// ============ In-memory ============

struct StoredVector {
    text: String,
    metadata: Metadata,
    vector: Vec<f32>,
}

/// Brute-force in-memory index. Same contract as [`SqliteVectorIndex`].
#[derive(Default)]
pub struct InMemoryVectorIndex {
    entries: RwLock<BTreeMap<(String, String), StoredVector>>,
    created: AtomicBool,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored chunk ids, ordered by file path then chunk id.
    pub fn chunk_ids(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|e| e.keys().map(|(_, id)| id.clone()).collect())
            .unwrap_or_default()
    }

    fn write(&self, chunks: &[DocumentChunk], vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        validate_batch(chunks, vectors)?;
        let mut entries = self
            .entries
            .write()
            .map_err(|e| IndexError::Storage(e.to_string()))?;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            entries.insert(
                (chunk.file_path.clone(), chunk.chunk_id.clone()),
                StoredVector {
                    text: chunk.text.clone(),
                    metadata: chunk.metadata.clone(),
                    vector: vector.clone(),
                },
            );
        }
        self.created.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn exists(&self) -> Result<bool, IndexError> {
        Ok(self.created.load(Ordering::SeqCst))
    }

    async fn create_with_documents(
        &self,
        chunks: &[DocumentChunk],
        vectors: &[Vec<f32>],
    ) -> Result<(), IndexError> {
        self.write(chunks, vectors)
    }

    async fn append(
        &self,
        chunks: &[DocumentChunk],
        vectors: &[Vec<f32>],
    ) -> Result<(), IndexError> {
        self.write(chunks, vectors)
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>, IndexError> {
        if !self.created.load(Ordering::SeqCst) {
            return Err(IndexError::Unavailable("index not created".to_string()));
        }
        let entries = self
            .entries
            .read()
            .map_err(|e| IndexError::Storage(e.to_string()))?;
        let hits = entries
            .iter()
            .map(|((path, id), stored)| IndexHit {
                file_path: path.clone(),
                chunk_id: id.clone(),
                text: stored.text.clone(),
                metadata: stored.metadata.clone(),
                distance: cosine_distance(vector, &stored.vector),
            })
            .collect();
        Ok(rank(hits, k))
    }

    async fn count(&self) -> Result<usize, IndexError> {
        self.entries
            .read()
            .map(|e| e.len())
            .map_err(|e| IndexError::Storage(e.to_string()))
    }

    async fn reset(&self) -> Result<(), IndexError> {
        self.entries
            .write()
            .map_err(|e| IndexError::Storage(e.to_string()))?
            .clear();
        self.created.store(false, Ordering::SeqCst);
        Ok(())
    }
}
