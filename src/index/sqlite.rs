//! SQLite-backed [`VectorIndex`].
//!
//! One table, `records`, keyed by chunk id. Vectors are stored as
//! little-endian f32 BLOBs and scored in Rust.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;

use super::{check_dims, rank_hits, Fingerprint, IndexError, IndexHit, IndexedId, VectorIndex};
use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use crate::models::{EmbeddingRecord, Metadata};

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    /// Open (creating if needed) the index database at `path`.
    pub async fn open(path: &Path) -> Result<Self, IndexError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                IndexError::Unavailable(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                content_hash TEXT NOT NULL,
                model TEXT NOT NULL,
                dims INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn stored_dims(&self) -> Result<Option<usize>, IndexError> {
        let dims: Option<i64> = sqlx::query_scalar("SELECT dims FROM records LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(dims.map(|d| d as usize))
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert(&self, records: &[EmbeddingRecord]) -> Result<usize, IndexError> {
        if records.is_empty() {
            return Ok(0);
        }
        check_dims(records, self.stored_dims().await?)?;

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for record in records {
            let metadata_json = serde_json::to_string(&record.metadata).map_err(|e| {
                IndexError::Corrupt {
                    id: record.id.clone(),
                    reason: e.to_string(),
                }
            })?;
            sqlx::query(
                r#"
                INSERT INTO records (id, text, metadata_json, content_hash, model, dims, embedding, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    text = excluded.text,
                    metadata_json = excluded.metadata_json,
                    content_hash = excluded.content_hash,
                    model = excluded.model,
                    dims = excluded.dims,
                    embedding = excluded.embedding,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&record.id)
            .bind(&record.text)
            .bind(&metadata_json)
            .bind(&record.content_hash)
            .bind(&record.model)
            .bind(record.vector.len() as i64)
            .bind(vec_to_blob(&record.vector))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(records.len())
    }

    async fn fingerprints(&self, ids: &[String]) -> Result<HashMap<String, Fingerprint>, IndexError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let rows = sqlx::query("SELECT id, content_hash, model FROM records")
            .fetch_all(&self.pool)
            .await?;

        let mut prints = HashMap::new();
        for row in rows {
            let id: String = row.get("id");
            if wanted.contains(id.as_str()) {
                prints.insert(
                    id,
                    Fingerprint {
                        content_hash: row.get("content_hash"),
                        model: row.get("model"),
                    },
                );
            }
        }
        Ok(prints)
    }

    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT id, text, metadata_json, dims, embedding FROM records")
            .fetch_all(&self.pool)
            .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let dims: i64 = row.get("dims");
            let blob: Vec<u8> = row.get("embedding");
            if blob.len() != dims as usize * 4 {
                return Err(IndexError::Corrupt {
                    id,
                    reason: format!("embedding is {} bytes for {} dims", blob.len(), dims),
                });
            }
            if dims as usize != query.len() {
                return Err(IndexError::DimensionMismatch {
                    id: "<query>".to_string(),
                    expected: dims as usize,
                    actual: query.len(),
                });
            }
            let metadata_json: String = row.get("metadata_json");
            let metadata: Metadata =
                serde_json::from_str(&metadata_json).map_err(|e| IndexError::Corrupt {
                    id: id.clone(),
                    reason: e.to_string(),
                })?;
            let vector = blob_to_vec(&blob);
            hits.push(IndexHit {
                distance: cosine_distance(query, &vector),
                text: row.get("text"),
                metadata,
                id,
            });
        }
        Ok(rank_hits(hits, k))
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn ids(&self) -> Result<Vec<IndexedId>, IndexError> {
        let rows = sqlx::query(
            "SELECT id, json_extract(metadata_json, '$.source_file') AS source_file FROM records ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| IndexedId {
                id: row.get("id"),
                source_file: row.get("source_file"),
            })
            .collect())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, IndexError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut removed = 0;
        let mut tx = self.pool.begin().await?;
        for id in ids {
            let result = sqlx::query("DELETE FROM records WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            removed += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn clear(&self) -> Result<(), IndexError> {
        sqlx::query("DELETE FROM records")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
