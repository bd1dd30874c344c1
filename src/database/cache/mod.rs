
use chrono::Utc;
use sqlx::Row;
use tracing::{debug, warn};

use crate::database::Database;
use crate::embeddings::ModelId;
use crate::{LensError, Result};

/// Outcome of a cache write. Writes never overwrite: embedding identical
/// text under one model must be deterministic, so a differing vector for
/// an existing key is a correctness violation, not an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    AlreadyPresent,
    Conflict,
}

/// Content-addressed embedding cache, shared across issues: the key is
/// `(content_hash, model_id)`, so identical text re-uses its vector no
/// matter which issue produced it.
#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    database: Database,
}

impl EmbeddingCache {
    #[inline]
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Look up the cached vector for `(content_hash, model)`.
    #[inline]
    pub async fn get(&self, content_hash: &str, model: &ModelId) -> Result<Option<Vec<f32>>> {
        let model_str = model.to_string();
        let row = sqlx::query(
            "SELECT vector FROM embedding_cache WHERE content_hash = ? AND model_id = ?",
        )
        .bind(content_hash)
        .bind(&model_str)
        .fetch_optional(self.database.pool())
        .await
        .map_err(|e| LensError::Database(format!("cache lookup failed: {e}")))?;

        match row {
            Some(row) => {
                let blob: Vec<u8> = row
                    .try_get("vector")
                    .map_err(|e| LensError::Database(format!("cache row malformed: {e}")))?;
                Ok(Some(decode_vector(&blob, model)?))
            }
            None => Ok(None),
        }
    }

    /// Insert a vector for `(content_hash, model)`. Idempotent for an
    /// identical vector; a differing vector is rejected and logged, and
    /// the originally cached value stays authoritative.
    #[inline]
    pub async fn put(
        &self,
        content_hash: &str,
        model: &ModelId,
        vector: &[f32],
    ) -> Result<PutOutcome> {
        if vector.len() != model.dimension() {
            return Err(LensError::Database(format!(
                "refusing to cache a {}-dimensional vector under model '{model}'",
                vector.len()
            )));
        }

        if let Some(existing) = self.get(content_hash, model).await? {
            if existing == vector {
                return Ok(PutOutcome::AlreadyPresent);
            }
            warn!(
                content_hash,
                model = %model,
                "cache write disagrees with existing vector; keeping the original"
            );
            return Ok(PutOutcome::Conflict);
        }

        let model_str = model.to_string();
        let dimension = model.dimension() as i64;
        let blob = encode_vector(vector);
        let created_at = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "INSERT OR IGNORE INTO embedding_cache \
             (content_hash, model_id, dimension, vector, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(content_hash)
        .bind(&model_str)
        .bind(dimension)
        .bind(&blob)
        .bind(&created_at)
        .execute(self.database.pool())
        .await
        .map_err(|e| LensError::Database(format!("cache insert failed: {e}")))?;

        if result.rows_affected() == 0 {
            // Lost a race with a concurrent writer; defer to whatever won.
            let existing = self.get(content_hash, model).await?;
            return Ok(match existing {
                Some(v) if v == vector => PutOutcome::AlreadyPresent,
                _ => PutOutcome::Conflict,
            });
        }

        debug!(content_hash, model = %model_str, "cached embedding");
        Ok(PutOutcome::Inserted)
    }

    /// Number of cached entries across all models.
    #[inline]
    pub async fn entry_count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM embedding_cache")
            .fetch_one(self.database.pool())
            .await
            .map_err(|e| LensError::Database(format!("cache count failed: {e}")))?;

        let n: i64 = row
            .try_get("n")
            .map_err(|e| LensError::Database(format!("cache count malformed: {e}")))?;
        Ok(n.unsigned_abs())
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn decode_vector(blob: &[u8], model: &ModelId) -> Result<Vec<f32>> {
    if blob.len() != model.dimension() * 4 {
        return Err(LensError::Database(format!(
            "cached vector has {} bytes, expected {} for model '{model}'",
            blob.len(),
            model.dimension() * 4
        )));
    }

    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
