
pub mod store;

use std::cmp::Ordering;

use tracing::debug;

use crate::embeddings::{Chunk, ModelId};
use crate::{LensError, Result};

pub use store::{FileVectorSource, IndexReader, VectorSource, read_index, write_index};

/// A chunk returned from similarity search, with its cosine score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Per-issue searchable store: parallel chunk metadata and a row-major
/// `f32` matrix, every row produced by the same embedding model.
///
/// Positions are stable for the index's lifetime; `append` only ever adds
/// rows at the end. Switching models invalidates the whole index; it must
/// be rebuilt, never patched.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    model_id: ModelId,
    chunks: Vec<Chunk>,
    vectors: Vec<f32>,
}

impl VectorIndex {
    /// Create an empty index for `model_id`.
    #[inline]
    pub fn empty(model_id: ModelId) -> Self {
        Self {
            model_id,
            chunks: Vec::new(),
            vectors: Vec::new(),
        }
    }

    /// Build a fresh index from a complete chunk+vector set, replacing
    /// whatever existed before.
    #[inline]
    pub fn build(model_id: ModelId, entries: Vec<(Chunk, Vec<f32>)>) -> Result<Self> {
        let mut index = Self::empty(model_id);
        index.append(entries)?;
        Ok(index)
    }

    /// Add entries to the end of the index. Every vector must match the
    /// model's declared dimension; a mismatch rejects the whole call.
    #[inline]
    pub fn append(&mut self, entries: Vec<(Chunk, Vec<f32>)>) -> Result<()> {
        let dimension = self.model_id.dimension();
        for (chunk, vector) in &entries {
            if vector.len() != dimension {
                return Err(LensError::ModelMismatch {
                    active: self.model_id.to_string(),
                    requested: format!(
                        "{}-dimensional vector for chunk '{}'",
                        vector.len(),
                        chunk.chunk_id
                    ),
                });
            }
        }

        self.chunks.reserve(entries.len());
        self.vectors.reserve(entries.len() * dimension);
        for (chunk, vector) in entries {
            self.chunks.push(chunk);
            self.vectors.extend_from_slice(&vector);
        }

        debug!(len = self.chunks.len(), "index extended");
        Ok(())
    }

    #[inline]
    pub fn model_id(&self) -> &ModelId {
        &self.model_id
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[inline]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f32] {
        let dimension = self.model_id.dimension();
        &self.vectors[i * dimension..(i + 1) * dimension]
    }

    /// Top-k cosine-similarity search. Results are ordered by descending
    /// score, ties broken by insertion order (earlier chunk wins). `k`
    /// larger than the index returns everything; an empty index returns an
    /// empty result, never an error.
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let ranked = rank_rows(
            query,
            self.model_id.dimension(),
            k,
            self.len(),
            |i| Ok(self.row(i).to_vec()),
        )?;

        Ok(ranked
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.chunks[i].clone(),
                score,
            })
            .collect())
    }
}

/// Cosine similarity with an explicit zero-norm guard: a zero vector is
/// similar to nothing, including itself.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Score every row against `query` and return the top `k` as
/// `(row, score)`, descending, insertion order breaking ties. Shared by
/// the in-memory index and the streaming file reader.
pub(crate) fn rank_rows(
    query: &[f32],
    dimension: usize,
    k: usize,
    rows: usize,
    mut row: impl FnMut(usize) -> Result<Vec<f32>>,
) -> Result<Vec<(usize, f32)>> {
    if k == 0 {
        return Err(LensError::Config(
            "top_k must be at least 1".to_string(),
        ));
    }
    if query.len() != dimension {
        return Err(LensError::ModelMismatch {
            active: format!("{dimension}-dimensional index"),
            requested: format!("{}-dimensional query vector", query.len()),
        });
    }
    if rows == 0 {
        return Ok(Vec::new());
    }

    let mut scored: Vec<(usize, f32)> = Vec::with_capacity(rows);
    for i in 0..rows {
        let v = row(i)?;
        scored.push((i, cosine_similarity(query, &v)));
    }

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(k);

    Ok(scored)
}
