
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::embeddings::{ModelId, OllamaProvider, TokenHashProvider};
use crate::{LensError, Result};

/// A vector-generation backend. One call embeds one batch, all-or-nothing:
/// implementations never return partial results for a batch.
pub trait EmbeddingProvider: Send + Sync {
    fn model_id(&self) -> &ModelId;

    /// Output dimension, as declared by the model identity.
    fn dimension(&self) -> usize {
        self.model_id().dimension()
    }

    /// Embed every text in the batch, in order. The returned vectors have
    /// the same length as the input and each has `dimension()` entries.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Resolve a model identity to its backend. Provider selection is a
/// runtime value keyed on the identity's provider segment.
#[inline]
pub fn provider_for(
    model: &ModelId,
    config: &EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    match model.provider() {
        "ollama" => Ok(Box::new(OllamaProvider::new(model.clone(), config)?)),
        "local" => Ok(Box::new(TokenHashProvider::new(model.clone()))),
        other => Err(LensError::Config(format!(
            "unknown embedding provider '{other}' in model id '{model}' (known: ollama, local)"
        ))),
    }
}

/// Check a provider response against the request: same count, declared
/// dimension on every vector. Violations are provider errors, never
/// silently coerced.
#[inline]
pub fn verify_batch(model: &ModelId, requested: usize, vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != requested {
        return Err(LensError::Provider(format!(
            "provider for '{model}' returned {} vectors for {requested} texts",
            vectors.len()
        )));
    }
    for vector in &vectors {
        if vector.len() != model.dimension() {
            return Err(LensError::Provider(format!(
                "provider for '{model}' returned a {}-dimensional vector, expected {}",
                vector.len(),
                model.dimension()
            )));
        }
    }
    Ok(vectors)
}

/// One batch that exhausted its retries: the positions (into the original
/// text slice) that remain unembedded, and the terminal error.
#[derive(Debug)]
pub struct FailedBatch {
    pub indices: Vec<usize>,
    pub error: String,
}

/// Result of running a text set through the batching adapter. `vectors`
/// is positionally aligned with the input; entries from failed batches are
/// `None`; callers must not assume partial success within a batch.
#[derive(Debug)]
pub struct BatchOutcome {
    pub vectors: Vec<Option<Vec<f32>>>,
    pub failed_batches: Vec<FailedBatch>,
}

impl BatchOutcome {
    #[inline]
    pub fn failed_count(&self) -> usize {
        self.failed_batches.iter().map(|b| b.indices.len()).sum()
    }
}

/// Slices a text set into provider-sized batches, bounding the pressure on
/// a rate-limited backend. Batches run sequentially; a cancellation flag is
/// honored between batches, never mid-batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchPlan {
    batch_size: usize,
}

impl BatchPlan {
    #[inline]
    pub fn new(batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(LensError::Config(
                "embedding batch size must be at least 1".to_string(),
            ));
        }
        Ok(Self { batch_size })
    }

    #[inline]
    pub fn batch_count(&self, texts: usize) -> usize {
        texts.div_ceil(self.batch_size)
    }

    /// Run every batch, recording failures instead of aborting so that
    /// later batches still land in the cache and a retried build is cheap.
    /// Returns `Err(Cancelled)` if the flag is raised between batches.
    #[inline]
    pub fn run(
        &self,
        provider: &dyn EmbeddingProvider,
        texts: &[String],
        cancel: Option<&AtomicBool>,
        mut on_batch: impl FnMut(usize, usize),
    ) -> Result<BatchOutcome> {
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut failed_batches = Vec::new();
        let total_batches = self.batch_count(texts.len());

        for (batch_index, batch) in texts.chunks(self.batch_size).enumerate() {
            if cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                debug!(batch_index, total_batches, "build cancelled between batches");
                return Err(LensError::Cancelled);
            }

            on_batch(batch_index, total_batches);

            let offset = batch_index * self.batch_size;
            match provider
                .embed_batch(batch)
                .and_then(|v| verify_batch(provider.model_id(), batch.len(), v))
            {
                Ok(batch_vectors) => {
                    for (i, vector) in batch_vectors.into_iter().enumerate() {
                        vectors[offset + i] = Some(vector);
                    }
                }
                Err(e) => {
                    warn!(
                        batch_index,
                        size = batch.len(),
                        error = %e,
                        "embedding batch failed as a unit"
                    );
                    failed_batches.push(FailedBatch {
                        indices: (offset..offset + batch.len()).collect(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(BatchOutcome {
            vectors,
            failed_batches,
        })
    }
}
