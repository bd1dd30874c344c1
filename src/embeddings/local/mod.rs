
use crate::Result;
use crate::embeddings::ModelId;
use crate::embeddings::provider::{EmbeddingProvider, verify_batch};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x100_0000_01b3;

/// In-process embedding backend: signed hashed bag-of-tokens, L2-normalized.
///
/// No network failure mode and fully deterministic, which makes it the
/// offline counterpart to the remote backend: identical text always maps to
/// the identical vector, so cache keys and retrieval results are stable.
/// The dimension comes from the model identity (e.g. `local:token-hash:256`).
#[derive(Debug, Clone)]
pub struct TokenHashProvider {
    model: ModelId,
}

impl TokenHashProvider {
    #[inline]
    pub fn new(model: ModelId) -> Self {
        Self { model }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let dimension = self.model.dimension();
        let mut vector = vec![0.0f32; dimension];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = fnv1a(token);
            let bucket = (hash % dimension as u64) as usize;
            // Sign bit taken from an independent region of the hash so
            // collisions cancel rather than pile up.
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        vector
    }
}

fn fnv1a(token: &str) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in token.to_lowercase().bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

impl EmbeddingProvider for TokenHashProvider {
    #[inline]
    fn model_id(&self) -> &ModelId {
        &self.model
    }

    #[inline]
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = texts.iter().map(|t| self.embed_one(t)).collect();
        verify_batch(&self.model, texts.len(), vectors)
    }
}
