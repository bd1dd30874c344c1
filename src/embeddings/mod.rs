// Embeddings: chunking, model identities, and the provider backends.

pub mod chunking;
pub mod local;
pub mod ollama;
pub mod provider;

pub use chunking::{Chunk, chunk_log, content_hash};
pub use local::TokenHashProvider;
pub use ollama::OllamaProvider;
pub use provider::{BatchOutcome, BatchPlan, EmbeddingProvider, provider_for};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identity of an embedding model: `provider:name:dimension`.
///
/// Vectors are only comparable under the model that produced them, so the
/// identity carries the provider, the model name, and the declared output
/// dimension (e.g. `ollama:nomic-embed-text:768`, `local:token-hash:256`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelId {
    provider: String,
    name: String,
    dimension: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelIdError {
    #[error("model id '{0}' is not of the form provider:name:dimension")]
    Malformed(String),
    #[error("model id '{0}' has an invalid dimension (must be between 1 and 65536)")]
    InvalidDimension(String),
}

impl ModelId {
    #[inline]
    pub fn new(provider: &str, name: &str, dimension: usize) -> Result<Self, ModelIdError> {
        let raw = format!("{provider}:{name}:{dimension}");
        raw.parse()
    }

    #[inline]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Output dimension declared by this model identity.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

impl FromStr for ModelId {
    type Err = ModelIdError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((provider, rest)) = s.split_once(':') else {
            return Err(ModelIdError::Malformed(s.to_string()));
        };
        let Some((name, dimension)) = rest.rsplit_once(':') else {
            return Err(ModelIdError::Malformed(s.to_string()));
        };

        if provider.is_empty() || name.is_empty() {
            return Err(ModelIdError::Malformed(s.to_string()));
        }

        let dimension: usize = dimension
            .parse()
            .map_err(|_| ModelIdError::InvalidDimension(s.to_string()))?;
        if dimension == 0 || dimension > 65536 {
            return Err(ModelIdError::InvalidDimension(s.to_string()));
        }

        Ok(Self {
            provider: provider.to_string(),
            name: name.to_string(),
            dimension,
        })
    }
}

impl TryFrom<String> for ModelId {
    type Error = ModelIdError;

    #[inline]
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelId> for String {
    #[inline]
    fn from(value: ModelId) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ModelId {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.provider, self.name, self.dimension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_id_round_trip() {
        let id: ModelId = "ollama:nomic-embed-text:768".parse().expect("valid id");
        assert_eq!(id.provider(), "ollama");
        assert_eq!(id.name(), "nomic-embed-text");
        assert_eq!(id.dimension(), 768);
        assert_eq!(id.to_string(), "ollama:nomic-embed-text:768");
    }

    #[test]
    fn model_id_rejects_malformed() {
        assert!("nomic-embed-text".parse::<ModelId>().is_err());
        assert!("ollama:nomic-embed-text".parse::<ModelId>().is_err());
        assert!(":model:768".parse::<ModelId>().is_err());
        assert!("ollama:model:zero".parse::<ModelId>().is_err());
        assert!("ollama:model:0".parse::<ModelId>().is_err());
    }

    #[test]
    fn model_name_may_contain_colons() {
        // The last segment is always the dimension; the name keeps the rest.
        let id: ModelId = "ollama:nomic-embed-text:v1.5:768".parse().expect("valid id");
        assert_eq!(id.name(), "nomic-embed-text:v1.5");
        assert_eq!(id.dimension(), 768);
    }
}
