#[cfg(test)]
mod tests;

use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::embeddings::{ModelId, provider_for};
use crate::index::{IndexReader, ScoredChunk};
use crate::workspace::Workspace;
use crate::{LensError, Result};

/// Query-time search over a committed knowledge base.
///
/// The retriever is strictly a reader: it follows the metadata pointer to
/// the committed index and never mutates anything, so it is safe to run
/// concurrently with itself and with in-progress builds.
pub struct Retriever {
    workspace: Workspace,
    embedding: EmbeddingConfig,
}

impl Retriever {
    #[inline]
    pub fn new(workspace: Workspace, embedding: EmbeddingConfig) -> Self {
        Self {
            workspace,
            embedding,
        }
    }

    /// Top-k chunks for `query_text` under the issue's active model.
    #[inline]
    pub fn retrieve(
        &self,
        issue_id: &str,
        query_text: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        self.retrieve_with_model(issue_id, query_text, top_k, None)
    }

    /// As [`retrieve`](Self::retrieve), but additionally checks that the
    /// issue's index was built with `requested` when one is given. The
    /// query is always embedded with the index's own model; a vector from
    /// any other model would not be comparable.
    #[inline]
    pub fn retrieve_with_model(
        &self,
        issue_id: &str,
        query_text: &str,
        top_k: usize,
        requested: Option<&ModelId>,
    ) -> Result<Vec<ScoredChunk>> {
        if top_k == 0 {
            return Err(LensError::Config("top_k must be at least 1".to_string()));
        }

        let metadata = self.workspace.load_metadata(issue_id)?;
        let Some(model_str) = metadata.model_id else {
            return Err(LensError::NoKnowledgeBase(issue_id.to_string()));
        };
        let active: ModelId = model_str.parse().map_err(|_| {
            LensError::Database(format!(
                "issue '{issue_id}' records an invalid model id '{model_str}'"
            ))
        })?;

        if let Some(requested) = requested {
            if requested != &active {
                return Err(LensError::ModelMismatch {
                    active: active.to_string(),
                    requested: requested.to_string(),
                });
            }
        }

        let Some(index_dir) = self.workspace.committed_index_dir(issue_id)? else {
            return Err(LensError::NoKnowledgeBase(issue_id.to_string()));
        };

        let provider = provider_for(&active, &self.embedding)?;
        let query_vector = provider
            .embed_batch(&[query_text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| {
                LensError::Provider(format!("provider for '{active}' returned no query vector"))
            })?;

        let mut reader = IndexReader::open(&index_dir)?;
        let results = reader.search(&query_vector, top_k)?;

        debug!(
            issue_id,
            top_k,
            results = results.len(),
            model = %active,
            "retrieval complete"
        );

        Ok(results)
    }
}
