
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::database::{EmbeddingCache, PutOutcome};
use crate::embeddings::chunking::ChunkingConfig;
use crate::embeddings::provider::{BatchPlan, EmbeddingProvider};
use crate::embeddings::{Chunk, ModelId, chunk_log};
use crate::index::VectorIndex;
use crate::index::store::{read_index, write_index};
use crate::workspace::{BuildStatus, Workspace};
use crate::{LensError, Result};

/// Options for one knowledge-base build.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Discard the cache-read path and the committed index: every chunk is
    /// re-embedded and the index fully replaced.
    pub force_rebuild: bool,
    /// Raised between batches to stop an in-flight build. Embeddings cached
    /// before the flag is observed stay valid; the index is left unchanged.
    pub cancel: Option<Arc<AtomicBool>>,
}

/// Phase notifications emitted while a build runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildProgress {
    Collecting,
    Chunking { files: usize },
    Resolving { hits: usize, misses: usize },
    Embedding { batch: usize, total_batches: usize },
    Committing,
}

/// Outcome of a successful build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub issue_id: String,
    pub model_id: ModelId,
    pub chunks_processed: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub embedding_failures: usize,
    pub incremental: bool,
    pub built_at: String,
}

/// Orchestrates chunking, cache resolution, embedding, and index commits
/// for issue knowledge bases. The manager exclusively owns the on-disk
/// index and metadata of every issue; readers only ever follow the
/// committed metadata pointer.
///
/// Builds for one issue are serialized through a per-issue lock; builds
/// for different issues proceed in parallel.
pub struct KnowledgeBaseManager {
    workspace: Workspace,
    cache: EmbeddingCache,
    chunking: ChunkingConfig,
    batch_size: usize,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KnowledgeBaseManager {
    #[inline]
    pub fn new(workspace: Workspace, cache: EmbeddingCache, config: &Config) -> Self {
        Self {
            workspace,
            cache,
            chunking: config.chunking.clone(),
            batch_size: config.embedding.batch_size as usize,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Run one build for `issue_id` against `provider`.
    ///
    /// State machine: Collect raw logs, Chunk them, Resolve chunks against
    /// the cache, Embed the misses in batches, Commit the assembled index.
    /// The commit is atomic: a fresh index directory is written first and
    /// the metadata pointer swapped last, so a failure anywhere earlier
    /// leaves the previously committed knowledge base untouched and
    /// queryable. Chunks cached during a failed attempt are reused when the
    /// caller retries, which makes retries cheap.
    ///
    /// Incremental semantics: with `force_rebuild` off and an unchanged
    /// model, newly added files extend the existing index via append. Edits
    /// to a file that was already indexed are not detected; re-chunking
    /// changed content requires `force_rebuild`.
    #[inline]
    pub async fn update(
        &self,
        issue_id: &str,
        provider: &dyn EmbeddingProvider,
        options: &BuildOptions,
        mut progress: impl FnMut(BuildProgress),
    ) -> Result<BuildReport> {
        // Reject bad chunking parameters before any work, even for an
        // issue with no logs at all.
        if self.chunking.overlap >= self.chunking.chunk_size {
            return Err(LensError::Config(format!(
                "overlap ({}) must be strictly less than chunk_size ({})",
                self.chunking.overlap, self.chunking.chunk_size
            )));
        }

        let lock = self.issue_lock(issue_id).await;
        let _build_guard = lock.lock().await;

        if !self.workspace.issue_exists(issue_id) {
            return Err(LensError::Workspace(format!(
                "issue '{issue_id}' does not exist"
            )));
        }
        let mut metadata = self.workspace.load_metadata(issue_id)?;
        let model = provider.model_id();

        // A model change invalidates the committed index wholesale; the
        // cache stays usable because its key carries the model, so vectors
        // produced under a different model can never be returned.
        let force = options.force_rebuild;
        if let Some(previous) = metadata.model_id.as_deref() {
            if previous != model.to_string() {
                info!(
                    issue_id,
                    from = previous,
                    to = %model,
                    "embedding model changed, full rebuild"
                );
            }
        }

        // Collect + Chunk.
        progress(BuildProgress::Collecting);
        let files = self.workspace.raw_log_files(issue_id)?;
        progress(BuildProgress::Chunking { files: files.len() });
        let (chunks, file_names) = self.chunk_files(&files)?;

        // Resolve each chunk against the cache. Forced builds skip the
        // read path entirely; results are still written back afterwards.
        let mut resolved: Vec<Option<Vec<f32>>> = vec![None; chunks.len()];
        if !force {
            for (i, chunk) in chunks.iter().enumerate() {
                resolved[i] = self.cache.get(&chunk.content_hash, model).await?;
            }
        }
        let miss_indices: Vec<usize> = (0..chunks.len())
            .filter(|&i| resolved[i].is_none())
            .collect();
        let cache_hits = chunks.len() - miss_indices.len();
        progress(BuildProgress::Resolving {
            hits: cache_hits,
            misses: miss_indices.len(),
        });
        debug!(
            issue_id,
            chunks = chunks.len(),
            hits = cache_hits,
            misses = miss_indices.len(),
            "cache resolved"
        );

        // Embed the misses in bounded batches.
        let miss_texts: Vec<String> = miss_indices
            .iter()
            .map(|&i| chunks[i].text.clone())
            .collect();
        let plan = BatchPlan::new(self.batch_size)?;
        let outcome = plan.run(
            provider,
            &miss_texts,
            options.cancel.as_deref(),
            |batch, total_batches| {
                progress(BuildProgress::Embedding {
                    batch: batch + 1,
                    total_batches,
                });
            },
        )?;

        // Cache every vector that did come back, including those from a
        // build that is about to fail: the retry then starts from here.
        for (miss_pos, vector) in outcome.vectors.iter().enumerate() {
            let Some(vector) = vector else { continue };
            let chunk = &chunks[miss_indices[miss_pos]];
            let stored = match self.cache.put(&chunk.content_hash, model, vector).await? {
                PutOutcome::Conflict => self
                    .cache
                    .get(&chunk.content_hash, model)
                    .await?
                    .ok_or_else(|| {
                        LensError::Consistency(format!(
                            "cache entry for '{}' vanished after a conflicting write",
                            chunk.content_hash
                        ))
                    })?,
                _ => vector.clone(),
            };
            resolved[miss_indices[miss_pos]] = Some(stored);
        }

        if !outcome.failed_batches.is_empty() {
            let failed_chunks = outcome.failed_count();
            let failed_batches = outcome.failed_batches.len();
            warn!(
                issue_id,
                failed_batches, failed_chunks, "build failed, keeping previous index"
            );
            metadata.updated_at = Utc::now().to_rfc3339();
            metadata.last_build_status = BuildStatus::Failed(format!(
                "{failed_chunks} chunks across {failed_batches} batches could not be embedded"
            ));
            self.workspace.save_metadata(issue_id, &metadata)?;
            return Err(LensError::BuildFailed {
                failed_batches,
                failed_chunks,
            });
        }

        // Commit: assemble the full entry set, write a fresh index
        // directory, then swap the metadata pointer.
        progress(BuildProgress::Committing);
        let mut entries = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(resolved) {
            let vector = vector.ok_or_else(|| {
                LensError::Consistency(format!(
                    "no vector resolved for chunk '{}'",
                    chunk.chunk_id
                ))
            })?;
            entries.push((chunk.clone(), vector));
        }

        let (index, incremental) = self.assemble_index(issue_id, model, force, entries)?;
        let (build_id, index_dir) = self.workspace.allocate_index_dir(issue_id)?;
        write_index(&index_dir, &index)?;

        let built_at = Utc::now().to_rfc3339();
        metadata.model_id = Some(model.to_string());
        metadata.chunk_count = index.len();
        metadata.source_files = file_names;
        metadata.updated_at = built_at.clone();
        metadata.last_build_status = BuildStatus::Ok;
        metadata.index_dir = Some(build_id.clone());
        self.workspace.save_metadata(issue_id, &metadata)?;
        self.workspace.prune_index_dirs(issue_id, &build_id);

        info!(
            issue_id,
            chunks = index.len(),
            cache_hits,
            model = %model,
            incremental,
            "knowledge base committed"
        );

        Ok(BuildReport {
            issue_id: issue_id.to_string(),
            model_id: model.clone(),
            chunks_processed: chunks.len(),
            cache_hits,
            cache_misses: miss_indices.len(),
            embedding_failures: 0,
            incremental,
            built_at,
        })
    }

    /// Chunk every collected file, in stable order. Returns the full chunk
    /// set and the file names recorded in metadata.
    fn chunk_files(&self, files: &[std::path::PathBuf]) -> Result<(Vec<Chunk>, Vec<String>)> {
        let mut chunks = Vec::new();
        let mut file_names = Vec::with_capacity(files.len());

        for path in files {
            let name = file_name(path);
            let raw = fs::read(path)?;
            let text = String::from_utf8_lossy(&raw);
            chunks.extend(chunk_log(&name, &text, &self.chunking)?);
            file_names.push(name);
        }

        Ok((chunks, file_names))
    }

    /// Build the index to commit. When the committed index uses the same
    /// model and its chunks are a prefix of the new chunk set, the new tail
    /// is appended to it; anything else is a full rebuild.
    fn assemble_index(
        &self,
        issue_id: &str,
        model: &ModelId,
        force: bool,
        entries: Vec<(Chunk, Vec<f32>)>,
    ) -> Result<(VectorIndex, bool)> {
        if !force {
            if let Some(existing) = self.committed_index(issue_id)? {
                if existing.model_id() == model && is_chunk_prefix(&existing, &entries) {
                    let mut index = existing;
                    let tail: Vec<(Chunk, Vec<f32>)> =
                        entries.into_iter().skip(index.len()).collect();
                    index.append(tail)?;
                    return Ok((index, true));
                }
            }
        }

        Ok((VectorIndex::build(model.clone(), entries)?, false))
    }

    /// Load the committed index for an issue, if one exists. An unreadable
    /// index is treated as absent: the build falls back to a full rebuild
    /// rather than failing.
    fn committed_index(&self, issue_id: &str) -> Result<Option<VectorIndex>> {
        let Some(dir) = self.workspace.committed_index_dir(issue_id)? else {
            return Ok(None);
        };

        match read_index(&dir) {
            Ok(index) => Ok(Some(index)),
            Err(e) => {
                warn!(issue_id, error = %e, "committed index unreadable, rebuilding");
                Ok(None)
            }
        }
    }

    async fn issue_lock(&self, issue_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(issue_id.to_string()).or_default())
    }
}

/// True when the committed index's chunks are exactly the leading entries
/// of the new chunk set, identified by id and content hash.
fn is_chunk_prefix(existing: &VectorIndex, entries: &[(Chunk, Vec<f32>)]) -> bool {
    if existing.len() > entries.len() {
        return false;
    }
    existing
        .chunks()
        .iter()
        .zip(entries)
        .all(|(old, (new, _))| {
            old.chunk_id == new.chunk_id && old.content_hash == new.content_hash
        })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
