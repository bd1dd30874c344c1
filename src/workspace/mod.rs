#[cfg(test)]
mod tests;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::WorkspaceConfig;
use crate::{LensError, Result};

const METADATA_FILE: &str = "metadata.json";
const RAW_LOGS_DIR: &str = "raw_logs";
const INDEX_DIR: &str = "index";

/// Per-issue knowledge-base metadata. `index_dir` names the committed
/// index directory; it is the pointer the build path swaps last, so a
/// reader following it always sees a complete index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IssueMetadata {
    pub issue_id: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub chunk_count: usize,
    #[serde(default)]
    pub source_files: Vec<String>,
    #[serde(default)]
    pub last_build_status: BuildStatus,
    #[serde(default)]
    pub index_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum BuildStatus {
    #[default]
    NeverBuilt,
    Ok,
    Failed(String),
}

/// Filesystem layout for issue workspaces:
/// `<base>/issues/<id>/{raw_logs/, metadata.json, index/<build_id>/}`.
/// Raw logs are append-only as far as the engine is concerned; it never
/// rewrites an uploaded file.
#[derive(Debug, Clone)]
pub struct Workspace {
    issues_root: PathBuf,
    log_extensions: Vec<String>,
}

impl Workspace {
    #[inline]
    pub fn new(base_dir: &Path, config: &WorkspaceConfig) -> Result<Self> {
        let issues_root = base_dir.join("issues");
        fs::create_dir_all(&issues_root).with_context(|| {
            format!("Failed to create issues directory: {}", issues_root.display())
        })?;

        Ok(Self {
            issues_root,
            log_extensions: config.log_extensions.clone(),
        })
    }

    #[inline]
    pub fn issue_dir(&self, issue_id: &str) -> PathBuf {
        self.issues_root.join(issue_id)
    }

    #[inline]
    pub fn raw_logs_dir(&self, issue_id: &str) -> PathBuf {
        self.issue_dir(issue_id).join(RAW_LOGS_DIR)
    }

    #[inline]
    pub fn issue_exists(&self, issue_id: &str) -> bool {
        self.issue_dir(issue_id).is_dir()
    }

    /// Create a new issue workspace with empty metadata.
    #[inline]
    pub fn create_issue(&self, issue_id: &str) -> Result<()> {
        validate_issue_id(issue_id)?;

        let issue_dir = self.issue_dir(issue_id);
        if issue_dir.exists() {
            return Err(LensError::Workspace(format!(
                "issue '{issue_id}' already exists"
            )));
        }

        fs::create_dir_all(self.raw_logs_dir(issue_id))
            .with_context(|| format!("Failed to create workspace for issue '{issue_id}'"))?;

        let now = Utc::now().to_rfc3339();
        let metadata = IssueMetadata {
            issue_id: issue_id.to_string(),
            created_at: now.clone(),
            updated_at: now,
            model_id: None,
            chunk_count: 0,
            source_files: Vec::new(),
            last_build_status: BuildStatus::NeverBuilt,
            index_dir: None,
        };
        self.save_metadata(issue_id, &metadata)?;

        info!(issue_id, "created issue workspace");
        Ok(())
    }

    #[inline]
    pub fn list_issues(&self) -> Result<Vec<String>> {
        let mut issues = Vec::new();

        for entry in fs::read_dir(&self.issues_root)
            .with_context(|| format!("Failed to read {}", self.issues_root.display()))?
        {
            let entry = entry.context("Failed to read issues directory entry")?;
            if entry.path().is_dir() {
                issues.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        issues.sort_unstable();
        Ok(issues)
    }

    /// Delete an issue workspace and everything under it.
    #[inline]
    pub fn delete_issue(&self, issue_id: &str) -> Result<()> {
        let issue_dir = self.issue_dir(issue_id);
        if !issue_dir.exists() {
            return Err(LensError::Workspace(format!(
                "issue '{issue_id}' does not exist"
            )));
        }

        fs::remove_dir_all(&issue_dir)
            .with_context(|| format!("Failed to delete issue '{issue_id}'"))?;

        info!(issue_id, "deleted issue workspace");
        Ok(())
    }

    /// Register a raw log file. Uploads are append-only: a name that is
    /// already present is rejected rather than overwritten.
    #[inline]
    pub fn add_raw_log(&self, issue_id: &str, filename: &str, content: &[u8]) -> Result<PathBuf> {
        if !self.issue_exists(issue_id) {
            return Err(LensError::Workspace(format!(
                "issue '{issue_id}' does not exist"
            )));
        }

        let sanitized = sanitize_filename(filename);
        let path = self.raw_logs_dir(issue_id).join(&sanitized);
        if path.exists() {
            return Err(LensError::Workspace(format!(
                "log file '{sanitized}' already exists in issue '{issue_id}'"
            )));
        }

        fs::write(&path, content)
            .with_context(|| format!("Failed to write log file {}", path.display()))?;

        let mut metadata = self.load_metadata(issue_id)?;
        metadata.updated_at = Utc::now().to_rfc3339();
        self.save_metadata(issue_id, &metadata)?;

        debug!(issue_id, file = %sanitized, bytes = content.len(), "registered raw log");
        Ok(path)
    }

    /// Raw log files for an issue, filtered by the configured extensions,
    /// in stable (sorted) order.
    #[inline]
    pub fn raw_log_files(&self, issue_id: &str) -> Result<Vec<PathBuf>> {
        if !self.issue_exists(issue_id) {
            return Err(LensError::Workspace(format!(
                "issue '{issue_id}' does not exist"
            )));
        }

        let dir = self.raw_logs_dir(issue_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in
            fs::read_dir(&dir).with_context(|| format!("Failed to read {}", dir.display()))?
        {
            let entry = entry.context("Failed to read raw logs directory entry")?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if self
                .log_extensions
                .iter()
                .any(|ext| name.to_lowercase().ends_with(&ext.to_lowercase()))
            {
                files.push(path);
            }
        }

        files.sort_unstable();
        Ok(files)
    }

    #[inline]
    pub fn load_metadata(&self, issue_id: &str) -> Result<IssueMetadata> {
        let path = self.issue_dir(issue_id).join(METADATA_FILE);
        if !path.exists() {
            return Err(LensError::NoKnowledgeBase(issue_id.to_string()));
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read metadata for issue '{issue_id}'"))?;
        let metadata: IssueMetadata = serde_json::from_str(&content).map_err(|e| {
            LensError::Workspace(format!("corrupt metadata for issue '{issue_id}': {e}"))
        })?;

        Ok(metadata)
    }

    /// Write metadata atomically: a temp file renamed into place, so a
    /// reader never observes a half-written pointer.
    #[inline]
    pub fn save_metadata(&self, issue_id: &str, metadata: &IssueMetadata) -> Result<()> {
        let path = self.issue_dir(issue_id).join(METADATA_FILE);
        let tmp_path = self.issue_dir(issue_id).join(format!("{METADATA_FILE}.tmp"));

        let content = serde_json::to_string_pretty(metadata)
            .map_err(|e| LensError::Workspace(format!("failed to serialize metadata: {e}")))?;

        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to swap {}", path.display()))?;

        Ok(())
    }

    /// Committed index directory for an issue, following the metadata
    /// pointer. `None` until the first successful build.
    #[inline]
    pub fn committed_index_dir(&self, issue_id: &str) -> Result<Option<PathBuf>> {
        let metadata = self.load_metadata(issue_id)?;
        Ok(metadata
            .index_dir
            .map(|name| self.issue_dir(issue_id).join(INDEX_DIR).join(name)))
    }

    /// Allocate a fresh directory for a build's index files. The counter
    /// suffix keeps ids unique even within one timestamp tick.
    #[inline]
    pub fn allocate_index_dir(&self, issue_id: &str) -> Result<(String, PathBuf)> {
        static BUILD_COUNTER: AtomicU64 = AtomicU64::new(0);
        let build_id = format!(
            "build-{}-{}",
            Utc::now().format("%Y%m%dT%H%M%S"),
            BUILD_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let path = self.issue_dir(issue_id).join(INDEX_DIR).join(&build_id);
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create index directory {}", path.display()))?;
        Ok((build_id, path))
    }

    /// Best-effort removal of index directories other than the committed
    /// one. Failures are logged, never fatal: a leftover directory is
    /// unreachable garbage, not corruption.
    #[inline]
    pub fn prune_index_dirs(&self, issue_id: &str, keep: &str) {
        let index_root = self.issue_dir(issue_id).join(INDEX_DIR);
        let Ok(entries) = fs::read_dir(&index_root) else {
            return;
        };

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name != keep && entry.path().is_dir() {
                if let Err(e) = fs::remove_dir_all(entry.path()) {
                    warn!(issue_id, dir = %name, error = %e, "failed to prune stale index");
                }
            }
        }
    }
}

fn validate_issue_id(issue_id: &str) -> Result<()> {
    if issue_id.is_empty()
        || !issue_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(LensError::Workspace(format!(
            "invalid issue id '{issue_id}' (use letters, digits, '-' and '_')"
        )));
    }
    Ok(())
}

/// Strip characters that are unsafe in filenames; an empty result becomes
/// `unnamed`.
fn sanitize_filename(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|c| {
            if matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') {
                '_'
            } else {
                c
            }
        })
        .collect();

    let sanitized = sanitized.trim_matches(|c| c == '.' || c == ' ').to_string();
    if sanitized.is_empty() {
        "unnamed".to_string()
    } else {
        sanitized
    }
}
