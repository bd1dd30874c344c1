use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::config::Config;
use crate::database::{Database, EmbeddingCache};
use crate::embeddings::{ModelId, provider_for};
use crate::kb::{BuildOptions, BuildProgress, KnowledgeBaseManager};
use crate::retriever::Retriever;
use crate::workspace::{BuildStatus, Workspace};
use crate::{LensError, Result};

/// Print the active configuration as TOML.
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    let rendered = toml::to_string_pretty(config)
        .context("Failed to render configuration")?;
    println!("# {}", config.config_file_path().display());
    print!("{rendered}");
    Ok(())
}

/// Write the current configuration to disk, creating the file with
/// defaults on first use.
#[inline]
pub fn save_config(config: &Config) -> Result<()> {
    config.save()?;
    println!("Wrote {}", config.config_file_path().display());
    println!("Edit the file and re-run commands to pick up changes.");
    Ok(())
}

/// Create a new issue workspace.
#[inline]
pub fn create_issue(config: &Config, issue_id: &str) -> Result<()> {
    let workspace = Workspace::new(&config.base_dir, &config.workspace)?;
    workspace.create_issue(issue_id)?;
    println!("Created issue: {issue_id}");
    println!("Add logs with 'loglens add {issue_id} <file>'");
    Ok(())
}

/// Upload a raw log file into an issue.
#[inline]
pub fn add_log(config: &Config, issue_id: &str, file: &Path) -> Result<()> {
    let workspace = Workspace::new(&config.base_dir, &config.workspace)?;

    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| LensError::Workspace(format!("not a file: {}", file.display())))?;
    let content =
        fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;

    let stored = workspace.add_raw_log(issue_id, &filename, &content)?;
    println!(
        "Added {} ({} bytes) to issue {issue_id}",
        stored.display(),
        content.len()
    );
    println!("Run 'loglens build {issue_id}' to update the knowledge base.");
    Ok(())
}

/// List issue workspaces with their build state.
#[inline]
pub fn list_issues(config: &Config) -> Result<()> {
    let workspace = Workspace::new(&config.base_dir, &config.workspace)?;
    let issues = workspace.list_issues()?;

    if issues.is_empty() {
        println!("No issues yet.");
        println!("Use 'loglens create <issue>' to create one.");
        return Ok(());
    }

    println!("Issues ({} total):", issues.len());
    for issue_id in &issues {
        match workspace.load_metadata(issue_id) {
            Ok(metadata) => {
                let state = match &metadata.last_build_status {
                    BuildStatus::NeverBuilt => "not built".to_string(),
                    BuildStatus::Ok => format!(
                        "{} chunks, model {}",
                        metadata.chunk_count,
                        metadata.model_id.as_deref().unwrap_or("?")
                    ),
                    BuildStatus::Failed(detail) => format!("last build failed: {detail}"),
                };
                println!("  {issue_id} - {state}");
            }
            Err(e) => println!("  {issue_id} - metadata unreadable: {e}"),
        }
    }

    Ok(())
}

/// Delete an issue workspace and everything in it.
#[inline]
pub fn delete_issue(config: &Config, issue_id: &str) -> Result<()> {
    let workspace = Workspace::new(&config.base_dir, &config.workspace)?;
    workspace.delete_issue(issue_id)?;
    println!("Deleted issue: {issue_id}");
    println!("Cached embeddings are kept; identical content is reused by other issues.");
    Ok(())
}

/// Build or update an issue's knowledge base.
#[inline]
pub async fn build_issue(
    config: &Config,
    issue_id: &str,
    model: Option<&str>,
    force: bool,
) -> Result<()> {
    let model: ModelId = model
        .unwrap_or(&config.embedding.default_model)
        .parse()
        .map_err(|e| LensError::Config(format!("invalid model id: {e}")))?;
    let provider = provider_for(&model, &config.embedding)?;

    let workspace = Workspace::new(&config.base_dir, &config.workspace)?;
    let database = Database::new(config.cache_db_path()).await?;
    let manager = KnowledgeBaseManager::new(workspace, EmbeddingCache::new(database), config);

    info!(issue_id, model = %model, force, "starting build");

    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .context("Failed to build progress style")?,
    );
    bar.enable_steady_tick(Duration::from_millis(100));

    let options = BuildOptions {
        force_rebuild: force,
        cancel: None,
    };
    let result = manager
        .update(issue_id, provider.as_ref(), &options, |phase| match phase {
            BuildProgress::Collecting => bar.set_message("Collecting raw logs..."),
            BuildProgress::Chunking { files } => {
                bar.set_message(format!("Chunking {files} files..."));
            }
            BuildProgress::Resolving { hits, misses } => {
                bar.set_message(format!("Cache: {hits} hits, {misses} to embed"));
            }
            BuildProgress::Embedding {
                batch,
                total_batches,
            } => {
                bar.set_message(format!("Embedding batch {batch}/{total_batches}..."));
            }
            BuildProgress::Committing => bar.set_message("Committing index..."),
        })
        .await;
    bar.finish_and_clear();

    let report = result?;
    println!("Build complete for issue {issue_id}");
    println!("  Chunks processed: {}", report.chunks_processed);
    println!("  Cache hits:       {}", report.cache_hits);
    println!("  Cache misses:     {}", report.cache_misses);
    println!("  Model:            {}", report.model_id);
    println!(
        "  Mode:             {}",
        if report.incremental {
            "incremental"
        } else {
            "full rebuild"
        }
    );

    Ok(())
}

/// Query an issue's knowledge base and print the top chunks.
#[inline]
pub fn query_issue(
    config: &Config,
    issue_id: &str,
    query_text: &str,
    top_k: Option<usize>,
) -> Result<()> {
    let workspace = Workspace::new(&config.base_dir, &config.workspace)?;
    let retriever = Retriever::new(workspace, config.embedding.clone());

    let top_k = top_k.unwrap_or(config.retrieval.top_k);
    let results = retriever.retrieve(issue_id, query_text, top_k)?;

    if results.is_empty() {
        println!("No chunks indexed for issue {issue_id}.");
        return Ok(());
    }

    println!("Top {} chunks for \"{query_text}\":", results.len());
    for (rank, scored) in results.iter().enumerate() {
        let chunk = &scored.chunk;
        println!();
        println!(
            "{}. {}:{}-{} (score {:.4})",
            rank + 1,
            chunk.source_file,
            chunk.line_start,
            chunk.line_end,
            scored.score
        );
        if let Some((from, to)) = &chunk.timestamp_range {
            println!("   time range: {from} .. {to}");
        }
        for line in chunk.text.lines() {
            println!("   | {line}");
        }
    }

    Ok(())
}

/// Show workspace, cache, and per-issue status.
#[inline]
pub async fn show_status(config: &Config, issue: Option<&str>) -> Result<()> {
    println!("loglens status");
    println!("  Base directory: {}", config.base_dir.display());
    println!("  Default model:  {}", config.embedding.default_model);

    match Database::new(config.cache_db_path()).await {
        Ok(database) => {
            let cache = EmbeddingCache::new(database);
            match cache.entry_count().await {
                Ok(entries) => println!("  Embedding cache: {entries} entries"),
                Err(e) => println!("  Embedding cache: unavailable ({e})"),
            }
        }
        Err(e) => println!("  Embedding cache: unavailable ({e})"),
    }

    let workspace = Workspace::new(&config.base_dir, &config.workspace)?;
    let issues = match issue {
        Some(id) => vec![id.to_string()],
        None => workspace.list_issues()?,
    };

    if issues.is_empty() {
        println!();
        println!("No issues yet.");
        return Ok(());
    }

    for issue_id in &issues {
        println!();
        let metadata = match workspace.load_metadata(issue_id) {
            Ok(metadata) => metadata,
            Err(e) => {
                println!("Issue {issue_id}: {e}");
                continue;
            }
        };

        println!("Issue {issue_id}");
        let log_files = workspace.raw_log_files(issue_id)?;
        println!("  Raw logs:     {}", log_files.len());
        match &metadata.last_build_status {
            BuildStatus::NeverBuilt => println!("  Knowledge base: not built"),
            BuildStatus::Ok => {
                println!("  Knowledge base: {} chunks", metadata.chunk_count);
                println!(
                    "  Model:          {}",
                    metadata.model_id.as_deref().unwrap_or("?")
                );
                println!("  Last build:     {}", metadata.updated_at);
            }
            BuildStatus::Failed(detail) => {
                println!("  Knowledge base: last build FAILED ({detail})");
                if metadata.index_dir.is_some() {
                    println!(
                        "  Previous index remains queryable: {} chunks under {}",
                        metadata.chunk_count,
                        metadata.model_id.as_deref().unwrap_or("?")
                    );
                }
            }
        }
    }

    Ok(())
}
