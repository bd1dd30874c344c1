use super::*;

use tempfile::TempDir;

use crate::config::Config;
use crate::database::{Database, EmbeddingCache};
use crate::embeddings::TokenHashProvider;
use crate::embeddings::chunking::ChunkingConfig;
use crate::kb::{BuildOptions, KnowledgeBaseManager};

const LOCAL_MODEL: &str = "local:token-hash:64";

async fn built_issue(log: &str) -> (Retriever, Workspace, TempDir) {
    let temp = TempDir::new().expect("can create temp dir");
    let mut config = Config::load(temp.path()).expect("can load default config");
    config.chunking = ChunkingConfig {
        chunk_size: 40,
        overlap: 10,
    };

    let workspace = Workspace::new(temp.path(), &config.workspace).expect("can create workspace");
    workspace.create_issue("issue-1").expect("can create issue");
    workspace
        .add_raw_log("issue-1", "app.log", log.as_bytes())
        .expect("can add log");

    let database = Database::new(config.cache_db_path())
        .await
        .expect("can create cache database");
    let manager =
        KnowledgeBaseManager::new(workspace.clone(), EmbeddingCache::new(database), &config);
    let provider = TokenHashProvider::new(LOCAL_MODEL.parse().expect("valid model id"));
    manager
        .update("issue-1", &provider, &BuildOptions::default(), |_| {})
        .await
        .expect("build succeeds");

    let retriever = Retriever::new(workspace.clone(), config.embedding.clone());
    (retriever, workspace, temp)
}

#[tokio::test]
async fn query_ranks_matching_chunks_first() {
    let log = "\
startup complete in 210ms
listening on 0.0.0.0:8080
request GET /health 200
error: connection refused to upstream db (error code 111)
error: retry budget exhausted, giving up with error state
request GET /items 200
cache warmed with 4821 entries
request POST /items 201
worker pool resized to 8
shutdown requested by operator";
    let (retriever, _workspace, _temp) = built_issue(log).await;

    let results = retriever
        .retrieve("issue-1", "error", 3)
        .expect("retrieval succeeds");

    assert!(!results.is_empty());
    assert!(
        results[0].chunk.text.contains("error"),
        "top chunk should contain the query term, got: {}",
        results[0].chunk.text
    );
    // Scores come back descending.
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    // Provenance survives for citation.
    assert_eq!(results[0].chunk.source_file, "app.log");
    assert!(results[0].chunk.line_start >= 1);
    assert!(results[0].chunk.line_end >= results[0].chunk.line_start);
}

#[tokio::test]
async fn top_k_larger_than_index_returns_everything() {
    let (retriever, workspace, _temp) = built_issue("only line one\nonly line two").await;
    let chunk_count = workspace
        .load_metadata("issue-1")
        .expect("metadata exists")
        .chunk_count;

    let results = retriever
        .retrieve("issue-1", "line", 1000)
        .expect("retrieval succeeds");
    assert_eq!(results.len(), chunk_count);
}

#[tokio::test]
async fn zero_top_k_is_a_configuration_error() {
    let (retriever, _workspace, _temp) = built_issue("a line").await;
    assert!(matches!(
        retriever.retrieve("issue-1", "anything", 0),
        Err(LensError::Config(_))
    ));
}

#[tokio::test]
async fn unbuilt_issue_has_no_knowledge_base() {
    let temp = TempDir::new().expect("can create temp dir");
    let config = Config::load(temp.path()).expect("can load default config");
    let workspace = Workspace::new(temp.path(), &config.workspace).expect("can create workspace");
    workspace.create_issue("issue-1").expect("can create issue");

    let retriever = Retriever::new(workspace, config.embedding);
    assert!(matches!(
        retriever.retrieve("issue-1", "anything", 5),
        Err(LensError::NoKnowledgeBase(_))
    ));
}

#[tokio::test]
async fn unknown_issue_has_no_knowledge_base() {
    let temp = TempDir::new().expect("can create temp dir");
    let config = Config::load(temp.path()).expect("can load default config");
    let workspace = Workspace::new(temp.path(), &config.workspace).expect("can create workspace");

    let retriever = Retriever::new(workspace, config.embedding);
    assert!(matches!(
        retriever.retrieve("missing", "anything", 5),
        Err(LensError::NoKnowledgeBase(_))
    ));
}

#[tokio::test]
async fn requesting_a_different_model_is_a_mismatch() {
    let (retriever, _workspace, _temp) = built_issue("a line of log text").await;

    let requested: ModelId = "ollama:nomic-embed-text:768".parse().expect("valid model id");
    let result = retriever.retrieve_with_model("issue-1", "anything", 5, Some(&requested));
    assert!(matches!(result, Err(LensError::ModelMismatch { .. })));
}

#[tokio::test]
async fn requesting_the_active_model_succeeds() {
    let (retriever, _workspace, _temp) = built_issue("a line of log text").await;

    let requested: ModelId = LOCAL_MODEL.parse().expect("valid model id");
    let results = retriever
        .retrieve_with_model("issue-1", "log", 5, Some(&requested))
        .expect("retrieval succeeds");
    assert!(!results.is_empty());
}
