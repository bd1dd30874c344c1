use thiserror::Error;

pub type Result<T> = std::result::Result<T, LensError>;

#[derive(Error, Debug)]
pub enum LensError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Embedding provider error: {0}")]
    Provider(String),

    #[error("Model mismatch: index uses '{active}', requested '{requested}'")]
    ModelMismatch { active: String, requested: String },

    #[error("Cache consistency violation: {0}")]
    Consistency(String),

    #[error(
        "Build failed: {failed_chunks} chunks across {failed_batches} batches could not be embedded"
    )]
    BuildFailed {
        failed_batches: usize,
        failed_chunks: usize,
    },

    #[error("Build cancelled before commit")]
    Cancelled,

    #[error("No knowledge base has been built for issue '{0}'")]
    NoKnowledgeBase(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod index;
pub mod kb;
pub mod retriever;
pub mod workspace;
