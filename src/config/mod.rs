// Configuration management: TOML settings validated before any processing.

pub mod settings;

pub use settings::{
    Config, ConfigError, EmbeddingConfig, RetrievalConfig, WorkspaceConfig, default_base_dir,
};
