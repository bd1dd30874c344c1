use std::path::PathBuf;

use clap::{Parser, Subcommand};

use loglens::commands::{
    add_log, build_issue, create_issue, delete_issue, list_issues, query_issue, save_config,
    show_config, show_status,
};
use loglens::config::{Config, default_base_dir};
use loglens::{LensError, Result};

#[derive(Parser)]
#[command(name = "loglens")]
#[command(about = "Ask natural-language questions about uploaded log files")]
#[command(version)]
struct Cli {
    /// Base directory for workspaces, cache, and config
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or write the configuration file
    Config {
        /// Show the active configuration instead of writing it
        #[arg(long)]
        show: bool,
    },
    /// Create a new issue workspace
    Create {
        /// Issue identifier (letters, digits, '-' and '_')
        issue: String,
    },
    /// Upload a raw log file into an issue
    Add {
        /// Issue identifier
        issue: String,
        /// Path of the log file to upload
        file: PathBuf,
    },
    /// List issue workspaces
    List,
    /// Delete an issue workspace and its knowledge base
    Delete {
        /// Issue identifier
        issue: String,
    },
    /// Build or update an issue's knowledge base
    Build {
        /// Issue identifier
        issue: String,
        /// Embedding model id, e.g. ollama:nomic-embed-text:768
        #[arg(long)]
        model: Option<String>,
        /// Re-embed every chunk and fully replace the index
        #[arg(long)]
        force: bool,
    },
    /// Query an issue's knowledge base
    Query {
        /// Issue identifier
        issue: String,
        /// Natural-language query text
        text: String,
        /// Number of chunks to return (defaults to the configured top_k)
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Show workspace, cache, and per-issue status
    Status {
        /// Limit the report to one issue
        issue: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let base_dir = match cli.base_dir {
        Some(dir) => dir,
        None => default_base_dir().map_err(|e| LensError::Config(e.to_string()))?,
    };
    let config = Config::load(&base_dir)?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config)?;
            } else {
                save_config(&config)?;
            }
        }
        Commands::Create { issue } => {
            create_issue(&config, &issue)?;
        }
        Commands::Add { issue, file } => {
            add_log(&config, &issue, &file)?;
        }
        Commands::List => {
            list_issues(&config)?;
        }
        Commands::Delete { issue } => {
            delete_issue(&config, &issue)?;
        }
        Commands::Build {
            issue,
            model,
            force,
        } => {
            build_issue(&config, &issue, model.as_deref(), force).await?;
        }
        Commands::Query {
            issue,
            text,
            top_k,
        } => {
            query_issue(&config, &issue, &text, top_k)?;
        }
        Commands::Status { issue } => {
            show_status(&config, issue.as_deref()).await?;
        }
    }

    Ok(())
}
