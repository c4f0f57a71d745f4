use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "matterfs", version, about = "Mount cloud matters as a local drive")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount the drive and serve until interrupted
    Mount,
    /// Show mount and sync status
    Status,
    /// Trigger a sync cycle now
    Sync,
    /// Verify cache integrity, dropping corrupted entries
    Verify,
    /// List remote matters
    Matters,
    /// Show recent sync activity
    Log {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        count: usize,
    },
    /// List documents with a pending conflict decision
    Conflicts,
    /// Resolve a pending conflict
    Resolve {
        /// Document id with the pending conflict
        document_id: String,
        /// Decision: local, server, or both
        choice: String,
    },
    /// Show the effective configuration
    Config,
}

fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("matterfs")
        .join("matterfs.yaml")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);

    let result = match cli.command {
        Commands::Mount => commands::mount::run(&config_path).await,
        Commands::Status => commands::status::run(&config_path).await,
        Commands::Sync => commands::sync::run(&config_path).await,
        Commands::Verify => commands::verify::run(&config_path).await,
        Commands::Matters => commands::matters::run(&config_path).await,
        Commands::Log { count } => commands::log::run(&config_path, count).await,
        Commands::Conflicts => commands::resolve::list(&config_path).await,
        Commands::Resolve {
            document_id,
            choice,
        } => commands::resolve::run(&config_path, &document_id, &choice).await,
        Commands::Config => commands::config::run(&config_path).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
