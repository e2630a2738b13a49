//! Dejavu CLI - media dedup inspection tool.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod exit_codes;
mod utils;

#[derive(Parser)]
#[command(name = "dejavu")]
#[command(author, version, about = "Media signature dedup inspection", long_about = None)]
struct Cli {
    /// Path to the local signature database
    #[arg(long, global = true, default_value = "dejavu.db")]
    db: PathBuf,

    /// Check against the configured remote signature table instead of an
    /// empty in-memory one
    #[arg(long, global = true)]
    remote: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print both fingerprints of an image
    Hash {
        /// Path to the image
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Gate an outgoing send of an image
    Check {
        /// Path to the image
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Sender recorded for new signatures
        #[arg(long, default_value = "local-operator")]
        sender: String,
    },

    /// Validate an incoming download
    Receive {
        /// Path to the image, when the bytes are available
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,

        /// Sender-claimed content fingerprint
        #[arg(long)]
        fingerprint: Option<String>,

        /// Attachment id recorded in the retry queue
        #[arg(long, default_value = "cli-attachment")]
        attachment_id: String,

        /// Originating sender
        #[arg(long, default_value = "remote-sender")]
        sender: String,
    },

    /// Show cache and retry-queue diagnostics
    Stats,

    /// Run one eviction pass over the local cache
    Evict,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Hash { file } => commands::hash::execute(file).await,
        Commands::Check { file, sender } => {
            commands::check::execute(cli.db, cli.remote, file, sender).await
        }
        Commands::Receive {
            file,
            fingerprint,
            attachment_id,
            sender,
        } => {
            commands::receive::execute(cli.db, cli.remote, file, fingerprint, attachment_id, sender)
                .await
        }
        Commands::Stats => commands::stats::execute(cli.db).await,
        Commands::Evict => commands::evict::execute(cli.db).await,
    }
}
