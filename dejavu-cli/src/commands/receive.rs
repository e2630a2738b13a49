//! Receive command implementation: validate an incoming download.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use colored::Colorize;
use tracing::info;

use dejavu_core::{AttachmentMeta, BytesSource, DownloadVerdict, StaticBytes};

use crate::exit_codes;
use crate::utils::{build_stack, read_image};

/// Source for a download whose bytes have not arrived.
struct NoBytes;

#[async_trait]
impl BytesSource for NoBytes {
    async fn bytes(&self) -> std::io::Result<Vec<u8>> {
        Err(std::io::Error::other("bytes not yet downloaded"))
    }
}

/// Execute the receive command.
pub async fn execute(
    db: PathBuf,
    use_remote: bool,
    file: Option<PathBuf>,
    fingerprint: Option<String>,
    attachment_id: String,
    sender: String,
) -> Result<()> {
    let stack = build_stack(&db, use_remote)?;
    let meta = AttachmentMeta::new(attachment_id, sender);

    let verdict = match &file {
        Some(path) => {
            let bytes = read_image(path)?;
            stack
                .gate
                .check_download(&meta, fingerprint.as_deref(), &StaticBytes(bytes))
                .await
        }
        None => {
            stack
                .gate
                .check_download(&meta, fingerprint.as_deref(), &NoBytes)
                .await
        }
    };

    info!(?verdict, attachment_id = %meta.attachment_id, "Download validation completed");

    match verdict {
        DownloadVerdict::Allowed => {
            println!("{}", "ALLOWED".green().bold());
            Ok(())
        }
        DownloadVerdict::Blocked => {
            println!("{}", "BLOCKED".red().bold());
            if let Some(record) = stack.queue.get(&meta.attachment_id).await? {
                println!(
                    "   {} retry attempt {} scheduled for {}",
                    "·".dimmed(),
                    record.retry_attempt,
                    record.min_retry_at.to_rfc3339()
                );
            }
            std::process::exit(exit_codes::DUPLICATE);
        }
    }
}
