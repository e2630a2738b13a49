//! Hash command implementation.

use std::path::PathBuf;

use anyhow::Result;
use colored::Colorize;
use tracing::info;

use dejavu_core::HashEngine;

use crate::utils::read_image;

/// Execute the hash command.
pub async fn execute(file: PathBuf) -> Result<()> {
    let bytes = read_image(&file)?;
    info!(path = %file.display(), bytes = bytes.len(), "Read file");

    let pair = HashEngine::default().fingerprint(&bytes)?;

    println!("{}  {}", "content:".dimmed(), pair.content);
    println!("{}  {}", "perceptual:".dimmed(), pair.perceptual);

    Ok(())
}
