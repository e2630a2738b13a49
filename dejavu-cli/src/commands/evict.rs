//! Evict command implementation.

use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use colored::Colorize;

use crate::utils::build_stack;

/// Execute the evict command: one eviction pass over the local cache.
pub async fn execute(db: PathBuf) -> Result<()> {
    let stack = build_stack(&db, false)?;

    let evicted = stack.cache.evict_stale(Utc::now()).await?;

    println!(
        "{} {} stale unblocked record(s)",
        "evicted".bold(),
        evicted.to_string().green()
    );

    Ok(())
}
