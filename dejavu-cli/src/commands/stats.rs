//! Stats command implementation.

use std::path::PathBuf;

use anyhow::Result;
use colored::Colorize;

use crate::utils::build_stack;

/// Execute the stats command.
pub async fn execute(db: PathBuf) -> Result<()> {
    let stack = build_stack(&db, false)?;

    let diag = stack.cache.diagnostics().await?;
    let queued = stack.queue.len().await?;

    println!("{}", "Local signature cache".bold());
    println!("   {}  {}", "total:".dimmed(), diag.total);
    println!("   {}  {}", "blocked:".dimmed(), diag.blocked);
    println!("{}", "Retry queue".bold());
    println!("   {}  {}", "pending:".dimmed(), queued);

    Ok(())
}
