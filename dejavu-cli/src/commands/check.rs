//! Check command implementation: gate an outgoing send.

use std::path::PathBuf;

use anyhow::Result;
use colored::Colorize;
use tracing::info;

use dejavu_core::{AttachmentMeta, OutgoingVerdict, StaticBytes};

use crate::exit_codes;
use crate::utils::{attachment_id_for, build_stack, read_image};

/// Execute the check command.
pub async fn execute(db: PathBuf, use_remote: bool, file: PathBuf, sender: String) -> Result<()> {
    let stack = build_stack(&db, use_remote)?;
    let bytes = read_image(&file)?;

    let meta = AttachmentMeta::new(attachment_id_for(&file), sender);
    let verdict = stack.gate.check_outgoing(&meta, &StaticBytes(bytes)).await;

    info!(?verdict, path = %file.display(), "Outgoing check completed");

    match verdict {
        OutgoingVerdict::New => {
            println!("{}", "NEW".green().bold());
            println!("   {} signature recorded in both tiers", "·".dimmed());
            Ok(())
        }
        OutgoingVerdict::LocallyBlocked => {
            println!("{}", "BLOCKED".red().bold());
            println!("   {} content already blocked on this device", "·".dimmed());
            std::process::exit(exit_codes::DUPLICATE);
        }
        OutgoingVerdict::LocallyDuplicate => {
            println!("{}", "DUPLICATE (local)".red().bold());
            println!("   {} matched a signature on this device", "·".dimmed());
            std::process::exit(exit_codes::DUPLICATE);
        }
        OutgoingVerdict::GloballyDuplicate => {
            println!("{}", "DUPLICATE (global)".red().bold());
            println!(
                "   {} already seen by the population, original sender unknown",
                "·".dimmed()
            );
            std::process::exit(exit_codes::DUPLICATE);
        }
    }
}
