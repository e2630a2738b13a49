//! Shared plumbing for CLI commands.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;

use dejavu_core::cache::db;
use dejavu_core::{
    AttachmentGate, DedupConfig, DynamoSignatureStore, EventBus, HashEngine, LocalSignatureCache,
    MockSignatureStore, RetryQueue, SignatureStore,
};

/// The wired-up engine, shared by the gate-driving commands.
pub struct Stack {
    pub gate: AttachmentGate,
    pub cache: Arc<LocalSignatureCache>,
    pub queue: Arc<RetryQueue>,
}

/// Open the local database and wire up the full engine stack.
///
/// Without `--remote`, verdicts run against an empty in-memory remote so
/// they reflect local state only.
pub fn build_stack(db_path: &Path, use_remote: bool) -> Result<Stack> {
    let config = DedupConfig::from_env();
    let events = EventBus::default();

    let conn = db::open(db_path)
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
    let conn = Arc::new(Mutex::new(conn));

    let cache = Arc::new(LocalSignatureCache::new(
        conn.clone(),
        events.clone(),
        &config,
    ));
    let queue = Arc::new(RetryQueue::new(conn));

    let remote: Arc<dyn SignatureStore> = if use_remote {
        Arc::new(DynamoSignatureStore::new(config.remote.clone()))
    } else {
        Arc::new(MockSignatureStore::new())
    };

    let gate = AttachmentGate::new(
        HashEngine::new(config.similarity_threshold),
        cache.clone(),
        remote,
        queue.clone(),
        events.clone(),
        config.retry.clone(),
    );

    Ok(Stack { gate, cache, queue })
}

/// Read an image file for fingerprinting.
pub fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))
}

/// Derive a stable attachment id from a file path.
pub fn attachment_id_for(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("attachment")
        .to_string()
}
