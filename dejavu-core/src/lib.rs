//! Dejavu Core - two-tier media signature dedup engine
//!
//! Detects whether an image has been seen before, on this device or
//! anywhere in a shared population of clients, and turns that into an
//! allow/block verdict for sends and downloads:
//!
//! - [`HashEngine`] derives a high-entropy content fingerprint and a coarse
//!   8×8 perceptual fingerprint per image
//! - [`LocalSignatureCache`] is the embedded, transactional device tier
//!   with fuzzy matching and retention-based eviction
//! - [`SignatureStore`] is the shared remote tier with idempotent
//!   conditional writes (see [`DynamoSignatureStore`])
//! - [`AttachmentGate`] composes the three into verdicts and write-through
//! - [`RetryScheduler`] re-validates blocked downloads on jittered
//!   exponential backoff
//!
//! Failures always degrade to "proceed": the only user-visible rejection
//! is a genuine duplicate verdict.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use tokio::sync::Mutex;
//!
//! use dejavu_core::cache::db;
//! use dejavu_core::{
//!     AttachmentGate, AttachmentMeta, DedupConfig, DynamoSignatureStore, EventBus, HashEngine,
//!     LocalSignatureCache, RetryQueue, StaticBytes,
//! };
//!
//! # async fn example() -> dejavu_core::Result<()> {
//! let config = DedupConfig::from_env();
//! let events = EventBus::default();
//! let conn = Arc::new(Mutex::new(db::open(Path::new("dejavu.db"))?));
//!
//! let cache = Arc::new(LocalSignatureCache::new(conn.clone(), events.clone(), &config));
//! let remote = Arc::new(DynamoSignatureStore::new(config.remote.clone()));
//! let queue = Arc::new(RetryQueue::new(conn));
//!
//! let gate = AttachmentGate::new(
//!     HashEngine::new(config.similarity_threshold),
//!     cache,
//!     remote,
//!     queue,
//!     events.clone(),
//!     config.retry.clone(),
//! );
//!
//! let image = std::fs::read("photo.jpg").unwrap();
//! let meta = AttachmentMeta::new("attachment-1", "self");
//! let verdict = gate.check_outgoing(&meta, &StaticBytes(image)).await;
//! println!("send allowed: {}", verdict.allows_send());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod hash;
pub mod remote;
pub mod retry;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export main types for convenience
pub use cache::{CacheDiagnostics, LocalSignatureCache, SignatureRecord};
pub use config::{DedupConfig, RemoteConfig, RetryConfig};
pub use error::{DejavuError, Result};
pub use events::{DedupEvent, EventBus};
pub use gate::{
    AttachmentGate, AttachmentMeta, BytesSource, DownloadVerdict, OutgoingVerdict, StaticBytes,
};
pub use hash::{FingerprintPair, HashEngine};
pub use remote::{DynamoSignatureStore, MockSignatureStore, SignatureStore};
pub use retry::{
    AlwaysPresent, AttachmentDirectory, RetryQueue, RetryQueueRecord, RetryScheduler,
};
