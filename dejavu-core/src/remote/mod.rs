//! Remote signature store.
//!
//! Client for the shared, population-wide signature table: a key-value
//! table mapping content fingerprints to first-seen timestamps, reached
//! over HTTPS with short-lived broker-issued credentials.
//!
//! Availability of the surrounding messaging function always beats dedup
//! completeness: reads degrade to "unseen" on any failure (see
//! [`contains_or_false`]) and writes are conditional, idempotent
//! first-writer-wins operations.

mod dynamo;
mod mock;

pub use dynamo::DynamoSignatureStore;
pub use mock::MockSignatureStore;

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;

/// A shared signature table keyed by content fingerprint.
///
/// Implementations must be thread-safe (`Send + Sync`); retries for
/// different calls must not block each other.
#[async_trait]
pub trait SignatureStore: Send + Sync {
    /// Point lookup: whether the population has already seen this
    /// fingerprint.
    async fn contains(&self, content_fp: &str) -> Result<bool>;

    /// Conditional write: record the fingerprint only if absent. A repeat
    /// write for the same key is a silent success and never overwrites the
    /// first-seen timestamp.
    async fn store(&self, content_fp: &str) -> Result<()>;
}

/// The fail-open read used on every decision path: any transport or
/// service error degrades to "unseen" so a remote outage never converts
/// into blocking legitimate traffic.
pub async fn contains_or_false(store: &dyn SignatureStore, content_fp: &str) -> bool {
    match store.contains(content_fp).await {
        Ok(seen) => seen,
        Err(e) => {
            warn!(error = %e, "remote lookup failed, treating fingerprint as unseen");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_contains_or_false_passes_through() {
        let store = MockSignatureStore::new();
        store.insert("fp-1").await;

        assert!(contains_or_false(&store, "fp-1").await);
        assert!(!contains_or_false(&store, "fp-2").await);
    }

    #[tokio::test]
    async fn test_contains_or_false_degrades_on_outage() {
        let store = MockSignatureStore::new();
        store.insert("fp-1").await;
        store.set_failing(true);

        assert!(!contains_or_false(&store, "fp-1").await);
    }
}
