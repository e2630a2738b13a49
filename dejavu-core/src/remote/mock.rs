//! In-memory signature store for testing and offline operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::SignatureStore;
use crate::error::{DejavuError, Result};

/// In-memory [`SignatureStore`] with switchable outage injection.
#[derive(Default)]
pub struct MockSignatureStore {
    seen: Mutex<HashMap<String, String>>,
    failing: AtomicBool,
}

impl MockSignatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a fingerprint the population has already seen.
    pub async fn insert(&self, content_fp: &str) {
        self.seen
            .lock()
            .await
            .insert(content_fp.to_string(), Utc::now().to_rfc3339());
    }

    /// Simulate the record being removed externally (infrastructure TTL).
    pub async fn remove(&self, content_fp: &str) {
        self.seen.lock().await.remove(content_fp);
    }

    /// While set, every call fails with a simulated outage.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// The stored first-seen timestamp, if any.
    pub async fn first_seen(&self, content_fp: &str) -> Option<String> {
        self.seen.lock().await.get(content_fp).cloned()
    }

    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }

    fn check_outage(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(DejavuError::Remote("simulated outage".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SignatureStore for MockSignatureStore {
    async fn contains(&self, content_fp: &str) -> Result<bool> {
        self.check_outage()?;
        Ok(self.seen.lock().await.contains_key(content_fp))
    }

    async fn store(&self, content_fp: &str) -> Result<()> {
        self.check_outage()?;
        let mut seen = self.seen.lock().await;
        // Conditional write: the first writer's timestamp stays.
        seen.entry(content_fp.to_string())
            .or_insert_with(|| Utc::now().to_rfc3339());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_contains() {
        let store = MockSignatureStore::new();

        assert!(!store.contains("fp-1").await.expect("contains"));
        store.store("fp-1").await.expect("store");
        assert!(store.contains("fp-1").await.expect("contains"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_store_is_idempotent() {
        let store = MockSignatureStore::new();
        store
            .seen
            .lock()
            .await
            .insert("fp-1".to_string(), "2001-01-01T00:00:00+00:00".to_string());

        store.store("fp-1").await.expect("second store succeeds");

        assert_eq!(
            store.first_seen("fp-1").await.as_deref(),
            Some("2001-01-01T00:00:00+00:00"),
            "firstSeen is never overwritten"
        );
    }

    #[tokio::test]
    async fn test_outage_injection() {
        let store = MockSignatureStore::new();
        store.set_failing(true);

        assert!(store.contains("fp-1").await.is_err());
        assert!(store.store("fp-1").await.is_err());

        store.set_failing(false);
        assert!(store.store("fp-1").await.is_ok());
    }
}
