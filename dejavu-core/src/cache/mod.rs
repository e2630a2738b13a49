//! Local signature cache.
//!
//! Device-local tier of the dedup pipeline: a SQLite table mapping
//! perceptual fingerprints to sender, creation time and blocked state.
//! Lookups support fuzzy matching against every stored record via a
//! full-table scan, which trades scalability for simplicity at device
//! scale. Unblocked records age out after a retention
//! window; blocked records are retained indefinitely, since dropping them
//! would re-allow previously-flagged content.

pub mod db;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::config::DedupConfig;
use crate::error::Result;
use crate::events::{DedupEvent, EventBus};
use crate::hash;

/// A signature record in the local cache.
#[derive(Debug, Clone, Serialize)]
pub struct SignatureRecord {
    /// Perceptual fingerprint (primary key).
    pub id: String,
    /// Content fingerprint, when one was computed.
    pub vision_id: Option<String>,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Originating party.
    pub sender_id: String,
    /// Whether this content is blocked. Monotonic: never flips back.
    pub is_blocked: bool,
}

/// Record counts for operational visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheDiagnostics {
    pub total: u64,
    pub blocked: u64,
}

/// The device-local signature cache.
pub struct LocalSignatureCache {
    conn: Arc<Mutex<Connection>>,
    events: EventBus,
    similarity_threshold: f64,
    retention: chrono::Duration,
    eviction_interval: std::time::Duration,
}

impl LocalSignatureCache {
    /// Create a cache over a shared database handle.
    pub fn new(conn: Arc<Mutex<Connection>>, events: EventBus, config: &DedupConfig) -> Self {
        let retention = chrono::Duration::from_std(config.retention)
            .unwrap_or_else(|_| chrono::Duration::days(7));

        Self {
            conn,
            events,
            similarity_threshold: config.similarity_threshold,
            retention,
            eviction_interval: config.eviction_interval,
        }
    }

    /// Whether a record exists for this fingerprint, exactly or fuzzily.
    pub async fn contains(&self, fingerprint: &str) -> Result<bool> {
        Ok(self.find_match(fingerprint).await?.is_some())
    }

    /// The record backing [`contains`](Self::contains): an exact-key match
    /// if one exists, otherwise the first stored record whose id is similar
    /// at the configured threshold.
    pub async fn find_match(&self, fingerprint: &str) -> Result<Option<SignatureRecord>> {
        let conn = self.conn.lock().await;
        find_match_locked(&conn, fingerprint, self.similarity_threshold)
    }

    /// Insert a record keyed by perceptual fingerprint. A repeat insert for
    /// the same key keeps the original record.
    #[instrument(level = "debug", skip(self, content_fp))]
    pub async fn store(
        &self,
        content_fp: &str,
        perceptual_fp: &str,
        sender_id: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        db::insert_signature(&conn, perceptual_fp, Some(content_fp), sender_id, Utc::now())
    }

    /// Flip the matching record (exact or fuzzy) to blocked and emit a
    /// [`DedupEvent::DuplicateDetected`] to subscribers.
    ///
    /// The notification is fire-and-forget and happens outside the
    /// transactional write. Returns the id of the record actually blocked,
    /// if one matched.
    #[instrument(level = "debug", skip(self, original_sender))]
    pub async fn block(
        &self,
        fingerprint: &str,
        attachment_id: &str,
        original_sender: Option<String>,
    ) -> Result<Option<String>> {
        let blocked_id = {
            let mut conn = self.conn.lock().await;
            let tx = conn.transaction()?;
            let matched = find_match_locked(&tx, fingerprint, self.similarity_threshold)?;
            if let Some(record) = &matched {
                db::set_blocked(&tx, &record.id)?;
            }
            tx.commit()?;
            matched.map(|r| r.id)
        };

        if blocked_id.is_none() {
            debug!(fingerprint, "no matching record to block");
        }

        self.events.emit(DedupEvent::DuplicateDetected {
            attachment_id: attachment_id.to_string(),
            fingerprint: fingerprint.to_string(),
            original_sender,
        });

        Ok(blocked_id)
    }

    /// Exact-key blocked check.
    pub async fn is_blocked(&self, fingerprint: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        Ok(db::get_signature(&conn, fingerprint)?
            .map(|r| r.is_blocked)
            .unwrap_or(false))
    }

    /// Exact-key lookup of the originating sender.
    pub async fn original_sender(&self, fingerprint: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        Ok(db::get_signature(&conn, fingerprint)?.map(|r| r.sender_id))
    }

    /// Record counts, for operational visibility.
    pub async fn diagnostics(&self) -> Result<CacheDiagnostics> {
        let conn = self.conn.lock().await;
        let (total, blocked) = db::counts(&conn)?;
        Ok(CacheDiagnostics { total, blocked })
    }

    /// One eviction pass: delete unblocked records older than the retention
    /// window. Returns the number of records removed.
    pub async fn evict_stale(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().await;
        db::evict_stale(&conn, now - self.retention)
    }

    /// Run eviction passes on the configured interval until shutdown.
    pub async fn run_eviction(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.eviction_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.evict_stale(Utc::now()).await {
                        Ok(0) => {}
                        Ok(evicted) => info!(evicted, "evicted stale signature records"),
                        Err(e) => warn!(error = %e, "eviction pass failed"),
                    }
                }
                _ = shutdown.recv() => {
                    debug!("eviction loop stopping");
                    break;
                }
            }
        }
    }
}

/// Exact match first, then the fuzzy full-table scan.
fn find_match_locked(
    conn: &Connection,
    fingerprint: &str,
    threshold: f64,
) -> Result<Option<SignatureRecord>> {
    if let Some(record) = db::get_signature(conn, fingerprint)? {
        return Ok(Some(record));
    }

    for record in db::all_signatures(conn)? {
        if hash::is_similar(fingerprint, &record.id, threshold) {
            return Ok(Some(record));
        }
    }
    Ok(None)
}
