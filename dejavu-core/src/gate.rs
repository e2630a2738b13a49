//! The attachment gate.
//!
//! Decision point invoked before an attachment is sent or downloaded.
//! Composes the hash engine, local cache and remote store into an
//! allow/block verdict, writing new signatures through both tiers.
//!
//! No failure here may abort message traffic: decode errors, remote
//! outages and local persistence errors all degrade to "proceed". The only
//! user-visible rejection is a genuine duplicate verdict.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, instrument, warn};

use crate::cache::LocalSignatureCache;
use crate::config::RetryConfig;
use crate::error::{DejavuError, Result};
use crate::events::{DedupEvent, EventBus};
use crate::hash::{FingerprintPair, HashEngine};
use crate::remote::{contains_or_false, SignatureStore};
use crate::retry::{backoff_delay, RetryQueue};

/// Identity of a candidate attachment.
#[derive(Debug, Clone)]
pub struct AttachmentMeta {
    pub attachment_id: String,
    pub sender_id: String,
}

impl AttachmentMeta {
    pub fn new(attachment_id: impl Into<String>, sender_id: impl Into<String>) -> Self {
        Self {
            attachment_id: attachment_id.into(),
            sender_id: sender_id.into(),
        }
    }
}

/// Supplies a candidate's image bytes on demand. The gate never persists
/// the bytes themselves.
#[async_trait]
pub trait BytesSource: Send + Sync {
    async fn bytes(&self) -> std::io::Result<Vec<u8>>;
}

/// Bytes already resident in memory.
pub struct StaticBytes(pub Vec<u8>);

#[async_trait]
impl BytesSource for StaticBytes {
    async fn bytes(&self) -> std::io::Result<Vec<u8>> {
        Ok(self.0.clone())
    }
}

/// Verdict for an outgoing send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingVerdict {
    /// First sighting; signatures were written through both tiers.
    New,
    /// The local record for this content was already blocked.
    LocallyBlocked,
    /// Matched (exactly or fuzzily) a record in the local cache.
    LocallyDuplicate,
    /// Unknown locally but already seen by the shared population.
    GloballyDuplicate,
}

impl OutgoingVerdict {
    pub fn allows_send(&self) -> bool {
        matches!(self, Self::New)
    }
}

/// Verdict for an incoming download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadVerdict {
    Allowed,
    /// Deferred; a retry record was queued for re-validation.
    Blocked,
}

impl DownloadVerdict {
    pub fn allows_download(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// The dedup decision point.
///
/// Collaborators are injected explicitly so tests can substitute fakes.
pub struct AttachmentGate {
    hash: HashEngine,
    cache: Arc<LocalSignatureCache>,
    remote: Arc<dyn SignatureStore>,
    retry_queue: Arc<RetryQueue>,
    events: EventBus,
    retry_config: RetryConfig,
}

impl AttachmentGate {
    pub fn new(
        hash: HashEngine,
        cache: Arc<LocalSignatureCache>,
        remote: Arc<dyn SignatureStore>,
        retry_queue: Arc<RetryQueue>,
        events: EventBus,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            hash,
            cache,
            remote,
            retry_queue,
            events,
            retry_config,
        }
    }

    /// Gate an outgoing send.
    ///
    /// Infallible by design: anything short of a genuine duplicate verdict
    /// degrades to [`OutgoingVerdict::New`] so sending is never aborted by
    /// this subsystem.
    #[instrument(level = "debug", skip(self, source), fields(attachment_id = %meta.attachment_id))]
    pub async fn check_outgoing(
        &self,
        meta: &AttachmentMeta,
        source: &dyn BytesSource,
    ) -> OutgoingVerdict {
        match self.check_outgoing_inner(meta, source).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, "outgoing dedup check failed, allowing send");
                OutgoingVerdict::New
            }
        }
    }

    async fn check_outgoing_inner(
        &self,
        meta: &AttachmentMeta,
        source: &dyn BytesSource,
    ) -> Result<OutgoingVerdict> {
        let Some(pair) = self.fingerprints(source).await? else {
            return Ok(OutgoingVerdict::New);
        };

        if self.cache.is_blocked(&pair.perceptual).await? {
            let original_sender = self.cache.original_sender(&pair.perceptual).await?;
            self.cache
                .block(&pair.perceptual, &meta.attachment_id, original_sender)
                .await?;
            debug!("send rejected, content already blocked locally");
            return Ok(OutgoingVerdict::LocallyBlocked);
        }

        if let Some(existing) = self.cache.find_match(&pair.perceptual).await? {
            self.cache
                .block(
                    &pair.perceptual,
                    &meta.attachment_id,
                    Some(existing.sender_id),
                )
                .await?;
            debug!("send rejected, local duplicate");
            return Ok(OutgoingVerdict::LocallyDuplicate);
        }

        if contains_or_false(self.remote.as_ref(), &pair.content).await {
            // Remember the sighting locally so the next check is cheap,
            // then block it. The original sender is unknown at this tier.
            self.cache
                .store(&pair.content, &pair.perceptual, &meta.sender_id)
                .await?;
            self.cache
                .block(&pair.perceptual, &meta.attachment_id, None)
                .await?;
            debug!("send rejected, fingerprint known to the population");
            return Ok(OutgoingVerdict::GloballyDuplicate);
        }

        // First sighting: write through both tiers. A remote failure stays
        // fail-open; the local record alone still catches local resends.
        self.cache
            .store(&pair.content, &pair.perceptual, &meta.sender_id)
            .await?;
        if let Err(e) = self.remote.store(&pair.content).await {
            warn!(error = %e, "remote write-through failed, proceeding");
        }

        Ok(OutgoingVerdict::New)
    }

    /// Validate an incoming download.
    ///
    /// `provided_fingerprint` is the sender-claimed content fingerprint,
    /// used when the bytes are not yet (or never) available. Infallible for
    /// the same reason as [`check_outgoing`](Self::check_outgoing).
    #[instrument(
        level = "debug",
        skip(self, provided_fingerprint, source),
        fields(attachment_id = %meta.attachment_id)
    )]
    pub async fn check_download(
        &self,
        meta: &AttachmentMeta,
        provided_fingerprint: Option<&str>,
        source: &dyn BytesSource,
    ) -> DownloadVerdict {
        match self
            .check_download_inner(meta, provided_fingerprint, source)
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, "download validation failed, allowing download");
                DownloadVerdict::Allowed
            }
        }
    }

    async fn check_download_inner(
        &self,
        meta: &AttachmentMeta,
        provided_fingerprint: Option<&str>,
        source: &dyn BytesSource,
    ) -> Result<DownloadVerdict> {
        let pair = self.fingerprints(source).await?;

        let content_fp = match (provided_fingerprint, &pair) {
            (Some(provided), _) => provided.to_string(),
            (None, Some(pair)) => pair.content.clone(),
            (None, None) => {
                debug!("no fingerprint available, allowing download");
                return Ok(DownloadVerdict::Allowed);
            }
        };

        // Record the sighting locally (without blocking) so future fuzzy
        // matches can reference it, whatever the verdict.
        if let Some(pair) = &pair {
            self.cache
                .store(&pair.content, &pair.perceptual, &meta.sender_id)
                .await?;
        }

        if contains_or_false(self.remote.as_ref(), &content_fp).await {
            self.events.emit(DedupEvent::DownloadBlocked {
                attachment_id: meta.attachment_id.clone(),
                fingerprint: content_fp.clone(),
            });

            let first_retry = Utc::now()
                + chrono::Duration::from_std(backoff_delay(0, &self.retry_config))
                    .unwrap_or_else(|_| chrono::Duration::seconds(60));
            self.retry_queue
                .enqueue(&meta.attachment_id, &content_fp, first_retry)
                .await?;

            debug!("download deferred, fingerprint known to the population");
            return Ok(DownloadVerdict::Blocked);
        }

        Ok(DownloadVerdict::Allowed)
    }

    /// Compute both fingerprints, treating unreadable or undecodable bytes
    /// as "no fingerprint" per the fail-open policy.
    async fn fingerprints(&self, source: &dyn BytesSource) -> Result<Option<FingerprintPair>> {
        let bytes = match source.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(error = %e, "attachment bytes unavailable");
                return Ok(None);
            }
        };

        match self.hash.fingerprint(&bytes) {
            Ok(pair) => Ok(Some(pair)),
            Err(DejavuError::Decode(e)) => {
                debug!(error = %e, "undecodable image");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
