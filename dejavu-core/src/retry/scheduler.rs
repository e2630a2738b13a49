//! Background re-validation of blocked downloads.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tokio::sync::{broadcast, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use super::queue::RetryQueue;
use crate::config::RetryConfig;
use crate::error::Result;
use crate::events::{DedupEvent, EventBus};
use crate::remote::{contains_or_false, SignatureStore};

/// Exponent guard; the delay cap takes over long before this.
const MAX_BACKOFF_EXPONENT: u32 = 20;

/// How the scheduler learns whether an attachment still exists.
///
/// The surrounding application may delete an attachment while its retry
/// record is pending; the scheduler then drops the record silently.
#[async_trait]
pub trait AttachmentDirectory: Send + Sync {
    async fn exists(&self, attachment_id: &str) -> bool;
}

/// Directory that never reports a deletion; for tools and tests where the
/// surrounding application does not prune attachments.
pub struct AlwaysPresent;

#[async_trait]
impl AttachmentDirectory for AlwaysPresent {
    async fn exists(&self, _attachment_id: &str) -> bool {
        true
    }
}

/// Compute the delay before attempt `attempt`: `base * 2^attempt`, capped,
/// with ±`jitter` multiplicative noise so clients don't retry in lockstep.
pub fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let exponent = attempt.min(MAX_BACKOFF_EXPONENT);
    let raw = config.base_delay.as_secs_f64() * 2f64.powi(exponent as i32);
    let capped = raw.min(config.max_delay.as_secs_f64());

    let spread = config.jitter.clamp(0.0, 1.0);
    let factor = 1.0 + spread * (rand::thread_rng().gen::<f64>() * 2.0 - 1.0);

    Duration::from_secs_f64((capped * factor).max(0.0))
}

/// Periodically resurrects due retry records, re-queries the remote store,
/// and either reschedules with a larger backoff or promotes the attachment
/// to downloadable.
pub struct RetryScheduler {
    queue: Arc<RetryQueue>,
    remote: Arc<dyn SignatureStore>,
    directory: Arc<dyn AttachmentDirectory>,
    events: EventBus,
    config: RetryConfig,
    poke: Notify,
}

impl RetryScheduler {
    pub fn new(
        queue: Arc<RetryQueue>,
        remote: Arc<dyn SignatureStore>,
        directory: Arc<dyn AttachmentDirectory>,
        events: EventBus,
        config: RetryConfig,
    ) -> Self {
        Self {
            queue,
            remote,
            directory,
            events,
            config,
            poke: Notify::new(),
        }
    }

    /// Wake the scheduler ahead of its next timer tick. Called when the
    /// surrounding app transitions from background to foreground.
    pub fn poke(&self) {
        self.poke.notify_one();
    }

    /// Run wake cycles until the shutdown channel fires. In-flight remote
    /// calls are abandoned on shutdown, not awaited to completion.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("retry scheduler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.poke.notified() => {
                    debug!("woken ahead of schedule");
                }
                _ = shutdown.recv() => {
                    debug!("retry scheduler stopping");
                    break;
                }
            }

            if let Err(e) = self.run_cycle().await {
                warn!(error = %e, "retry cycle failed");
            }
        }
    }

    /// One wake cycle: process at most one batch of due records.
    ///
    /// Returns the number of records processed.
    #[instrument(level = "debug", skip(self))]
    pub async fn run_cycle(&self) -> Result<usize> {
        let now = Utc::now();
        let due = self.queue.due(now, self.config.batch_size).await?;

        for record in &due {
            if !self.directory.exists(&record.attachment_id).await {
                debug!(
                    attachment_id = %record.attachment_id,
                    "attachment deleted, dropping retry record"
                );
                self.queue.remove(&record.attachment_id).await?;
                continue;
            }

            if contains_or_false(self.remote.as_ref(), &record.fingerprint).await {
                let attempt = record.retry_attempt + 1;
                let delay = backoff_delay(attempt, &self.config);
                let next = now
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| {
                        chrono::Duration::seconds(self.config.max_delay.as_secs() as i64)
                    });

                debug!(
                    attachment_id = %record.attachment_id,
                    attempt,
                    next_retry = %next,
                    "still blocked, rescheduling"
                );
                self.queue
                    .reschedule(&record.attachment_id, attempt, next)
                    .await?;
            } else {
                info!(
                    attachment_id = %record.attachment_id,
                    "no longer blocked, promoting to downloadable"
                );
                self.queue.remove(&record.attachment_id).await?;
                self.events.emit(DedupEvent::DownloadReady {
                    attachment_id: record.attachment_id.clone(),
                });
            }
        }

        Ok(due.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::db;
    use crate::remote::MockSignatureStore;
    use std::collections::HashSet;
    use tokio::sync::Mutex;

    struct SetDirectory(HashSet<String>);

    #[async_trait]
    impl AttachmentDirectory for SetDirectory {
        async fn exists(&self, attachment_id: &str) -> bool {
            self.0.contains(attachment_id)
        }
    }

    fn test_config() -> RetryConfig {
        RetryConfig {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(6 * 60 * 60),
            jitter: 0.25,
            batch_size: 4,
            tick_interval: Duration::from_secs(60),
        }
    }

    fn scheduler_with(
        remote: Arc<MockSignatureStore>,
        directory: Arc<dyn AttachmentDirectory>,
    ) -> (RetryScheduler, Arc<RetryQueue>, EventBus) {
        let conn = Arc::new(Mutex::new(db::open_memory().expect("open test db")));
        let queue = Arc::new(RetryQueue::new(conn));
        let events = EventBus::default();
        let scheduler = RetryScheduler::new(
            queue.clone(),
            remote,
            directory,
            events.clone(),
            test_config(),
        );
        (scheduler, queue, events)
    }

    #[test]
    fn test_backoff_delay_doubles_until_cap() {
        let config = test_config();

        for attempt in 0..5 {
            let current = backoff_delay(attempt, &config);
            let next = backoff_delay(attempt + 1, &config);
            // With ±25% jitter, the worst case for attempt n (1.25x) is
            // still below the best case for attempt n+1 (2 * 0.75x).
            assert!(
                next > current,
                "delay must grow: attempt {attempt} gave {current:?} then {next:?}"
            );
        }

        let at_cap = backoff_delay(30, &config);
        let ceiling = config.max_delay.as_secs_f64() * (1.0 + config.jitter);
        assert!(at_cap.as_secs_f64() <= ceiling, "cap bounds every delay");
    }

    #[tokio::test]
    async fn test_still_blocked_reschedules_with_growing_timestamps() {
        let remote = Arc::new(MockSignatureStore::new());
        remote.insert("fp-1").await;
        let (scheduler, queue, _events) =
            scheduler_with(remote, Arc::new(AlwaysPresent));

        let enqueued_at = Utc::now() - chrono::Duration::seconds(1);
        queue
            .enqueue("att-1", "fp-1", enqueued_at)
            .await
            .expect("enqueue");

        let mut previous = enqueued_at;
        for round in 1..=3u32 {
            scheduler.run_cycle().await.expect("cycle");

            let record = queue.get("att-1").await.expect("get").expect("present");
            assert_eq!(record.retry_attempt, round);
            assert!(
                record.min_retry_at > previous,
                "min_retry_at must strictly increase across the record's lifetime"
            );
            previous = record.min_retry_at;

            // Force the record due again for the next round.
            queue
                .reschedule("att-1", round, Utc::now() - chrono::Duration::seconds(1))
                .await
                .expect("force due");
        }
    }

    #[tokio::test]
    async fn test_unblocked_record_is_promoted() {
        let remote = Arc::new(MockSignatureStore::new());
        remote.insert("fp-1").await;
        let (scheduler, queue, events) =
            scheduler_with(remote.clone(), Arc::new(AlwaysPresent));
        let mut rx = events.subscribe();

        queue
            .enqueue("att-1", "fp-1", Utc::now() - chrono::Duration::seconds(1))
            .await
            .expect("enqueue");

        // The remote record disappears (external TTL).
        remote.remove("fp-1").await;

        let processed = scheduler.run_cycle().await.expect("cycle");
        assert_eq!(processed, 1);

        assert!(queue.get("att-1").await.expect("get").is_none());
        assert_eq!(
            rx.recv().await.expect("event"),
            DedupEvent::DownloadReady {
                attachment_id: "att-1".into()
            }
        );
    }

    #[tokio::test]
    async fn test_deleted_attachment_is_dropped_silently() {
        let remote = Arc::new(MockSignatureStore::new());
        remote.insert("fp-1").await;
        let (scheduler, queue, events) = scheduler_with(
            remote,
            Arc::new(SetDirectory(HashSet::new())), // nothing exists
        );
        let mut rx = events.subscribe();

        queue
            .enqueue("att-gone", "fp-1", Utc::now() - chrono::Duration::seconds(1))
            .await
            .expect("enqueue");

        scheduler.run_cycle().await.expect("cycle");

        assert!(queue.get("att-gone").await.expect("get").is_none());
        assert!(
            rx.try_recv().is_err(),
            "dropping an orphan emits no event"
        );
    }

    #[tokio::test]
    async fn test_remote_outage_promotes_fail_open() {
        let remote = Arc::new(MockSignatureStore::new());
        remote.insert("fp-1").await;
        remote.set_failing(true);
        let (scheduler, queue, _events) =
            scheduler_with(remote, Arc::new(AlwaysPresent));

        queue
            .enqueue("att-1", "fp-1", Utc::now() - chrono::Duration::seconds(1))
            .await
            .expect("enqueue");

        scheduler.run_cycle().await.expect("cycle");

        // Availability beats dedup completeness under a persistent outage.
        assert!(queue.get("att-1").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_run_loop_promotes_and_stops_on_shutdown() {
        let remote = Arc::new(MockSignatureStore::new());
        let (scheduler, queue, events) = scheduler_with(remote, Arc::new(AlwaysPresent));
        let mut rx = events.subscribe();

        queue
            .enqueue("att-1", "fp-unknown", Utc::now() - chrono::Duration::seconds(1))
            .await
            .expect("enqueue");

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let scheduler = Arc::new(scheduler);
        let task = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run(shutdown_rx).await }
        });

        // The wake cycle at startup promotes the unknown fingerprint.
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timely event")
            .expect("event");
        assert_eq!(
            event,
            DedupEvent::DownloadReady {
                attachment_id: "att-1".into()
            }
        );

        shutdown_tx.send(()).expect("signal shutdown");
        task.await.expect("join scheduler task");
    }

    #[tokio::test]
    async fn test_cycle_processes_at_most_one_batch() {
        let remote = Arc::new(MockSignatureStore::new());
        remote.insert("fp-1").await;
        let (scheduler, queue, _events) =
            scheduler_with(remote, Arc::new(AlwaysPresent));

        let past = Utc::now() - chrono::Duration::seconds(5);
        for i in 0..6 {
            queue
                .enqueue(&format!("att-{i}"), "fp-1", past)
                .await
                .expect("enqueue");
        }

        let processed = scheduler.run_cycle().await.expect("cycle");
        assert_eq!(processed, 4, "bounded by batch_size");
    }
}
