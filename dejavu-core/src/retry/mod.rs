//! Blocked-download retry machinery.
//!
//! When a download is blocked, a retry record is queued; the scheduler
//! periodically re-validates the fingerprint against the remote store and
//! either reschedules with a larger backoff or promotes the attachment to
//! downloadable.

mod queue;
mod scheduler;

pub use queue::{RetryQueue, RetryQueueRecord};
pub use scheduler::{backoff_delay, AlwaysPresent, AttachmentDirectory, RetryScheduler};
