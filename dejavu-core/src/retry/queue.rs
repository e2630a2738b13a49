//! Persistent queue of blocked download candidates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tokio::sync::Mutex;

use crate::error::Result;

/// A download candidate awaiting re-validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryQueueRecord {
    pub attachment_id: String,
    pub fingerprint: String,
    pub retry_attempt: u32,
    /// Next time this record is eligible for a retry pass.
    pub min_retry_at: DateTime<Utc>,
}

/// Exclusive owner of the `retry_queue` table.
pub struct RetryQueue {
    conn: Arc<Mutex<Connection>>,
}

impl RetryQueue {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Queue an attachment for re-validation. Re-enqueueing an attachment
    /// already in the queue keeps its existing backoff state.
    pub async fn enqueue(
        &self,
        attachment_id: &str,
        fingerprint: &str,
        min_retry_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO retry_queue (attachment_id, fingerprint, retry_attempt, min_retry_at)
             VALUES (?1, ?2, 0, ?3)",
            params![attachment_id, fingerprint, min_retry_at],
        )?;
        Ok(())
    }

    /// The next due records, ordered by eligibility time.
    pub async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<RetryQueueRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT attachment_id, fingerprint, retry_attempt, min_retry_at
             FROM retry_queue WHERE min_retry_at <= ?1
             ORDER BY min_retry_at ASC LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![now, limit as i64], row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Push a record out to its next attempt. A single statement, so a
    /// cancelled pass never leaves a half-updated retry count.
    pub async fn reschedule(
        &self,
        attachment_id: &str,
        retry_attempt: u32,
        min_retry_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE retry_queue SET retry_attempt = ?2, min_retry_at = ?3
             WHERE attachment_id = ?1",
            params![attachment_id, retry_attempt, min_retry_at],
        )?;
        Ok(())
    }

    /// Drop a record, whether promoted or orphaned.
    pub async fn remove(&self, attachment_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM retry_queue WHERE attachment_id = ?1",
            [attachment_id],
        )?;
        Ok(())
    }

    /// Fetch a record by attachment id.
    pub async fn get(&self, attachment_id: &str) -> Result<Option<RetryQueueRecord>> {
        let conn = self.conn.lock().await;
        match conn.query_row(
            "SELECT attachment_id, fingerprint, retry_attempt, min_retry_at
             FROM retry_queue WHERE attachment_id = ?1",
            [attachment_id],
            row_to_record,
        ) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of queued records.
    pub async fn len(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT COUNT(*) FROM retry_queue", [], |row| {
            row.get::<_, i64>(0).map(|n| n as u64)
        })
        .map_err(Into::into)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<RetryQueueRecord> {
    Ok(RetryQueueRecord {
        attachment_id: row.get(0)?,
        fingerprint: row.get(1)?,
        retry_attempt: row.get::<_, i64>(2)? as u32,
        min_retry_at: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::db;

    fn test_queue() -> RetryQueue {
        let conn = Arc::new(Mutex::new(db::open_memory().expect("open test db")));
        RetryQueue::new(conn)
    }

    #[tokio::test]
    async fn test_enqueue_and_get() {
        let queue = test_queue();
        let at = Utc::now();

        queue.enqueue("att-1", "fp-1", at).await.expect("enqueue");

        let record = queue.get("att-1").await.expect("get").expect("present");
        assert_eq!(record.fingerprint, "fp-1");
        assert_eq!(record.retry_attempt, 0);
        assert_eq!(queue.len().await.expect("len"), 1);
    }

    #[tokio::test]
    async fn test_enqueue_keeps_existing_backoff_state() {
        let queue = test_queue();
        let now = Utc::now();

        queue.enqueue("att-1", "fp-1", now).await.expect("enqueue");
        queue
            .reschedule("att-1", 3, now + chrono::Duration::minutes(8))
            .await
            .expect("reschedule");

        // A repeat enqueue must not reset the attempt counter.
        queue.enqueue("att-1", "fp-1", now).await.expect("enqueue");

        let record = queue.get("att-1").await.expect("get").expect("present");
        assert_eq!(record.retry_attempt, 3);
    }

    #[tokio::test]
    async fn test_due_orders_and_limits() {
        let queue = test_queue();
        let now = Utc::now();

        queue
            .enqueue("att-late", "fp", now - chrono::Duration::seconds(10))
            .await
            .expect("enqueue");
        queue
            .enqueue("att-early", "fp", now - chrono::Duration::seconds(60))
            .await
            .expect("enqueue");
        queue
            .enqueue("att-future", "fp", now + chrono::Duration::seconds(60))
            .await
            .expect("enqueue");

        let due = queue.due(now, 10).await.expect("due");
        assert_eq!(due.len(), 2, "future record is not due");
        assert_eq!(due[0].attachment_id, "att-early");
        assert_eq!(due[1].attachment_id, "att-late");

        let one = queue.due(now, 1).await.expect("due");
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].attachment_id, "att-early");
    }

    #[tokio::test]
    async fn test_remove() {
        let queue = test_queue();
        queue
            .enqueue("att-1", "fp-1", Utc::now())
            .await
            .expect("enqueue");

        queue.remove("att-1").await.expect("remove");
        assert!(queue.get("att-1").await.expect("get").is_none());
        assert!(queue.is_empty().await.expect("is_empty"));

        // Removing a missing record is a no-op.
        queue.remove("att-1").await.expect("remove again");
    }
}
