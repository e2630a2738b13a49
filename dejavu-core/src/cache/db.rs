//! Embedded-store plumbing: connection setup, schema, and row-level
//! queries for the signature and retry tables.
//!
//! WAL mode keeps readers unblocked by writers beyond transaction
//! granularity; every mutating operation here is a single statement or an
//! explicit transaction at the call site.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::SignatureRecord;
use crate::error::Result;

/// Complete schema for the dedup store.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS signatures (
    id         TEXT PRIMARY KEY,
    vision_id  TEXT,
    timestamp  DATETIME NOT NULL,
    sender_id  TEXT NOT NULL,
    is_blocked BOOLEAN NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_signatures_timestamp ON signatures(timestamp);

CREATE TABLE IF NOT EXISTS retry_queue (
    attachment_id TEXT PRIMARY KEY,
    fingerprint   TEXT NOT NULL,
    retry_attempt INTEGER NOT NULL DEFAULT 0,
    min_retry_at  DATETIME NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_retry_queue_due ON retry_queue(min_retry_at);
"#;

/// Open or create the dedup database at the given path.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    migrate(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrate(&conn)?;
    Ok(conn)
}

/// Configure SQLite pragmas.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Insert a signature record, keeping any existing record for the key.
///
/// Keys are content-derived, so a second insert for the same key is the
/// same content seen again; the first record wins.
pub(crate) fn insert_signature(
    conn: &Connection,
    id: &str,
    vision_id: Option<&str>,
    sender_id: &str,
    timestamp: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO signatures (id, vision_id, timestamp, sender_id, is_blocked)
         VALUES (?1, ?2, ?3, ?4, 0)",
        params![id, vision_id, timestamp, sender_id],
    )?;
    Ok(())
}

/// Get a signature record by exact key.
pub(crate) fn get_signature(conn: &Connection, id: &str) -> Result<Option<SignatureRecord>> {
    match conn.query_row(
        "SELECT id, vision_id, timestamp, sender_id, is_blocked
         FROM signatures WHERE id = ?1",
        [id],
        row_to_record,
    ) {
        Ok(record) => Ok(Some(record)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// List every signature record, for the fuzzy-match scan.
pub(crate) fn all_signatures(conn: &Connection) -> Result<Vec<SignatureRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, vision_id, timestamp, sender_id, is_blocked FROM signatures",
    )?;

    let rows = stmt
        .query_map([], row_to_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Flip a record to blocked. Blocking is monotonic; nothing unsets it.
pub(crate) fn set_blocked(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("UPDATE signatures SET is_blocked = 1 WHERE id = ?1", [id])?;
    Ok(())
}

/// Total and blocked record counts.
pub(crate) fn counts(conn: &Connection) -> Result<(u64, u64)> {
    conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(is_blocked), 0) FROM signatures",
        [],
        |row| {
            Ok((
                row.get::<_, i64>(0)? as u64,
                row.get::<_, i64>(1)? as u64,
            ))
        },
    )
    .map_err(Into::into)
}

/// Delete unblocked records older than the cutoff. Blocked records are
/// retained indefinitely.
pub(crate) fn evict_stale(conn: &Connection, cutoff: DateTime<Utc>) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM signatures WHERE timestamp < ?1 AND is_blocked = 0",
        params![cutoff],
    )?;
    Ok(deleted)
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<SignatureRecord> {
    Ok(SignatureRecord {
        id: row.get(0)?,
        vision_id: row.get(1)?,
        timestamp: row.get(2)?,
        sender_id: row.get(3)?,
        is_blocked: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory_has_schema() {
        let conn = open_memory().expect("open in-memory db");
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table' AND name IN ('signatures', 'retry_queue')",
                [],
                |row| row.get(0),
            )
            .expect("count tables");
        assert_eq!(tables, 2);
    }

    #[test]
    fn test_insert_and_get() {
        let conn = open_memory().expect("open");
        let now = Utc::now();

        insert_signature(&conn, "deadbeefcafebabe", Some("aa".repeat(32).as_str()), "alice", now)
            .expect("insert");

        let record = get_signature(&conn, "deadbeefcafebabe")
            .expect("get")
            .expect("record present");
        assert_eq!(record.sender_id, "alice");
        assert!(!record.is_blocked);
        assert_eq!(record.vision_id.as_deref(), Some("aa".repeat(32).as_str()));
    }

    #[test]
    fn test_insert_or_ignore_keeps_first_record() {
        let conn = open_memory().expect("open");
        let now = Utc::now();

        insert_signature(&conn, "deadbeefcafebabe", None, "alice", now).expect("insert");
        insert_signature(&conn, "deadbeefcafebabe", None, "bob", now).expect("insert");

        let record = get_signature(&conn, "deadbeefcafebabe")
            .expect("get")
            .expect("record present");
        assert_eq!(record.sender_id, "alice", "first writer wins");
    }

    #[test]
    fn test_evict_spares_blocked_and_fresh() {
        let conn = open_memory().expect("open");
        let now = Utc::now();
        let old = now - chrono::Duration::days(30);

        insert_signature(&conn, "1111111111111111", None, "a", old).expect("insert");
        insert_signature(&conn, "2222222222222222", None, "b", old).expect("insert");
        insert_signature(&conn, "3333333333333333", None, "c", now).expect("insert");
        set_blocked(&conn, "2222222222222222").expect("block");

        let deleted = evict_stale(&conn, now - chrono::Duration::days(7)).expect("evict");
        assert_eq!(deleted, 1, "only the old unblocked record is deleted");

        assert!(get_signature(&conn, "1111111111111111").expect("get").is_none());
        assert!(get_signature(&conn, "2222222222222222").expect("get").is_some());
        assert!(get_signature(&conn, "3333333333333333").expect("get").is_some());
    }

    #[test]
    fn test_counts() {
        let conn = open_memory().expect("open");
        let now = Utc::now();

        assert_eq!(counts(&conn).expect("counts"), (0, 0));

        insert_signature(&conn, "1111111111111111", None, "a", now).expect("insert");
        insert_signature(&conn, "2222222222222222", None, "b", now).expect("insert");
        set_blocked(&conn, "1111111111111111").expect("block");

        assert_eq!(counts(&conn).expect("counts"), (2, 1));
    }
}
