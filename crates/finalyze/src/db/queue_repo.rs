//! Durable queue table with visibility timeouts.
//!
//! A message is visible when `visible_at <= now`. Claiming one pushes
//! `visible_at` into the future and stamps a fresh receipt; only the holder
//! of the current receipt may delete or extend it.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::{format_timestamp, Database, DatabaseError};

/// A claimed queue row.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueRow {
    pub id: i64,
    pub job_id: String,
    pub payload: String,
    pub deliveries: u32,
}

/// Appends a message that is visible immediately.
pub fn push(
    db: &Database,
    job_id: &str,
    payload: &str,
    now: DateTime<Utc>,
) -> Result<i64, DatabaseError> {
    let ts = format_timestamp(now);
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO queue_messages (job_id, payload, enqueued_at, visible_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![job_id, payload, ts],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Claims the oldest visible message, hiding it until `hide_until`.
pub fn claim_next(
    db: &Database,
    now: DateTime<Utc>,
    hide_until: DateTime<Utc>,
    receipt: &str,
) -> Result<Option<QueueRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "UPDATE queue_messages
                 SET visible_at = ?2, receipt = ?3, deliveries = deliveries + 1
                 WHERE id = (
                     SELECT id FROM queue_messages
                     WHERE visible_at <= ?1
                     ORDER BY id
                     LIMIT 1
                 )
                 RETURNING id, job_id, payload, deliveries",
                params![format_timestamp(now), format_timestamp(hide_until), receipt],
                |r| {
                    Ok(QueueRow {
                        id: r.get(0)?,
                        job_id: r.get(1)?,
                        payload: r.get(2)?,
                        deliveries: r.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    })
}

/// Deletes a message if `receipt` is still current. Returns false otherwise.
pub fn delete(db: &Database, id: i64, receipt: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "DELETE FROM queue_messages WHERE id = ?1 AND receipt = ?2",
            params![id, receipt],
        )?;
        Ok(changed == 1)
    })
}

/// Keeps a claimed message hidden until `hide_until`. Returns false when the
/// receipt is stale.
pub fn extend(
    db: &Database,
    id: i64,
    receipt: &str,
    hide_until: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE queue_messages SET visible_at = ?3 WHERE id = ?1 AND receipt = ?2",
            params![id, receipt, format_timestamp(hide_until)],
        )?;
        Ok(changed == 1)
    })
}

/// Number of messages in the table, visible or not.
pub fn depth(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM queue_messages", [], |r| r.get(0))?;
        Ok(count)
    })
}
