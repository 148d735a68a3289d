//! Usage log repository. Append-only apart from the `success` flag.

use rusqlite::{params, Connection, OptionalExtension};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::job::UsageRecord;

/// Appends a usage record on an open transaction.
pub fn insert_tx(conn: &Connection, record: &UsageRecord) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO usage_log (job_id, user_ip, file_size, query_length, success, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.job_id,
            record.user_ip,
            record.file_size as i64,
            record.query_length as i64,
            record.success,
            format_timestamp(record.timestamp),
        ],
    )?;
    Ok(())
}

/// Sets the terminal outcome for a job's usage record. Only records that
/// have no outcome yet are touched.
pub fn record_outcome_tx(
    conn: &Connection,
    job_id: &str,
    success: bool,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE usage_log SET success = ?2 WHERE job_id = ?1 AND success IS NULL",
        params![job_id, success],
    )?;
    if changed == 0 {
        log::warn!("No open usage record for job {}", job_id);
    }
    Ok(changed)
}

/// Finds the usage record of a job.
pub fn find_by_job_id(db: &Database, job_id: &str) -> Result<Option<UsageRecord>, DatabaseError> {
    let row = db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT job_id, user_ip, file_size, query_length, success, timestamp
                 FROM usage_log WHERE job_id = ?1 ORDER BY id LIMIT 1",
                params![job_id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, Option<String>>(1)?,
                        r.get::<_, i64>(2)?,
                        r.get::<_, i64>(3)?,
                        r.get::<_, Option<bool>>(4)?,
                        r.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;
        Ok(row)
    })?;

    row.map(
        |(job_id, user_ip, file_size, query_length, success, timestamp)| {
            Ok(UsageRecord {
                job_id,
                user_ip,
                file_size: file_size.max(0) as u64,
                query_length: query_length.max(0) as u64,
                success,
                timestamp: parse_timestamp(&timestamp)?,
            })
        },
    )
    .transpose()
}
