//! Job repository: lifecycle writes and reads for the `jobs` table.
//!
//! Every state change is a compare-and-set on `status`, so two actors racing
//! on the same job cannot both win. Terminal transitions update the job, the
//! result and the usage log in one transaction.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_timestamp, result_repo, usage_repo, Database, DatabaseError};
use crate::job::{AnalysisResult, JobStatus};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub job_id: String,
    pub filename: String,
    pub query: String,
    pub status: String,
    pub error_message: Option<String>,
    pub artifact_path: String,
    pub attempts: u32,
    pub lease_expires_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl JobRow {
    /// A fresh `pending` row.
    pub fn new_pending(
        job_id: &str,
        filename: &str,
        query: &str,
        artifact_path: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let ts = format_timestamp(now);
        Self {
            job_id: job_id.to_string(),
            filename: filename.to_string(),
            query: query.to_string(),
            status: JobStatus::Pending.as_str().to_string(),
            error_message: None,
            artifact_path: artifact_path.to_string(),
            attempts: 0,
            lease_expires_at: None,
            created_at: ts.clone(),
            updated_at: ts,
            completed_at: None,
        }
    }

    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            filename: row.get("filename")?,
            query: row.get("query")?,
            status: row.get("status")?,
            error_message: row.get("error_message")?,
            artifact_path: row.get("artifact_path")?,
            attempts: row.get("attempts")?,
            lease_expires_at: row.get("lease_expires_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Inserts a job row on an open connection or transaction.
pub fn insert_tx(conn: &Connection, job: &JobRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO jobs (job_id, filename, query, status, error_message, artifact_path,
         attempts, lease_expires_at, created_at, updated_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            job.job_id,
            job.filename,
            job.query,
            job.status,
            job.error_message,
            job.artifact_path,
            job.attempts,
            job.lease_expires_at,
            job.created_at,
            job.updated_at,
            job.completed_at,
        ],
    )?;
    Ok(())
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| insert_tx(conn, job))
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, job_id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM jobs WHERE job_id = ?1",
                params![job_id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Atomically moves a job into `processing` and takes a lease on it.
///
/// Succeeds when the job is `pending`, or is `processing` with a lease that
/// expired at or before `now` (its previous holder is presumed dead). Returns
/// the new attempt count, or `None` when another actor owns the job or it is
/// already terminal.
pub fn claim(
    db: &Database,
    job_id: &str,
    now: DateTime<Utc>,
    lease_until: DateTime<Utc>,
) -> Result<Option<u32>, DatabaseError> {
    db.with_conn(|conn| {
        let attempts = conn
            .query_row(
                "UPDATE jobs
                 SET status = 'processing', attempts = attempts + 1,
                     lease_expires_at = ?3, updated_at = ?2
                 WHERE job_id = ?1
                   AND (status = 'pending'
                        OR (status = 'processing'
                            AND lease_expires_at IS NOT NULL
                            AND lease_expires_at <= ?2))
                 RETURNING attempts",
                params![job_id, format_timestamp(now), format_timestamp(lease_until)],
                |r| r.get::<_, u32>(0),
            )
            .optional()?;
        Ok(attempts)
    })
}

/// Pushes the lease of a `processing` job forward. Returns false when the
/// job has left `processing`.
pub fn extend_lease(
    db: &Database,
    job_id: &str,
    lease_until: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET lease_expires_at = ?2
             WHERE job_id = ?1 AND status = 'processing'",
            params![job_id, format_timestamp(lease_until)],
        )?;
        Ok(changed == 1)
    })
}

/// Records a successful analysis: `processing → completed`, the result row
/// and `success = 1` on the usage record, all or nothing.
///
/// Returns false (and writes nothing) when the job is no longer
/// `processing`.
pub fn complete(db: &Database, result: &AnalysisResult) -> Result<bool, DatabaseError> {
    let ts = format_timestamp(result.created_at);
    db.transaction(|tx| {
        let changed = tx.execute(
            "UPDATE jobs
             SET status = 'completed', error_message = NULL, lease_expires_at = NULL,
                 completed_at = ?2, updated_at = ?2
             WHERE job_id = ?1 AND status = 'processing'",
            params![result.job_id, ts],
        )?;
        if changed == 0 {
            return Ok(false);
        }

        result_repo::insert_tx(tx, result)?;
        usage_repo::record_outcome_tx(tx, &result.job_id, true)?;
        Ok(true)
    })
}

/// Records a failure: `expected → failed` with `error_message`, and
/// `success = 0` on the usage record, all or nothing.
///
/// `expected` is `Processing` for the worker and `Pending` for a submission
/// that could not be enqueued. Returns false when the job was not in
/// `expected`.
pub fn fail(
    db: &Database,
    job_id: &str,
    error_message: &str,
    now: DateTime<Utc>,
    expected: JobStatus,
) -> Result<bool, DatabaseError> {
    if !expected.can_transition_to(JobStatus::Failed) {
        return Ok(false);
    }

    let ts = format_timestamp(now);
    db.transaction(|tx| {
        let changed = tx.execute(
            "UPDATE jobs
             SET status = 'failed', error_message = ?2, lease_expires_at = NULL,
                 completed_at = ?3, updated_at = ?3
             WHERE job_id = ?1 AND status = ?4",
            params![job_id, error_message, ts, expected.as_str()],
        )?;
        if changed == 0 {
            return Ok(false);
        }

        usage_repo::record_outcome_tx(tx, job_id, false)?;
        Ok(true)
    })
}
