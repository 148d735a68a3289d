//! Result repository for the `results` table.
//!
//! Rows are only ever inserted, inside the job completion transaction.

use rusqlite::{params, Connection, OptionalExtension};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::job::{AnalysisResult, ResultSummary};

/// Inserts a result row on an open transaction.
pub fn insert_tx(conn: &Connection, result: &AnalysisResult) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO results (job_id, filename, query, analysis, processing_time, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            result.job_id,
            result.filename,
            result.query,
            result.analysis,
            result.processing_time,
            format_timestamp(result.created_at),
        ],
    )?;
    Ok(())
}

/// Finds the result of a completed job.
pub fn find_by_job_id(
    db: &Database,
    job_id: &str,
) -> Result<Option<AnalysisResult>, DatabaseError> {
    let row = db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT job_id, filename, query, analysis, processing_time, created_at
                 FROM results WHERE job_id = ?1",
                params![job_id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, f64>(4)?,
                        r.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;
        Ok(row)
    })?;

    row.map(
        |(job_id, filename, query, analysis, processing_time, created_at)| {
            Ok(AnalysisResult {
                job_id,
                filename,
                query,
                analysis,
                processing_time,
                created_at: parse_timestamp(&created_at)?,
            })
        },
    )
    .transpose()
}

/// Returns one page of result summaries, newest first, together with the
/// total number of results.
pub fn page(
    db: &Database,
    limit: u32,
    offset: u64,
) -> Result<(Vec<ResultSummary>, u64), DatabaseError> {
    // SQLite treats a negative OFFSET as zero; saturate instead of wrapping.
    let offset = i64::try_from(offset).unwrap_or(i64::MAX);
    let (raw, total) = db.with_conn(|conn| {
        let total: u64 = conn.query_row("SELECT COUNT(*) FROM results", [], |r| r.get(0))?;

        let mut stmt = conn.prepare(
            "SELECT job_id, filename, query, processing_time, created_at
             FROM results ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
        )?;
        let raw = stmt
            .query_map(params![limit, offset], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, f64>(3)?,
                    r.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok((raw, total))
    })?;

    let summaries = raw
        .into_iter()
        .map(|(job_id, filename, query, processing_time, created_at)| {
            Ok(ResultSummary {
                job_id,
                filename,
                query,
                processing_time,
                created_at: parse_timestamp(&created_at)?,
            })
        })
        .collect::<Result<Vec<_>, DatabaseError>>()?;

    Ok((summaries, total))
}
