//! Aggregate queries over jobs and results.

use serde::Serialize;

use super::{Database, DatabaseError};
use crate::job::JobStatus;

/// Number of jobs in each lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl StatusCounts {
    fn add(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
        }
    }
}

/// Raw aggregates read in a single pass.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSummary {
    pub total_jobs: u64,
    pub total_results: u64,
    pub status_counts: StatusCounts,
    pub average_processing_time: Option<f64>,
}

/// Reads all aggregates inside one read transaction so the numbers agree
/// with each other.
pub fn summary(db: &Database) -> Result<StatsSummary, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;

        let mut status_counts = StatusCounts::default();
        let mut total_jobs = 0;
        {
            let mut stmt = tx.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
            let rows = stmt
                .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            for (status, count) in rows {
                let status = JobStatus::parse(&status).ok_or_else(|| {
                    DatabaseError::Integrity(format!("unknown job status '{}'", status))
                })?;
                status_counts.add(status, count);
                total_jobs += count;
            }
        }

        let (total_results, average_processing_time): (u64, Option<f64>) = tx.query_row(
            "SELECT COUNT(*), AVG(processing_time) FROM results",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;

        tx.commit()?;

        Ok(StatsSummary {
            total_jobs,
            total_results,
            status_counts,
            average_processing_time,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::job_repo::{self, JobRow};
    use crate::job::AnalysisResult;
    use chrono::{Duration, Utc};

    #[test]
    fn test_summary_of_empty_db() {
        let db = Database::open_in_memory().unwrap();
        let s = summary(&db).unwrap();
        assert_eq!(s.total_jobs, 0);
        assert_eq!(s.total_results, 0);
        assert_eq!(s.status_counts, StatusCounts::default());
        assert_eq!(s.average_processing_time, None);
    }

    #[test]
    fn test_summary_counts_each_state() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        for id in ["a", "b", "c", "d"] {
            job_repo::insert(&db, &JobRow::new_pending(id, "f.pdf", "q", "/tmp/f", now)).unwrap();
        }
        let lease = now + Duration::seconds(60);
        for id in ["b", "c", "d"] {
            job_repo::claim(&db, id, now, lease).unwrap();
        }
        job_repo::complete(
            &db,
            &AnalysisResult {
                job_id: "c".to_string(),
                filename: "f.pdf".to_string(),
                query: "q".to_string(),
                analysis: "fine".to_string(),
                processing_time: 5.0,
                created_at: now,
            },
        )
        .unwrap();
        job_repo::fail(&db, "d", "boom", now, JobStatus::Processing).unwrap();

        let s = summary(&db).unwrap();
        assert_eq!(s.total_jobs, 4);
        assert_eq!(s.total_results, 1);
        assert_eq!(
            s.status_counts,
            StatusCounts {
                pending: 1,
                processing: 1,
                completed: 1,
                failed: 1
            }
        );
        assert_eq!(s.average_processing_time, Some(5.0));
    }
}
