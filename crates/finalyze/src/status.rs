//! Read-only queries for polling clients and operators.

use serde::Serialize;

use crate::config::Config;
use crate::db::{job_repo, result_repo, stats_repo, Database, DatabaseError};
use crate::error::LookupError;
use crate::job::{AnalysisResult, Job, JobStatus, ResultSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSettings {
    pub async_enabled: bool,
    pub default_limit: u32,
    pub max_limit: u32,
}

impl StatusSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            async_enabled: config.async_enabled,
            default_limit: config.history.default_limit,
            max_limit: config.history.max_limit,
        }
    }
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPage {
    pub total: u64,
    pub limit: u32,
    pub offset: u64,
    pub results: Vec<ResultSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusBreakdown {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub total_analyses_completed: u64,
    pub total_requests: u64,
    pub status_breakdown: StatusBreakdown,
    pub average_processing_time_seconds: f64,
    pub success_rate_percentage: f64,
    pub async_enabled: bool,
}

pub struct StatusService {
    db: Database,
    settings: StatusSettings,
}

impl StatusService {
    pub fn new(db: Database, settings: StatusSettings) -> Self {
        Self { db, settings }
    }

    pub fn get_status(&self, job_id: &str) -> Result<Job, LookupError> {
        let row = job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| LookupError::NotFound(job_id.to_string()))?;
        Ok(Job::from_row(&row)?)
    }

    /// Returns the stored result of a completed job.
    ///
    /// Unknown ids give `NotFound`, unfinished jobs `NotReady` and failed
    /// jobs `Failed` with the recorded reason.
    pub fn get_result(&self, job_id: &str) -> Result<AnalysisResult, LookupError> {
        let job = self.get_status(job_id)?;

        match job.status {
            JobStatus::Pending | JobStatus::Processing => Err(LookupError::NotReady {
                job_id: job.job_id,
                status: job.status,
            }),
            JobStatus::Failed => Err(LookupError::Failed {
                job_id: job.job_id,
                error_message: job
                    .error_message
                    .unwrap_or_else(|| "Unknown error".to_string()),
            }),
            JobStatus::Completed => result_repo::find_by_job_id(&self.db, job_id)?.ok_or_else(|| {
                LookupError::Database(DatabaseError::Integrity(format!(
                    "job {} is completed but has no result",
                    job_id
                )))
            }),
        }
    }

    /// Pages through completed results, newest first. `limit` is clamped to
    /// the configured range.
    pub fn get_history(
        &self,
        limit: Option<u32>,
        offset: Option<u64>,
    ) -> Result<HistoryPage, DatabaseError> {
        let limit = limit
            .unwrap_or(self.settings.default_limit)
            .clamp(1, self.settings.max_limit.max(1));
        let offset = offset.unwrap_or(0);

        let (results, total) = result_repo::page(&self.db, limit, offset)?;
        Ok(HistoryPage {
            total,
            limit,
            offset,
            results,
        })
    }

    pub fn get_stats(&self) -> Result<Stats, DatabaseError> {
        let summary = stats_repo::summary(&self.db)?;
        let counts = summary.status_counts;

        Ok(Stats {
            total_analyses_completed: summary.total_results,
            total_requests: summary.total_jobs,
            status_breakdown: StatusBreakdown {
                pending: counts.pending,
                processing: counts.processing,
                completed: counts.completed,
                failed: counts.failed,
            },
            average_processing_time_seconds: round2(summary.average_processing_time.unwrap_or(0.0)),
            success_rate_percentage: round2(success_rate(counts.completed, counts.failed)),
            async_enabled: self.settings.async_enabled,
        })
    }
}

/// Percentage of terminal jobs that completed; 0 when none have finished.
pub fn success_rate(completed: u64, failed: u64) -> f64 {
    let finished = completed + failed;
    if finished == 0 {
        return 0.0;
    }
    completed as f64 / finished as f64 * 100.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
