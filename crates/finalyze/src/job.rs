//! Job lifecycle domain types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::job_repo::JobRow;
use crate::db::{parse_timestamp, DatabaseError};

/// Query applied when a submission carries no query (or only whitespace).
pub const DEFAULT_QUERY: &str = "Analyze this financial document for investment insights";

/// Trims the client's query and falls back to [`DEFAULT_QUERY`] when nothing
/// is left.
pub fn normalize_query(query: Option<&str>) -> String {
    match query.map(str::trim) {
        Some(q) if !q.is_empty() => q.to_string(),
        _ => DEFAULT_QUERY.to_string(),
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Terminal states are absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Legal transitions: `pending → processing → {completed | failed}`,
    /// plus `pending → failed` when a submission is aborted before any
    /// worker could see it.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a job as seen by polling clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub filename: String,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Job {
    /// Converts a raw row, rejecting values the schema should never hold.
    pub fn from_row(row: &JobRow) -> Result<Self, DatabaseError> {
        let status = JobStatus::parse(&row.status).ok_or_else(|| {
            DatabaseError::Integrity(format!(
                "job {} has unknown status '{}'",
                row.job_id, row.status
            ))
        })?;

        Ok(Self {
            job_id: row.job_id.clone(),
            status,
            filename: row.filename.clone(),
            query: row.query.clone(),
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            completed_at: row
                .completed_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            error_message: row.error_message.clone(),
        })
    }
}

/// Output of a successful analysis. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub job_id: String,
    pub filename: String,
    pub query: String,
    pub analysis: String,
    /// Wall-clock seconds spent in the analysis call.
    pub processing_time: f64,
    pub created_at: DateTime<Utc>,
}

/// History entry: a result without its (potentially large) analysis text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSummary {
    pub job_id: String,
    pub filename: String,
    pub query: String,
    pub processing_time: f64,
    pub created_at: DateTime<Utc>,
}

/// Append-only usage log entry, one per submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageRecord {
    pub job_id: String,
    pub user_ip: Option<String>,
    pub file_size: u64,
    pub query_length: u64,
    /// `None` until the job reaches a terminal state.
    pub success: Option<bool>,
    pub timestamp: DateTime<Utc>,
}
