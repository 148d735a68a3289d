//! Front-end side of the job lifecycle: accept a submission, persist it and
//! hand it to the queue without waiting for the analysis.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::config::Config;
use crate::db::job_repo::{self, JobRow};
use crate::db::retry::{with_retry, RetryPolicy};
use crate::db::{usage_repo, Database};
use crate::error::SubmitError;
use crate::job::{normalize_query, JobStatus, UsageRecord};
use crate::queue::{Queue, QueueMessage};
use crate::sanitize::{clean_filename, redact_path};
use crate::storage::ArtifactStore;

/// One uploaded document plus its optional question.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub filename: String,
    pub content: Vec<u8>,
    pub query: Option<String>,
    pub user_ip: Option<String>,
}

impl SubmitRequest {
    pub fn new(filename: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content,
            query: None,
            user_ip: None,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_user_ip(mut self, user_ip: impl Into<String>) -> Self {
        self.user_ip = Some(user_ip.into());
        self
    }
}

/// Handle returned to the client for polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub job_id: String,
}

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub async_enabled: bool,
    pub max_upload_bytes: u64,
    pub store_retry: RetryPolicy,
    pub enqueue_retry: RetryPolicy,
}

impl DispatcherSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            async_enabled: config.async_enabled,
            max_upload_bytes: config.max_upload_bytes,
            store_retry: config.store_retry.policy(),
            enqueue_retry: config.enqueue_retry.policy(),
        }
    }
}

/// Checks an upload and returns its cleaned filename.
pub fn validate_upload(
    filename: &str,
    content: &[u8],
    max_upload_bytes: u64,
) -> Result<String, SubmitError> {
    let filename = clean_filename(filename)
        .ok_or_else(|| SubmitError::Validation("a filename is required".to_string()))?;
    if content.is_empty() {
        return Err(SubmitError::Validation(format!("'{}' is empty", filename)));
    }
    if content.len() as u64 > max_upload_bytes {
        return Err(SubmitError::Validation(format!(
            "'{}' is {} bytes, the limit is {} bytes",
            filename,
            content.len(),
            max_upload_bytes
        )));
    }
    Ok(filename)
}

pub struct Dispatcher {
    db: Database,
    queue: Arc<dyn Queue>,
    artifacts: ArtifactStore,
    settings: DispatcherSettings,
}

impl Dispatcher {
    pub fn new(
        db: Database,
        queue: Arc<dyn Queue>,
        artifacts: ArtifactStore,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            db,
            queue,
            artifacts,
            settings,
        }
    }

    /// Accepts a document for background analysis.
    ///
    /// On `Ok` the job is `pending` and a queue message for it exists. On any
    /// error after the job row was written, the job is marked `failed` before
    /// returning, so no returned or dangling job id waits forever.
    pub fn submit(&self, request: &SubmitRequest) -> Result<Submission, SubmitError> {
        if !self.settings.async_enabled {
            return Err(SubmitError::AsyncDisabled);
        }

        let filename = validate_upload(
            &request.filename,
            &request.content,
            self.settings.max_upload_bytes,
        )?;
        let query = normalize_query(request.query.as_deref());
        let job_id = uuid::Uuid::new_v4().to_string();

        let _span = tracing::info_span!("dispatcher.submit", job_id = %job_id).entered();

        let artifact_path = self.artifacts.store(&job_id, &filename, &request.content)?;

        let now = Utc::now();
        let job = JobRow::new_pending(
            &job_id,
            &filename,
            &query,
            &artifact_path.to_string_lossy(),
            now,
        );
        let usage = UsageRecord {
            job_id: job_id.clone(),
            user_ip: request.user_ip.clone(),
            file_size: request.content.len() as u64,
            query_length: query.chars().count() as u64,
            success: None,
            timestamp: now,
        };

        let recorded = with_retry(&self.settings.store_retry, "record job", || {
            self.db.transaction(|tx| {
                job_repo::insert_tx(tx, &job)?;
                usage_repo::insert_tx(tx, &usage)
            })
        });
        if let Err(e) = recorded {
            log::error!("Failed to record job {}: {}", job_id, e);
            self.discard_artifact(&artifact_path);
            return Err(SubmitError::Database(e));
        }

        let message = QueueMessage {
            job_id: job_id.clone(),
            artifact_path: artifact_path.clone(),
        };
        if let Err(e) = with_retry(&self.settings.enqueue_retry, "enqueue job", || {
            self.queue.enqueue(&message)
        }) {
            log::error!("Failed to enqueue job {}: {}", job_id, e);
            self.abandon(&job_id, &format!("Failed to enqueue job: {}", e));
            self.discard_artifact(&artifact_path);
            return Err(SubmitError::Enqueue { job_id, source: e });
        }

        log::info!(
            "Job {} submitted: file={}, size={} bytes",
            job_id,
            filename,
            request.content.len()
        );

        Ok(Submission { job_id })
    }

    /// Marks a job that never reached the queue as failed.
    fn abandon(&self, job_id: &str, reason: &str) {
        let result = with_retry(&self.settings.store_retry, "fail unqueued job", || {
            job_repo::fail(&self.db, job_id, reason, Utc::now(), JobStatus::Pending)
        });
        match result {
            Ok(true) => {}
            Ok(false) => log::warn!("Job {} already left pending", job_id),
            Err(e) => log::error!(
                "Job {} could not be marked failed and stays pending: {}",
                job_id,
                e
            ),
        }
    }

    fn discard_artifact(&self, path: &std::path::Path) {
        if let Err(e) = self.artifacts.remove(path) {
            log::warn!("Failed to remove upload {}: {}", redact_path(path), e);
        }
    }
}
