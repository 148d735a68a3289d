//! Per-message state machine run by each worker thread.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{bounded, RecvTimeoutError};

use crate::analysis::{Analyzer, CancelToken, Document};
use crate::config::Config;
use crate::db::job_repo::{self, JobRow};
use crate::db::retry::{with_retry, RetryPolicy};
use crate::db::Database;
use crate::error::AnalysisError;
use crate::job::{AnalysisResult, JobStatus};
use crate::queue::{Delivery, Queue};
use crate::sanitize::redact_path;
use crate::storage::ArtifactStore;

/// How long a timed-out analysis gets to wind down after cancellation.
const CANCEL_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Lease length for both the queue message and the job row.
    pub visibility_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub analysis_time_limit: Duration,
    pub store_retry: RetryPolicy,
}

impl ProcessorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            visibility_timeout: config.worker.visibility_timeout(),
            heartbeat_interval: config.worker.heartbeat_interval(),
            analysis_time_limit: config.worker.analysis_time_limit(),
            store_retry: config.store_retry.policy(),
        }
    }
}

/// What became of one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Completed { job_id: String, processing_time: f64 },
    Failed { job_id: String, error: String },
    /// The job was already terminal; the delivery was a duplicate.
    Skipped { job_id: String, status: JobStatus },
    /// Another worker holds a live lease on the job.
    InFlight { job_id: String },
    /// No such job. The message can never be processed.
    Missing { job_id: String },
    /// The store could not be reached; leave the message for redelivery.
    Deferred { job_id: String, reason: String },
}

impl ProcessOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            ProcessOutcome::Completed { job_id, .. }
            | ProcessOutcome::Failed { job_id, .. }
            | ProcessOutcome::Skipped { job_id, .. }
            | ProcessOutcome::InFlight { job_id }
            | ProcessOutcome::Missing { job_id }
            | ProcessOutcome::Deferred { job_id, .. } => job_id,
        }
    }

    /// Whether the message is done with and may be removed from the queue.
    ///
    /// `InFlight` is left alone so the message can resume the job should its
    /// current holder die. `Deferred` is left for redelivery.
    pub fn should_ack(&self) -> bool {
        !matches!(
            self,
            ProcessOutcome::InFlight { .. } | ProcessOutcome::Deferred { .. }
        )
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessOutcome::Completed { .. } | ProcessOutcome::Failed { .. }
        )
    }
}

pub struct JobProcessor {
    db: Database,
    queue: Arc<dyn Queue>,
    artifacts: ArtifactStore,
    analyzer: Arc<dyn Analyzer>,
    settings: ProcessorSettings,
}

impl JobProcessor {
    pub fn new(
        db: Database,
        queue: Arc<dyn Queue>,
        artifacts: ArtifactStore,
        analyzer: Arc<dyn Analyzer>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            db,
            queue,
            artifacts,
            analyzer,
            settings,
        }
    }

    pub fn queue(&self) -> &Arc<dyn Queue> {
        &self.queue
    }

    /// Drives one delivery to an outcome. Never panics on store or analysis
    /// failures; those become `Failed` or `Deferred`.
    pub fn process(&self, delivery: &Delivery) -> ProcessOutcome {
        let job_id = delivery.message.job_id.clone();
        let _span = tracing::info_span!(
            "worker.process",
            job_id = %job_id,
            delivery = delivery.delivery_count
        )
        .entered();

        let row = match with_retry(&self.settings.store_retry, "load job", || {
            job_repo::find_by_id(&self.db, &job_id)
        }) {
            Ok(Some(row)) => row,
            Ok(None) => {
                log::error!("Job {} does not exist; dropping its queue message", job_id);
                return ProcessOutcome::Missing { job_id };
            }
            Err(e) => {
                log::error!("Could not load job {}: {}", job_id, e);
                return ProcessOutcome::Deferred {
                    job_id,
                    reason: e.to_string(),
                };
            }
        };

        if let Some(status) = JobStatus::parse(&row.status).filter(JobStatus::is_terminal) {
            log::info!("Job {} is already {}; skipping duplicate delivery", job_id, status);
            return ProcessOutcome::Skipped { job_id, status };
        }

        let now = Utc::now();
        let lease_until = now + to_chrono(self.settings.visibility_timeout);
        match with_retry(&self.settings.store_retry, "claim job", || {
            job_repo::claim(&self.db, &job_id, now, lease_until)
        }) {
            Ok(Some(attempts)) if attempts > 1 => {
                log::warn!(
                    "Job {} was stuck in processing; resuming (attempt {})",
                    job_id,
                    attempts
                );
            }
            Ok(Some(_)) => log::info!("Job {} claimed", job_id),
            Ok(None) => return self.not_claimed(job_id),
            Err(e) => {
                log::error!("Could not claim job {}: {}", job_id, e);
                return ProcessOutcome::Deferred {
                    job_id,
                    reason: e.to_string(),
                };
            }
        }

        let path = PathBuf::from(&row.artifact_path);
        let started = Instant::now();
        let analysis = if path.exists() {
            self.run_analysis(delivery, Document::new(path.clone(), row.filename.clone()), &row.query)
        } else {
            Err(AnalysisError::MissingArtifact(path.clone()))
        };
        let processing_time = started.elapsed().as_secs_f64();

        let outcome = match analysis {
            Ok(text) => self.finish_success(&row, text, processing_time),
            Err(e) => {
                log::warn!("Analysis of job {} failed: {}", job_id, e);
                self.finish_failure(&job_id, &e.to_string())
            }
        };

        if outcome.is_terminal() {
            if let Err(e) = self.artifacts.remove(&path) {
                log::warn!("Failed to remove upload {}: {}", redact_path(&path), e);
            }
        }

        outcome
    }

    /// Works out why a claim lost: the job finished meanwhile, or someone
    /// else holds it.
    fn not_claimed(&self, job_id: String) -> ProcessOutcome {
        match self.current_status(&job_id) {
            Some(status) if status.is_terminal() => {
                log::info!("Job {} is already {}; skipping duplicate delivery", job_id, status);
                ProcessOutcome::Skipped { job_id, status }
            }
            _ => {
                log::info!("Job {} is being processed elsewhere; skipping duplicate delivery", job_id);
                ProcessOutcome::InFlight { job_id }
            }
        }
    }

    fn current_status(&self, job_id: &str) -> Option<JobStatus> {
        match job_repo::find_by_id(&self.db, job_id) {
            Ok(row) => row.and_then(|r| JobStatus::parse(&r.status)),
            Err(e) => {
                log::warn!("Could not re-read job {}: {}", job_id, e);
                None
            }
        }
    }

    /// Runs the analyzer on a helper thread, renewing leases while it works
    /// and cancelling it at the time limit.
    fn run_analysis(
        &self,
        delivery: &Delivery,
        document: Document,
        query: &str,
    ) -> Result<String, AnalysisError> {
        let (tx, rx) = bounded(1);
        let analyzer = Arc::clone(&self.analyzer);
        let query = query.to_string();
        let cancel = CancelToken::new();
        let helper_cancel = cancel.clone();

        thread::Builder::new()
            .name("finalyze-analysis".into())
            .spawn(move || {
                let _ = tx.send(analyzer.analyze_cancellable(&document, &query, &helper_cancel));
            })
            .map_err(|e| AnalysisError::Analysis(format!("failed to start analysis: {}", e)))?;

        let limit = self.settings.analysis_time_limit;
        let deadline = Instant::now() + limit;
        loop {
            let now = Instant::now();
            if now >= deadline {
                cancel.cancel();
                // Give a cooperative analyzer the chance to stop its work
                // before the artifact is removed.
                if rx.recv_timeout(CANCEL_GRACE).is_err() {
                    log::warn!(
                        "Analysis of job {} did not stop within {:?} of cancellation",
                        delivery.message.job_id,
                        CANCEL_GRACE
                    );
                }
                return Err(AnalysisError::TimedOut(limit));
            }
            let wait = self.settings.heartbeat_interval.min(deadline - now);
            match rx.recv_timeout(wait) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) => self.heartbeat(delivery),
                Err(RecvTimeoutError::Disconnected) => return Err(AnalysisError::Panicked),
            }
        }
    }

    fn heartbeat(&self, delivery: &Delivery) {
        let job_id = &delivery.message.job_id;

        match self.queue.extend_visibility(delivery) {
            Ok(true) => {}
            Ok(false) => log::warn!("Queue claim on job {} was lost to a redelivery", job_id),
            Err(e) => log::warn!("Failed to extend queue visibility for job {}: {}", job_id, e),
        }

        let lease_until = Utc::now() + to_chrono(self.settings.visibility_timeout);
        match job_repo::extend_lease(&self.db, job_id, lease_until) {
            Ok(true) => log::debug!("Lease on job {} renewed", job_id),
            Ok(false) => log::warn!("Job {} left processing while its analysis was running", job_id),
            Err(e) => log::warn!("Failed to renew lease on job {}: {}", job_id, e),
        }
    }

    fn finish_success(&self, row: &JobRow, analysis: String, processing_time: f64) -> ProcessOutcome {
        let job_id = row.job_id.clone();
        let result = AnalysisResult {
            job_id: job_id.clone(),
            filename: row.filename.clone(),
            query: row.query.clone(),
            analysis,
            processing_time,
            created_at: Utc::now(),
        };

        match with_retry(&self.settings.store_retry, "store result", || {
            job_repo::complete(&self.db, &result)
        }) {
            Ok(true) => {
                log::info!("Job {} completed in {:.2}s", job_id, processing_time);
                ProcessOutcome::Completed {
                    job_id,
                    processing_time,
                }
            }
            Ok(false) => {
                let status = self.current_status(&job_id).unwrap_or(JobStatus::Processing);
                log::warn!(
                    "Job {} was already {} when its result arrived; result discarded",
                    job_id,
                    status
                );
                ProcessOutcome::Skipped { job_id, status }
            }
            Err(e) => {
                log::error!("Failed to store result of job {}: {}", job_id, e);
                self.finish_failure(&job_id, &format!("Failed to persist analysis result: {}", e))
            }
        }
    }

    fn finish_failure(&self, job_id: &str, error: &str) -> ProcessOutcome {
        match with_retry(&self.settings.store_retry, "record failure", || {
            job_repo::fail(&self.db, job_id, error, Utc::now(), JobStatus::Processing)
        }) {
            Ok(true) => ProcessOutcome::Failed {
                job_id: job_id.to_string(),
                error: error.to_string(),
            },
            Ok(false) => {
                let status = self.current_status(job_id).unwrap_or(JobStatus::Processing);
                log::warn!("Job {} was already {}; failure not recorded", job_id, status);
                ProcessOutcome::Skipped {
                    job_id: job_id.to_string(),
                    status,
                }
            }
            Err(e) => {
                log::error!("Could not mark job {} failed: {}", job_id, e);
                ProcessOutcome::Deferred {
                    job_id: job_id.to_string(),
                    reason: e.to_string(),
                }
            }
        }
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365))
}
