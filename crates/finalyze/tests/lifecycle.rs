//! End-to-end tests of the job lifecycle: submit, queue, worker, polling.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use finalyze::analysis::Analyzer;
use finalyze::db::{job_repo, result_repo, usage_repo};
use finalyze::dispatcher::SubmitRequest;
use finalyze::error::{LookupError, QueueError, SubmitError};
use finalyze::job::{JobStatus, DEFAULT_QUERY};
use finalyze::queue::{ChannelQueue, Delivery, Queue, QueueMessage, SqliteQueue};
use finalyze::worker::{ProcessOutcome, ProcessorSettings, WorkerPool};

use common::{processor_settings, CountingAnalyzer, TestHarness};

fn pdf(name: &str) -> SubmitRequest {
    SubmitRequest::new(name, b"%PDF-1.4 quarterly revenue up 12%".to_vec())
}

fn channel_queue() -> Arc<dyn Queue> {
    Arc::new(ChannelQueue::new())
}

fn next_delivery(queue: &Arc<dyn Queue>) -> Delivery {
    queue
        .dequeue(Duration::from_secs(1))
        .unwrap()
        .expect("a queued message")
}

#[test]
fn test_status_is_pending_right_after_submit() {
    let h = TestHarness::new();
    let dispatcher = h.dispatcher(channel_queue());

    for name in ["a.pdf", "b.pdf", "c.txt"] {
        let submission = dispatcher.submit(&pdf(name)).unwrap();
        let job = h.status().get_status(&submission.job_id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.filename, name);
        assert!(job.completed_at.is_none());
    }
}

#[test]
fn test_observed_statuses_follow_pending_processing_completed() {
    let h = TestHarness::new();
    let queue = channel_queue();
    let analyzer = CountingAnalyzer::with_delay(Duration::from_millis(300));
    let processor = h.processor(queue.clone(), analyzer.clone());
    let job_id = h.dispatcher(queue.clone()).submit(&pdf("report.pdf")).unwrap().job_id;

    let status = h.status();
    let mut observed = vec![status.get_status(&job_id).unwrap().status];

    let delivery = next_delivery(&queue);
    let worker = std::thread::spawn(move || processor.process(&delivery));

    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        let current = status.get_status(&job_id).unwrap().status;
        if observed.last() != Some(&current) {
            observed.push(current);
        }
        if current.is_terminal() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    assert!(matches!(worker.join().unwrap(), ProcessOutcome::Completed { .. }));
    assert_eq!(
        observed,
        vec![JobStatus::Pending, JobStatus::Processing, JobStatus::Completed]
    );
    assert_eq!(analyzer.calls(), 1);
}

#[test]
fn test_result_not_ready_then_stable_once_completed() {
    let h = TestHarness::new();
    let queue = channel_queue();
    let job_id = h.dispatcher(queue.clone()).submit(&pdf("a.pdf")).unwrap().job_id;
    let status = h.status();

    assert!(matches!(
        status.get_result(&job_id),
        Err(LookupError::NotReady { status: JobStatus::Pending, .. })
    ));

    let outcome = h
        .processor(queue.clone(), CountingAnalyzer::new())
        .process(&next_delivery(&queue));
    assert!(matches!(outcome, ProcessOutcome::Completed { .. }));

    let first = status.get_result(&job_id).unwrap();
    let second = status.get_result(&job_id).unwrap();
    assert_eq!(first, second);
    assert!(first.analysis.contains("a.pdf"));
    assert!(first.processing_time >= 0.0);

    let job = status.get_status(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.completed_at.is_some());
    assert_eq!(h.upload_count(), 0);
}

#[test]
fn test_duplicate_delivery_to_two_workers_analyzes_once() {
    let h = TestHarness::new();
    let queue = channel_queue();
    let job_id = h.dispatcher(queue.clone()).submit(&pdf("dup.pdf")).unwrap().job_id;

    let row = job_repo::find_by_id(&h.db, &job_id).unwrap().unwrap();
    queue
        .enqueue(&QueueMessage {
            job_id: job_id.clone(),
            artifact_path: row.artifact_path.into(),
        })
        .unwrap();

    let analyzer = CountingAnalyzer::with_delay(Duration::from_millis(200));
    let processor = Arc::new(h.processor(queue, analyzer.clone()));
    let pool = WorkerPool::start(processor, 2, Duration::from_millis(10)).unwrap();

    let mut outcomes = Vec::new();
    while outcomes.len() < 2 {
        match pool.recv_outcome_timeout(Duration::from_secs(10)) {
            Some(outcome) => outcomes.push(outcome),
            None => panic!("timed out waiting for workers, got {:?}", outcomes),
        }
    }
    pool.shutdown();
    pool.wait();

    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, ProcessOutcome::Completed { .. }))
        .count();
    assert_eq!(completed, 1, "outcomes: {:?}", outcomes);
    assert!(outcomes.iter().any(|o| matches!(
        o,
        ProcessOutcome::Skipped { .. } | ProcessOutcome::InFlight { .. }
    )));
    assert_eq!(analyzer.calls(), 1);
    assert_eq!(h.status().get_stats().unwrap().total_analyses_completed, 1);
}

#[test]
fn test_stats_success_rate() {
    let h = TestHarness::new();
    let status = h.status();

    let empty = status.get_stats().unwrap();
    assert_eq!(empty.success_rate_percentage, 0.0);
    assert_eq!(empty.total_requests, 0);

    let queue = channel_queue();
    let dispatcher = h.dispatcher(queue.clone());
    let processor = h.processor(queue.clone(), CountingAnalyzer::new());
    for i in 0..3 {
        dispatcher.submit(&pdf(&format!("r{}.pdf", i))).unwrap();
        processor.process(&next_delivery(&queue));
    }

    let stats = status.get_stats().unwrap();
    assert_eq!(stats.success_rate_percentage, 100.0);
    assert_eq!(stats.total_analyses_completed, 3);
    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.status_breakdown.completed, 3);
    assert_eq!(stats.status_breakdown.failed, 0);
    assert!(stats.async_enabled);
}

#[test]
fn test_history_pages_newest_first() {
    let h = TestHarness::new();
    let queue = channel_queue();
    let dispatcher = h.dispatcher(queue.clone());
    let processor = h.processor(queue.clone(), CountingAnalyzer::new());

    let mut ids = Vec::new();
    for i in 0..7 {
        ids.push(dispatcher.submit(&pdf(&format!("h{}.pdf", i))).unwrap().job_id);
        processor.process(&next_delivery(&queue));
        std::thread::sleep(Duration::from_millis(2));
    }

    let page = h.status().get_history(Some(5), Some(0)).unwrap();
    assert_eq!(page.total, 7);
    assert_eq!(page.results.len(), 5);
    assert!(page
        .results
        .windows(2)
        .all(|w| w[0].created_at >= w[1].created_at));
    assert_eq!(page.results[0].job_id, ids[6]);

    let rest = h.status().get_history(Some(5), Some(5)).unwrap();
    assert_eq!(rest.results.len(), 2);
    assert_eq!(rest.total, 7);
}

#[test]
fn test_missing_or_blank_query_gets_default() {
    let h = TestHarness::new();
    let dispatcher = h.dispatcher(channel_queue());
    let status = h.status();

    let absent = dispatcher.submit(&pdf("A.pdf")).unwrap();
    let blank = dispatcher.submit(&pdf("A.pdf").with_query("  ")).unwrap();
    let given = dispatcher
        .submit(&pdf("A.pdf").with_query("  What is the debt ratio?  "))
        .unwrap();

    assert_eq!(status.get_status(&absent.job_id).unwrap().query, DEFAULT_QUERY);
    assert_eq!(status.get_status(&blank.job_id).unwrap().query, DEFAULT_QUERY);
    assert_eq!(
        status.get_status(&given.job_id).unwrap().query,
        "What is the debt ratio?"
    );
}

#[test]
fn test_corrupted_document_fails_without_result() {
    let h = TestHarness::new();
    let queue = channel_queue();
    let job_id = h
        .dispatcher(queue.clone())
        .submit(&SubmitRequest::new("broken.pdf", b"CORRUPT bytes".to_vec()))
        .unwrap()
        .job_id;

    let outcome = h
        .processor(queue.clone(), CountingAnalyzer::new())
        .process(&next_delivery(&queue));
    assert!(matches!(outcome, ProcessOutcome::Failed { .. }));

    let job = h.status().get_status(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.completed_at.is_some());

    match h.status().get_result(&job_id) {
        Err(LookupError::Failed { error_message, .. }) => {
            assert!(error_message.contains("unreadable document"), "{}", error_message)
        }
        other => panic!("expected Failed, got {:?}", other),
    }
    assert!(result_repo::find_by_job_id(&h.db, &job_id).unwrap().is_none());

    let usage = usage_repo::find_by_job_id(&h.db, &job_id).unwrap().unwrap();
    assert_eq!(usage.success, Some(false));
    let stats = h.status().get_stats().unwrap();
    assert_eq!(stats.status_breakdown.failed, 1);
    assert_eq!(stats.success_rate_percentage, 0.0);
}

#[test]
fn test_expired_lease_is_resumed_on_redelivery() {
    let h = TestHarness::new();
    let visibility = Duration::from_millis(200);
    let queue: Arc<dyn Queue> = Arc::new(SqliteQueue::new(h.db.clone(), visibility));
    let job_id = h.dispatcher(queue.clone()).submit(&pdf("stuck.pdf")).unwrap().job_id;

    // A worker takes the message and the job, then dies without acking.
    let first = next_delivery(&queue);
    assert_eq!(first.delivery_count, 1);
    let now = Utc::now();
    job_repo::claim(&h.db, &job_id, now, now + chrono::Duration::milliseconds(200))
        .unwrap()
        .unwrap();
    assert_eq!(
        h.status().get_status(&job_id).unwrap().status,
        JobStatus::Processing
    );

    std::thread::sleep(Duration::from_millis(300));

    let analyzer = CountingAnalyzer::new();
    let processor = h.processor_with(
        queue.clone(),
        analyzer.clone(),
        ProcessorSettings {
            visibility_timeout: visibility,
            ..processor_settings()
        },
    );
    let second = next_delivery(&queue);
    assert_eq!(second.delivery_count, 2);

    let outcome = processor.process(&second);
    assert!(matches!(outcome, ProcessOutcome::Completed { .. }), "{:?}", outcome);
    queue.ack(&second).unwrap();

    let row = job_repo::find_by_id(&h.db, &job_id).unwrap().unwrap();
    assert_eq!(row.status, "completed");
    assert_eq!(row.attempts, 2);
    assert_eq!(analyzer.calls(), 1);
    assert!(queue.dequeue(Duration::ZERO).unwrap().is_none());
}

#[test]
fn test_live_lease_leaves_message_unacked() {
    let h = TestHarness::new();
    let queue = channel_queue();
    let job_id = h.dispatcher(queue.clone()).submit(&pdf("busy.pdf")).unwrap().job_id;

    let now = Utc::now();
    job_repo::claim(&h.db, &job_id, now, now + chrono::Duration::seconds(60))
        .unwrap()
        .unwrap();

    let analyzer = CountingAnalyzer::new();
    let outcome = h
        .processor(queue.clone(), analyzer.clone())
        .process(&next_delivery(&queue));

    assert_eq!(outcome, ProcessOutcome::InFlight { job_id });
    assert!(!outcome.should_ack());
    assert_eq!(analyzer.calls(), 0);
}

struct UnavailableQueue;

impl Queue for UnavailableQueue {
    fn enqueue(&self, _: &QueueMessage) -> Result<(), QueueError> {
        Err(QueueError::Unavailable("broker down".to_string()))
    }

    fn dequeue(&self, _: Duration) -> Result<Option<Delivery>, QueueError> {
        Ok(None)
    }

    fn ack(&self, _: &Delivery) -> Result<(), QueueError> {
        Ok(())
    }

    fn extend_visibility(&self, _: &Delivery) -> Result<bool, QueueError> {
        Ok(false)
    }
}

#[test]
fn test_enqueue_failure_leaves_failed_job_and_no_upload() {
    let h = TestHarness::new();
    let err = h
        .dispatcher(Arc::new(UnavailableQueue))
        .submit(&pdf("lost.pdf"))
        .unwrap_err();

    let job_id = match err {
        SubmitError::Enqueue { job_id, .. } => job_id,
        other => panic!("expected Enqueue, got {:?}", other),
    };

    let job = h.status().get_status(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job
        .error_message
        .unwrap_or_default()
        .starts_with("Failed to enqueue job"));
    assert_eq!(
        usage_repo::find_by_job_id(&h.db, &job_id).unwrap().unwrap().success,
        Some(false)
    );
    assert_eq!(h.upload_count(), 0);
}

#[test]
fn test_analysis_over_time_limit_fails_job() {
    let h = TestHarness::new();
    let queue = channel_queue();
    let job_id = h.dispatcher(queue.clone()).submit(&pdf("slow.pdf")).unwrap().job_id;

    let analyzer: Arc<dyn Analyzer> = CountingAnalyzer::with_delay(Duration::from_secs(2));
    let processor = h.processor_with(
        queue.clone(),
        analyzer,
        ProcessorSettings {
            analysis_time_limit: Duration::from_millis(150),
            ..processor_settings()
        },
    );

    let started = Instant::now();
    let outcome = processor.process(&next_delivery(&queue));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(outcome, ProcessOutcome::Failed { .. }));

    let job = h.status().get_status(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap_or_default().contains("time limit"));
}

#[cfg(unix)]
#[test]
fn test_timed_out_analyzer_process_is_stopped() {
    use finalyze::analysis::{CommandAnalyzer, DocumentTextExtractor};

    let h = TestHarness::new();
    let queue = channel_queue();
    let job_id = h
        .dispatcher(queue.clone())
        .submit(&SubmitRequest::new("notes.txt", b"cash 10".to_vec()))
        .unwrap()
        .job_id;

    let marker = h.temp_path().join("late-analysis");
    let analyzer: Arc<dyn Analyzer> = Arc::new(
        CommandAnalyzer::new("sh", Arc::new(DocumentTextExtractor::new())).with_args(vec![
            "-c".to_string(),
            format!("sleep 1; touch '{}'; echo late", marker.display()),
        ]),
    );
    let processor = h.processor_with(
        queue.clone(),
        analyzer,
        ProcessorSettings {
            analysis_time_limit: Duration::from_millis(300),
            ..processor_settings()
        },
    );

    let outcome = processor.process(&next_delivery(&queue));
    match outcome {
        ProcessOutcome::Failed { ref error, .. } => assert!(error.contains("time limit"), "{}", error),
        ref other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(h.status().get_status(&job_id).unwrap().status, JobStatus::Failed);
    assert_eq!(h.upload_count(), 0);

    std::thread::sleep(Duration::from_millis(1500));
    assert!(!marker.exists(), "analyzer process outlived its job");
}

#[test]
fn test_worker_pool_drains_durable_queue() {
    let h = TestHarness::new();
    let queue: Arc<dyn Queue> = Arc::new(SqliteQueue::new(h.db.clone(), Duration::from_secs(30)));
    let dispatcher = h.dispatcher(queue.clone());

    let ids: Vec<String> = (0..4)
        .map(|i| dispatcher.submit(&pdf(&format!("q{}.pdf", i))).unwrap().job_id)
        .collect();

    let analyzer = CountingAnalyzer::new();
    let processor = Arc::new(h.processor(queue.clone(), analyzer.clone()));
    let pool = WorkerPool::start(processor, 3, Duration::from_millis(20)).unwrap();

    for _ in 0..ids.len() {
        let outcome = pool
            .recv_outcome_timeout(Duration::from_secs(10))
            .expect("worker outcome");
        assert!(matches!(outcome, ProcessOutcome::Completed { .. }), "{:?}", outcome);
    }
    pool.shutdown();
    pool.wait();

    for id in &ids {
        assert_eq!(h.status().get_status(id).unwrap().status, JobStatus::Completed);
    }
    assert_eq!(analyzer.calls(), 4);
    assert!(queue.dequeue(Duration::ZERO).unwrap().is_none());
    assert_eq!(h.upload_count(), 0);
}
