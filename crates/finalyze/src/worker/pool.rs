use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::worker::processor::{JobProcessor, ProcessOutcome};

/// Back-off after the queue itself reports an error.
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Threads that pull from the queue and run each delivery through a
/// [`JobProcessor`] until shut down.
///
/// Outcomes are published on a bounded channel for observers; when nobody
/// drains it, new outcomes are dropped rather than stalling the workers.
pub struct WorkerPool {
    outcome_receiver: Receiver<ProcessOutcome>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn start(
        processor: Arc<JobProcessor>,
        worker_count: usize,
        poll_interval: Duration,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be at least 1".to_string(),
            ));
        }

        let (outcome_sender, outcome_receiver) = bounded::<ProcessOutcome>(worker_count * 16);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let processor = Arc::clone(&processor);
            let outcome_tx = outcome_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);

            let spawned = thread::Builder::new()
                .name(format!("finalyze-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(worker_id, processor, outcome_tx, shutdown_flag, poll_interval);
                });

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    shutdown.store(true, Ordering::Relaxed);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(WorkerError::SpawnFailed(e.to_string()));
                }
            }
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            outcome_receiver,
            workers,
            shutdown,
        })
    }

    pub fn try_recv_outcome(&self) -> Option<ProcessOutcome> {
        self.outcome_receiver.try_recv().ok()
    }

    pub fn recv_outcome_timeout(&self, timeout: Duration) -> Option<ProcessOutcome> {
        self.outcome_receiver.recv_timeout(timeout).ok()
    }

    /// Flag that stops the workers once set, e.g. from a signal handler.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Blocks until every worker has finished its current delivery and exited.
    pub fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }
}

fn run_worker(
    worker_id: usize,
    processor: Arc<JobProcessor>,
    outcome_sender: Sender<ProcessOutcome>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    debug!("Worker {} started", worker_id);

    let queue = Arc::clone(processor.queue());

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        let delivery = match queue.dequeue(poll_interval) {
            Ok(Some(delivery)) => delivery,
            Ok(None) => continue,
            Err(e) => {
                error!("Worker {} could not read the queue: {}", worker_id, e);
                thread::sleep(QUEUE_ERROR_BACKOFF);
                continue;
            }
        };

        debug!(
            "Worker {} processing job {}",
            worker_id, delivery.message.job_id
        );
        let outcome = processor.process(&delivery);

        if outcome.should_ack() {
            if let Err(e) = queue.ack(&delivery) {
                warn!(
                    "Worker {} failed to ack job {}: {}",
                    worker_id,
                    outcome.job_id(),
                    e
                );
            }
        }

        match outcome_sender.try_send(outcome) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                debug!("Worker {} outcome channel closed", worker_id);
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
