//! Durable queue on the shared SQLite database.

use std::time::{Duration, Instant};

use chrono::Utc;

use super::{Delivery, Queue, QueueMessage};
use crate::db::{queue_repo, Database};
use crate::error::QueueError;

/// How often an idle `dequeue` re-checks the table.
const POLL_STEP: Duration = Duration::from_millis(100);

/// Lease-based queue backed by the `queue_messages` table.
///
/// Works across processes: the dispatcher and any number of worker processes
/// may open the same database file.
#[derive(Clone)]
pub struct SqliteQueue {
    db: Database,
    visibility_timeout: Duration,
}

impl SqliteQueue {
    pub fn new(db: Database, visibility_timeout: Duration) -> Self {
        Self {
            db,
            visibility_timeout,
        }
    }

    /// Messages currently stored, including hidden ones.
    pub fn depth(&self) -> Result<u64, QueueError> {
        Ok(queue_repo::depth(&self.db)?)
    }

    fn hide_until(&self, now: chrono::DateTime<Utc>) -> chrono::DateTime<Utc> {
        now + chrono::Duration::from_std(self.visibility_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)))
    }

    fn try_claim(&self) -> Result<Option<Delivery>, QueueError> {
        loop {
            let now = Utc::now();
            let receipt = uuid::Uuid::new_v4().to_string();
            let Some(row) = queue_repo::claim_next(&self.db, now, self.hide_until(now), &receipt)?
            else {
                return Ok(None);
            };

            match serde_json::from_str::<QueueMessage>(&row.payload) {
                Ok(message) => {
                    return Ok(Some(Delivery {
                        id: row.id,
                        message,
                        receipt,
                        delivery_count: row.deliveries,
                    }));
                }
                Err(e) => {
                    // Undecodable payloads can never be processed; drop them.
                    log::error!(
                        "Dropping queue message {} for job {}: bad payload: {}",
                        row.id,
                        row.job_id,
                        e
                    );
                    queue_repo::delete(&self.db, row.id, &receipt)?;
                }
            }
        }
    }
}

impl Queue for SqliteQueue {
    fn enqueue(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let payload = serde_json::to_string(message)?;
        let id = queue_repo::push(&self.db, &message.job_id, &payload, Utc::now())?;
        log::debug!("Enqueued job {} as message {}", message.job_id, id);
        Ok(())
    }

    fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(delivery) = self.try_claim()? {
                return Ok(Some(delivery));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_STEP.min(deadline - now));
        }
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        if !queue_repo::delete(&self.db, delivery.id, &delivery.receipt)? {
            log::warn!(
                "Ack for message {} (job {}) ignored: claim was superseded",
                delivery.id,
                delivery.message.job_id
            );
        }
        Ok(())
    }

    fn extend_visibility(&self, delivery: &Delivery) -> Result<bool, QueueError> {
        let until = self.hide_until(Utc::now());
        Ok(queue_repo::extend(
            &self.db,
            delivery.id,
            &delivery.receipt,
            until,
        )?)
    }
}
