//! Queue abstraction between the dispatcher and the workers.
//!
//! Delivery is at-least-once: a message that is not acknowledged before its
//! visibility timeout runs out is handed to a consumer again. Consumers must
//! tolerate duplicates.

pub mod channel;
pub mod sqlite;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

pub use channel::ChannelQueue;
pub use sqlite::SqliteQueue;

/// What travels through the queue: the job handle and where its upload is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub job_id: String,
    pub artifact_path: PathBuf,
}

/// A message handed to one consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: i64,
    pub message: QueueMessage,
    /// Proof of the current claim, required to ack or extend.
    pub receipt: String,
    /// 1 on first delivery, higher on redelivery.
    pub delivery_count: u32,
}

pub trait Queue: Send + Sync {
    fn enqueue(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Waits up to `wait` for a visible message.
    fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Removes a delivered message for good.
    fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Keeps a delivered message hidden for another visibility period.
    /// Returns false when the claim was lost to a redelivery.
    fn extend_visibility(&self, delivery: &Delivery) -> Result<bool, QueueError>;
}
