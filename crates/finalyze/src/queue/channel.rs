//! In-process queue for a dispatcher and workers sharing one process.
//!
//! Nothing survives a restart and there is no redelivery: a message is gone
//! once dequeued. `ack` and `extend_visibility` are accepted and ignored.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use super::{Delivery, Queue, QueueMessage};
use crate::error::QueueError;

pub struct ChannelQueue {
    sender: Sender<(i64, QueueMessage)>,
    receiver: Receiver<(i64, QueueMessage)>,
    next_id: AtomicI64,
}

impl ChannelQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            next_id: AtomicI64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for ChannelQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Queue for ChannelQueue {
    fn enqueue(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sender
            .send((id, message.clone()))
            .map_err(|_| QueueError::Closed)
    }

    fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        match self.receiver.recv_timeout(wait) {
            Ok((id, message)) => Ok(Some(Delivery {
                id,
                message,
                receipt: id.to_string(),
                delivery_count: 1,
            })),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(QueueError::Closed),
        }
    }

    fn ack(&self, _delivery: &Delivery) -> Result<(), QueueError> {
        Ok(())
    }

    fn extend_visibility(&self, _delivery: &Delivery) -> Result<bool, QueueError> {
        Ok(true)
    }
}
