//! Bounded retry for transient store and queue failures.

use std::fmt::Display;
use std::time::Duration;

/// Errors that can tell whether repeating the operation may help.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for super::DatabaseError {
    fn is_transient(&self) -> bool {
        super::DatabaseError::is_transient(self)
    }
}

impl Transient for crate::error::QueueError {
    fn is_transient(&self) -> bool {
        crate::error::QueueError::is_transient(self)
    }
}

/// How many times to try an operation and how long to wait in between.
///
/// The delay doubles after each failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(50))
    }
}

/// Runs `f` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are used up. The last error is returned.
pub fn with_retry<T, E, F>(policy: &RetryPolicy, operation: &str, mut f: F) -> Result<T, E>
where
    E: Transient + Display,
    F: FnMut() -> Result<T, E>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = policy.initial_backoff;
    let mut attempt = 1;

    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                log::warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    operation,
                    attempt,
                    max_attempts,
                    e,
                    backoff
                );
                std::thread::sleep(backoff);
                backoff = backoff.saturating_mul(2);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
