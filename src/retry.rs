//! Bounded polling retry.
//!
//! Every cluster call that can be transiently unavailable, and every readiness
//! poll, goes through [`do_retry`]. The operation reports one of three
//! outcomes per attempt; the loop sleeps between attempts and gives up once the
//! deadline passes. There is no other cancellation: a caller that wants to stop
//! waiting lets the timeout elapse.

use std::fmt::{Debug, Display};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::debug;

/// Smallest sleep between attempts, so a zero interval cannot spin.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Result of one attempt.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// Finished; stop and return the value.
    Done(T),
    /// Not there yet; try again after the interval.
    Retry(E),
    /// Terminal failure; stop immediately.
    Fail(E),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryError<E: Debug + Display> {
    #[error("{0}")]
    Failed(E),

    #[error("timed out after {timeout:?} ({attempts} attempts): {last}")]
    TimedOut {
        timeout: Duration,
        attempts: u32,
        last: E,
    },
}

impl<E: Debug + Display> RetryError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RetryError::TimedOut { .. })
    }

    /// The error from the final attempt.
    pub fn into_last(self) -> E {
        match self {
            RetryError::Failed(e) => e,
            RetryError::TimedOut { last, .. } => last,
        }
    }

    pub fn last(&self) -> &E {
        match self {
            RetryError::Failed(e) => e,
            RetryError::TimedOut { last, .. } => last,
        }
    }
}

/// Timeout and poll interval for one retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl RetryPolicy {
    pub const fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

/// Polls `op` until it reports `Done` or `Fail`, or until `policy.timeout`
/// has elapsed. The last sleep is clipped to the deadline, so an operation
/// that always retries fails no earlier than the timeout and no later than
/// one interval past it.
pub async fn do_retry<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, RetryError<E>>
where
    E: Debug + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = RetryOutcome<T, E>>,
{
    // A timeout too large to represent never expires.
    let deadline = Instant::now().checked_add(policy.timeout);
    let interval = policy.interval.max(MIN_INTERVAL);
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match op().await {
            RetryOutcome::Done(value) => return Ok(value),
            RetryOutcome::Fail(err) => return Err(RetryError::Failed(err)),
            RetryOutcome::Retry(err) => {
                let now = Instant::now();
                let remaining = match deadline {
                    Some(deadline) if now >= deadline => {
                        return Err(RetryError::TimedOut {
                            timeout: policy.timeout,
                            attempts,
                            last: err,
                        });
                    }
                    Some(deadline) => deadline - now,
                    None => interval,
                };
                debug!(attempt = attempts, error = %err, "Retrying");
                sleep(interval.min(remaining)).await;
            }
        }
    }
}
