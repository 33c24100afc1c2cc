//! # Bounded Waits
//!
//! Every readiness and status wait in the matrix goes through [`wait_until`]: a
//! condition closure evaluated immediately, then once per `gap`, until it succeeds or
//! the overall `timeout` elapses. A failing attempt is a retryable condition described
//! by its error value; only the final timeout is a hard failure, and it carries the
//! last observed condition.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, trace};

use crate::error::CompatError;

/// Timeout and poll interval for one wait site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub gap: Duration,
}

impl WaitPolicy {
    pub const fn new(timeout: Duration, gap: Duration) -> Self {
        Self { timeout, gap }
    }

    pub const fn from_millis(timeout_ms: u64, gap_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(timeout_ms),
            Duration::from_millis(gap_ms),
        )
    }
}

/// Raised when a condition was never satisfied within its policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitTimeout {
    pub operation: String,
    pub elapsed: Duration,
    pub attempts: u32,
    pub last_condition: String,
}

impl From<WaitTimeout> for CompatError {
    fn from(timeout: WaitTimeout) -> Self {
        CompatError::Timeout {
            operation: timeout.operation,
            elapsed: timeout.elapsed,
            last_condition: timeout.last_condition,
        }
    }
}

/// Evaluate `check` until it returns `Ok`, bounded by `policy`
///
/// The first attempt runs without delay. An attempt that is still pending when the
/// overall deadline passes counts as a failed attempt.
pub async fn wait_until<T, E, F, Fut>(
    operation: &str,
    policy: WaitPolicy,
    mut check: F,
) -> Result<T, WaitTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let remaining = policy.timeout.saturating_sub(started.elapsed());

        let condition = match timeout(remaining.max(policy.gap), check()).await {
            Ok(Ok(value)) => {
                debug!(
                    operation,
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Wait condition satisfied"
                );
                return Ok(value);
            }
            Ok(Err(condition)) => condition.to_string(),
            Err(_) => format!(
                "attempt {attempts} did not complete within {}ms",
                remaining.max(policy.gap).as_millis()
            ),
        };

        let elapsed = started.elapsed();
        if elapsed + policy.gap > policy.timeout {
            debug!(
                operation,
                attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                last_condition = %condition,
                "Wait condition timed out"
            );
            return Err(WaitTimeout {
                operation: operation.to_string(),
                elapsed,
                attempts,
                last_condition: condition,
            });
        }

        trace!(operation, attempts, condition = %condition, "Wait condition not yet satisfied");
        sleep(policy.gap).await;
    }
}
