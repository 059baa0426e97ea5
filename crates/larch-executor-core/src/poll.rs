//! Bounded-attempt readiness polling.
//!
//! The virtualization substrate is asynchronous: a freshly booted guest
//! acquires its DHCP lease and starts sshd on its own schedule. The
//! executor turns that into a synchronous contract with one reusable
//! combinator: call a check until it yields a value or the attempt budget
//! is exhausted. Polling is a wait-for-readiness mechanism, not error
//! recovery; nothing else in the executor retries.

use std::future::Future;
use std::time::Duration;

use snafu::Snafu;
use tracing::trace;

/// Attempt budget and pacing for one readiness condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between consecutive attempts.
    pub interval: Duration,
    /// Maximum number of check invocations before giving up.
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

/// Errors from [`poll_until`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PollError {
    /// The condition never held within the attempt budget.
    #[snafu(display("condition not met after {attempts} attempts"))]
    Timeout {
        /// Number of attempts actually performed.
        attempts: u32,
    },
}

/// Invoke `check` up to `policy.max_attempts` times, sleeping
/// `policy.interval` between attempts.
///
/// Returns the first `Some` immediately, with no sleep after success.
/// A timeout is reported only after exactly `max_attempts` invocations.
/// The attempt number (1-based) is passed to the check for logging.
pub async fn poll_until<T, F, Fut>(policy: &PollPolicy, mut check: F) -> Result<T, PollError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 1..=policy.max_attempts {
        if let Some(value) = check(attempt).await {
            trace!(attempt, "condition met");
            return Ok(value);
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    TimeoutSnafu {
        attempts: policy.max_attempts,
    }
    .fail()
}
