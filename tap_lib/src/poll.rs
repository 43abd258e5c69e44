//! Cancellable, bounded re-checking of a remote condition.

use std::{future::Future, ops::ControlFlow, time::Duration};

use tap_data::Queue;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, TapError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    /// multiply the interval by `factor` after every check, never waiting longer than `max`
    Exponential { factor: u32, max: Duration },
}

/// How often to re-check and when to give up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub backoff: Backoff,
    pub max_attempts: Option<u32>,
    pub deadline: Option<Duration>,
}

impl PollPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            backoff: Backoff::Fixed,
            max_attempts: None,
            deadline: None,
        }
    }

    pub fn exponential(initial: Duration, factor: u32, max: Duration) -> Self {
        Self {
            interval: initial,
            backoff: Backoff::Exponential { factor, max },
            max_attempts: None,
            deadline: None,
        }
    }

    /// short checks growing to a few seconds, for waiting on a job up to `timeout`
    pub fn bounded(timeout: Duration) -> Self {
        Self::exponential(Duration::from_millis(100), 2, Duration::from_secs(5)).with_deadline(timeout)
    }

    /// Polling cadence matching the expected duration of a queue.
    ///
    /// Long queues are checked coarsely so that waiting clients do not load
    /// the service; `5h` jobs are normally retrieved in a later invocation.
    pub fn for_queue(queue: Queue) -> Self {
        match queue {
            Queue::OneMinute => Self::bounded(queue.expected_duration()),
            Queue::OneHour => Self::fixed(Duration::from_secs(5 * 60)).with_max_attempts(24),
            Queue::FiveHours => Self::fixed(Duration::from_secs(30 * 60)).with_max_attempts(20),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// pause after the `attempt`-th check, counting from 1
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential { factor, max } => factor
                .checked_pow(attempt.saturating_sub(1))
                .and_then(|multiplier| self.interval.checked_mul(multiplier))
                .map_or(max, |delay| delay.min(max)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// the probe reported completion
    Ready(T),
    /// the deadline passed, holds the last observed value
    TimedOut { value: T, attempts: u32 },
    /// `max_attempts` checks were made, holds the last observed value
    Exhausted { value: T, attempts: u32 },
}

impl<T> PollOutcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            PollOutcome::Ready(value)
            | PollOutcome::TimedOut { value, .. }
            | PollOutcome::Exhausted { value, .. } => value,
        }
    }
}

/// Runs `probe` until it breaks, following `policy` between checks.
///
/// The probe is called immediately, then after each delay. Errors from the
/// probe end polling at once. The last delay before a deadline is shortened
/// so that a timed out outcome holds a check made at or after the deadline.
/// Cancelling `cancel` interrupts a pending delay and yields
/// [`TapError::Cancelled`].
pub async fn poll<T, F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<PollOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ControlFlow<T, T>>>,
{
    let started = Instant::now();
    let mut attempts = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(TapError::Cancelled);
        }
        let last = match probe().await? {
            ControlFlow::Break(value) => return Ok(PollOutcome::Ready(value)),
            ControlFlow::Continue(value) => value,
        };
        attempts += 1;
        if let Some(max_attempts) = policy.max_attempts {
            if attempts >= max_attempts {
                return Ok(PollOutcome::Exhausted {
                    value: last,
                    attempts,
                });
            }
        }
        let mut delay = policy.delay(attempts);
        if let Some(deadline) = policy.deadline {
            let elapsed = started.elapsed();
            if elapsed >= deadline {
                return Ok(PollOutcome::TimedOut {
                    value: last,
                    attempts,
                });
            }
            delay = delay.min(deadline - elapsed);
        }
        debug!("check {} not ready, next in {:?}", attempts, delay);
        tokio::select! {
            _ = cancel.cancelled() => return Err(TapError::Cancelled),
            _ = sleep(delay) => {}
        }
    }
}
