//! Bounded retry with backoff
//!
//! [`execute`] runs an attempt function until it succeeds, reports a fatal
//! failure, the deadline passes, or the policy's cancellation token fires.
//! Waits are clipped to the remaining budget and no attempt starts after the
//! deadline, so a call returns within `deadline` plus one attempt's duration.

use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Default wall-clock budget for a retried operation
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(180);

/// Outcome of a failed attempt
#[derive(Debug)]
pub enum Attempt<E> {
    /// Worth another try after backing off
    Retryable(E),
    /// Surfaced immediately, no further attempts
    Fatal(E),
}

/// Classification returned by a caller-supplied classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    Retryable,
    Fatal,
}

impl<E> Attempt<E> {
    pub fn classify(err: E, retry: Retry) -> Self {
        match retry {
            Retry::Retryable => Attempt::Retryable(err),
            Retry::Fatal => Attempt::Fatal(err),
        }
    }
}

/// Why a retried operation gave up
#[derive(Debug)]
pub enum RetryError<E> {
    Fatal(E),
    DeadlineExceeded {
        last: E,
        attempts: u32,
        elapsed: Duration,
    },
    Cancelled {
        last: Option<E>,
        attempts: u32,
    },
}

/// Wait between attempts
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl Backoff {
    /// Delay after the given zero-based attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(interval) => *interval,
            Backoff::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let exponent = attempt.min(64) as i32;
                let scaled = initial.as_secs_f64() * multiplier.powi(exponent);
                if scaled.is_nan() || scaled < 0.0 {
                    Duration::ZERO
                } else if scaled >= max.as_secs_f64() {
                    *max
                } else {
                    Duration::from_secs_f64(scaled)
                }
            }
        }
    }
}

/// Shared cancellation signal, checked between attempts
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Retry policy for remote operations
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Hard ceiling on elapsed time
    pub deadline: Duration,

    pub backoff: Backoff,

    /// Scale each wait by a random factor in `[0.5, 1.0]`
    pub jitter: bool,

    pub cancel: Option<CancellationToken>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            backoff: Backoff::default(),
            jitter: false,
            cancel: None,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(deadline: Duration, interval: Duration) -> Self {
        Self {
            deadline,
            backoff: Backoff::Fixed(interval),
            ..Self::default()
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.backoff.delay_for_attempt(attempt);
        if self.jitter {
            // Whole milliseconds keep waits on the timer's resolution.
            let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
            Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
        } else {
            delay
        }
    }
}

/// Run `op` under `policy`
pub async fn execute<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> std::result::Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, Attempt<E>>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let mut attempts: u32 = 0;
    let mut last: Option<E> = None;

    loop {
        if policy.is_cancelled() {
            tracing::debug!("Retry cancelled after {} attempts", attempts);
            return Err(RetryError::Cancelled { last, attempts });
        }

        attempts += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(Attempt::Fatal(err)) => return Err(RetryError::Fatal(err)),
            Err(Attempt::Retryable(err)) => err,
        };

        let elapsed = start.elapsed();
        let remaining = policy.deadline.saturating_sub(elapsed);
        if remaining.is_zero() {
            tracing::debug!(
                "Giving up after {} attempts ({:?}): {}",
                attempts,
                elapsed,
                err
            );
            return Err(RetryError::DeadlineExceeded {
                last: err,
                attempts,
                elapsed,
            });
        }

        let delay = policy.delay_for_attempt(attempts - 1).min(remaining);
        tracing::debug!(
            "Attempt {} failed, retrying in {:?}: {}",
            attempts,
            delay,
            err
        );
        last = Some(err);
        sleep(delay).await;
    }
}

/// Run a plain fallible `op`, deciding retries with `classify`
pub async fn execute_classified<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    classify: C,
    mut op: F,
) -> std::result::Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    C: Fn(&E) -> Retry,
    E: std::fmt::Display,
{
    let classify = &classify;
    execute(policy, move || {
        let fut = op();
        async move {
            fut.await.map_err(|err| {
                let retry = classify(&err);
                Attempt::classify(err, retry)
            })
        }
    })
    .await
}
