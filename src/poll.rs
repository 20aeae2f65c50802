//! Bounded polling with exponential backoff and cancellation.
//!
//! [`wait`] drives a condition function until it reports done, fails, or the
//! caller's [`WaitContext`] is cancelled or runs past its deadline. It is not
//! tied to snapshots: anything that needs to wait for cluster state to converge
//! can use it.
//!
//! # Example
//!
//! ```ignore
//! use snapshotter::poll::{wait, PollConfig, WaitContext};
//!
//! let ctx = WaitContext::with_timeout(Duration::from_secs(60));
//! wait(&ctx, &PollConfig::default(), "wait_for_claim", || async {
//!     Ok(claim_is_bound(&client).await?)
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::Error;

/// Shortest delay between two polls; smaller intervals are raised to this
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for waits on externally-mutated state.
#[derive(Clone, Debug, PartialEq)]
pub struct PollConfig {
    /// Delay before the second attempt
    pub initial_interval: Duration,
    /// Upper bound on the delay between attempts
    pub max_interval: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Randomize each delay between 0.5x and 1.5x
    pub jitter: bool,
    /// Bound used when the caller's context carries no deadline
    pub default_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
            default_timeout: Duration::from_secs(600),
        }
    }
}

impl PollConfig {
    /// Fixed interval, no backoff and no jitter
    pub fn fixed(interval: Duration, default_timeout: Duration) -> Self {
        let interval = interval.max(MIN_POLL_INTERVAL);
        Self {
            initial_interval: interval,
            max_interval: interval,
            backoff_multiplier: 1.0,
            jitter: false,
            default_timeout,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_multiplier).min(self.max_interval.as_secs_f64()),
        )
        .max(MIN_POLL_INTERVAL)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64(delay.as_secs_f64() * factor)
    }
}

/// Cancellation and deadline for a single caller invocation.
///
/// Cloning is cheap and clones share the same cancellation token.
#[derive(Clone, Debug, Default)]
pub struct WaitContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl WaitContext {
    /// Context with a fresh token and no deadline
    pub fn new() -> Self {
        Self::default()
    }

    /// Context that expires `timeout` from now.
    ///
    /// A timeout too large to represent as an instant means no deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Context driven by an existing token (e.g. a shutdown signal)
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Same token with a deadline that is the earlier of the current one and
    /// `timeout` from now
    pub fn timeout(&self, timeout: Duration) -> Self {
        let deadline = match (self.deadline, Instant::now().checked_add(timeout)) {
            (Some(existing), Some(candidate)) => Some(existing.min(candidate)),
            (existing, candidate) => existing.or(candidate),
        };
        Self {
            cancel: self.cancel.clone(),
            deadline,
        }
    }

    /// The cancellation token
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel this context and every clone of it
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the context has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The deadline, if one was set
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Run one platform round-trip, aborting it on cancellation or deadline.
    pub async fn run<F, T>(&self, operation: &str, fut: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        self.run_until(operation, self.deadline, fut).await
    }

    async fn run_until<F, T>(
        &self,
        operation: &str,
        deadline: Option<Instant>,
        fut: F,
    ) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        if self.cancel.is_cancelled() {
            return Err(cancelled(operation));
        }
        match deadline {
            Some(deadline) => {
                let budget = deadline.saturating_duration_since(Instant::now());
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(cancelled(operation)),
                    _ = tokio::time::sleep_until(deadline) => Err(Error::Timeout {
                        operation: operation.to_string(),
                        timeout: budget,
                    }),
                    res = fut => res,
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(cancelled(operation)),
                    res = fut => res,
                }
            }
        }
    }
}

fn cancelled(operation: &str) -> Error {
    Error::Cancelled {
        operation: operation.to_string(),
    }
}

/// Poll `condition` until it returns `Ok(true)`.
///
/// - `Ok(false)` sleeps with backoff and polls again
/// - `Err(e)` ends the wait with `e`; condition errors are never retried
/// - cancellation ends the wait with [`Error::Cancelled`]
/// - passing the deadline ends the wait with [`Error::Timeout`]
///
/// When `ctx` has no deadline the wait is bounded by
/// [`PollConfig::default_timeout`]. Delays never drop below
/// [`MIN_POLL_INTERVAL`].
pub async fn wait<F, Fut>(
    ctx: &WaitContext,
    config: &PollConfig,
    operation: &str,
    mut condition: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let start = Instant::now();
    let deadline = ctx
        .deadline
        .or_else(|| start.checked_add(config.default_timeout));
    let mut delay = config.initial_interval.max(MIN_POLL_INTERVAL);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let done = ctx
            .run_until(operation, deadline, condition())
            .await
            .map_err(|e| timeout_budget(e, start))?;
        if done {
            debug!(operation = %operation, attempt, "condition met");
            return Ok(());
        }

        let sleep_for = config.jittered(delay).max(MIN_POLL_INTERVAL);
        trace!(
            operation = %operation,
            attempt,
            delay_ms = sleep_for.as_millis() as u64,
            "condition not yet met"
        );

        let now = Instant::now();
        let wake = match (now.checked_add(sleep_for), deadline) {
            (Some(wake), Some(deadline)) => wake.min(deadline),
            (Some(wake), None) => wake,
            (None, Some(deadline)) => deadline,
            (None, None) => now + MIN_POLL_INTERVAL,
        };
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(cancelled(operation)),
            _ = tokio::time::sleep_until(wake) => {}
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(Error::Timeout {
                operation: operation.to_string(),
                timeout: start.elapsed(),
            });
        }

        delay = config.next_delay(delay);
    }
}

// Timeouts raised mid-attempt report the whole budget, not the remainder.
fn timeout_budget(err: Error, start: Instant) -> Error {
    match err {
        Error::Timeout { operation, .. } => Error::Timeout {
            operation,
            timeout: start.elapsed(),
        },
        other => other,
    }
}
