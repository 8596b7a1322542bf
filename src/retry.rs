//! Retry logic with exponential backoff
//!
//! This module wraps single task attempts with bounded retries. The delay before
//! attempt `n + 1` is `initial_delay * backoff_multiplier^n`, capped at `max_delay`,
//! with optional jitter to prevent thundering herd.
//!
//! The controller knows nothing about checkpointing: it drives the task through
//! its state machine and hands a final [`Verdict`] back to the caller.
//!
//! # Example
//!
//! ```no_run
//! use bulk_dl::config::RetryConfig;
//! use bulk_dl::error::StrategyError;
//! use bulk_dl::retry::{RetryController, Verdict};
//! use bulk_dl::types::{Item, StrategyKind, Task};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(item: Item) {
//! let policy = RetryConfig::default();
//! let cancel = CancellationToken::new();
//! let mut task = Task::new(item, StrategyKind::DirectFetch);
//!
//! let verdict = RetryController::new(&policy, &cancel)
//!     .run(&mut task, |_task| async { Ok::<_, StrategyError>(()) }, |_notice| {})
//!     .await;
//! assert!(matches!(verdict, Verdict::Succeeded { .. }));
//! # }
//! ```

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::{Error, StrategyError, StrategyErrorKind};
use crate::types::{Task, TaskKey, TaskState};

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, rate limiting, temporary lock contention)
/// should return `true`. Permanent failures (access denied, not found, unsupported
/// content) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for StrategyErrorKind {
    fn is_retryable(&self) -> bool {
        match self {
            StrategyErrorKind::Timeout
            | StrategyErrorKind::RateLimited
            | StrategyErrorKind::Unavailable
            | StrategyErrorKind::Transient => true,
            StrategyErrorKind::AccessDenied
            | StrategyErrorKind::NotFound
            | StrategyErrorKind::Unsupported
            | StrategyErrorKind::Permanent => false,
        }
    }
}

impl IsRetryable for StrategyError {
    fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl IsRetryable for std::io::Error {
    fn is_retryable(&self) -> bool {
        StrategyError::from(std::io::Error::from(self.kind())).is_retryable()
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Strategy(e) => e.is_retryable(),
            Error::Io(e) => e.is_retryable(),
            // Configuration, environment and checkpoint problems need operator action
            Error::Config { .. }
            | Error::Checkpoint(_)
            | Error::Environment(_)
            | Error::Serialization(_) => false,
        }
    }
}

/// Final result of running a task under the retry controller
#[must_use]
#[derive(Debug)]
pub enum Verdict<E> {
    /// An attempt succeeded
    Succeeded {
        /// Attempts made, including the successful one
        attempts: u32,
    },
    /// A permanent error occurred, or the attempt ceiling was reached
    FailedTerminal {
        /// The last error observed
        error: E,
        /// Attempts made
        attempts: u32,
    },
    /// Cancellation arrived during backoff; the task has no terminal outcome
    Abandoned {
        /// The error of the last attempt
        last_error: E,
        /// Attempts made
        attempts: u32,
    },
}

/// Information about a scheduled retry, passed to the caller's observer
#[derive(Debug)]
pub struct RetryNotice<'a, E> {
    /// Task being retried
    pub key: &'a TaskKey,
    /// Attempt that just failed (1-based)
    pub attempt: u32,
    /// Backoff before the next attempt
    pub delay: Duration,
    /// Error of the failed attempt
    pub error: &'a E,
}

/// Wraps task attempts with bounded retries and exponential backoff
pub struct RetryController<'a> {
    policy: &'a RetryConfig,
    cancel: &'a CancellationToken,
}

impl<'a> RetryController<'a> {
    /// Create a controller for one bucket's retry policy
    ///
    /// The cancellation token interrupts backoff waits only; an attempt that
    /// is already running is never interrupted by the controller.
    pub fn new(policy: &'a RetryConfig, cancel: &'a CancellationToken) -> Self {
        Self { policy, cancel }
    }

    /// Run `attempt` until success, a permanent error, or the attempt ceiling
    ///
    /// `notify` is called once per scheduled retry, before the backoff wait.
    pub async fn run<F, Fut, N, E>(&self, task: &mut Task, mut attempt: F, mut notify: N) -> Verdict<E>
    where
        F: FnMut(&Task) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        N: FnMut(RetryNotice<'_, E>),
        E: IsRetryable + std::fmt::Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);

        loop {
            task.transition(TaskState::Active);
            task.attempt += 1;

            match attempt(&*task).await {
                Ok(()) => {
                    task.transition(TaskState::Succeeded);
                    if task.attempt > 1 {
                        tracing::info!(
                            task_key = %task.key,
                            attempts = task.attempt,
                            "Task succeeded after retry"
                        );
                    }
                    return Verdict::Succeeded {
                        attempts: task.attempt,
                    };
                }
                Err(e) if e.is_retryable() && task.attempt < max_attempts => {
                    task.transition(TaskState::FailedRetryable);

                    let delay = self.policy.delay_for(task.attempt - 1);
                    let delay = if self.policy.jitter {
                        add_jitter(delay)
                    } else {
                        delay
                    };

                    tracing::warn!(
                        task_key = %task.key,
                        error = %e,
                        attempt = task.attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Attempt failed, retrying"
                    );
                    notify(RetryNotice {
                        key: &task.key,
                        attempt: task.attempt,
                        delay,
                        error: &e,
                    });

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => {
                            tracing::info!(
                                task_key = %task.key,
                                attempts = task.attempt,
                                "Cancelled during backoff, abandoning task"
                            );
                            return Verdict::Abandoned {
                                last_error: e,
                                attempts: task.attempt,
                            };
                        }
                    }
                }
                Err(e) => {
                    task.transition(TaskState::FailedTerminal);
                    if e.is_retryable() {
                        tracing::error!(
                            task_key = %task.key,
                            error = %e,
                            attempts = task.attempt,
                            "Task failed after all attempts exhausted"
                        );
                    } else {
                        tracing::error!(
                            task_key = %task.key,
                            error = %e,
                            "Task failed with non-retryable error"
                        );
                    }
                    return Verdict::FailedTerminal {
                        error: e,
                        attempts: task.attempt,
                    };
                }
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
