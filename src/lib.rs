//! # bulk-dl
//!
//! Orchestration core for bulk downloads of a remote folder or collection.
//!
//! ## Design Philosophy
//!
//! bulk-dl is designed to be:
//! - **Resumable** - Progress is checkpointed atomically; an interrupted run
//!   picks up exactly where it stopped
//! - **Bounded** - Each strategy bucket has its own worker limit, so a
//!   browser-driven strategy never starves direct downloads
//! - **Library-first** - The mechanics of fetching, exporting and capturing
//!   are pluggable [`strategy::StrategyExecutor`]s supplied by the embedder
//! - **Event-driven** - Consumers subscribe to events or register a
//!   [`progress::ProgressReporter`], no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use bulk_dl::{Config, RunRequest, Scheduler, StrategySet};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let strategies = StrategySet::new(); // register executors here
//!     let cancel = CancellationToken::new();
//!     bulk_dl::spawn_signal_listener(cancel.clone());
//!
//!     let scheduler = Scheduler::new(Config::default(), strategies, cancel)?;
//!
//!     // Subscribe to events
//!     let mut events = scheduler.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let items = Vec::new(); // from discovery
//!     let summary = scheduler
//!         .run(RunRequest::new("folder-123", "/data/downloads", items))
//!         .await?;
//!     println!("{} succeeded, {} failed", summary.succeeded(), summary.failed());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Crash-consistent checkpoint persistence
pub mod checkpoint;
/// Item classification into strategy buckets
pub mod classifier;
/// Command line arguments
pub mod cli;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Progress counters and reporting
pub mod progress;
/// Retry logic with exponential backoff
pub mod retry;
/// Bounded multi-bucket scheduler
pub mod scheduler;
/// Strategy executor interface
pub mod strategy;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use checkpoint::{CheckpointInfo, CheckpointLoad, CheckpointRecord, CheckpointStore};
pub use classifier::{Classification, Filters, classify};
pub use config::{BucketConfig, Config, RetryConfig};
pub use error::{
    CheckpointError, EnvironmentError, Error, Result, StrategyError, StrategyErrorKind,
};
pub use progress::{BucketSnapshot, ProgressAggregator, ProgressReporter};
pub use retry::IsRetryable;
pub use scheduler::{RunOptions, RunRequest, RunSummary, Scheduler};
pub use strategy::{StrategyExecutor, StrategySet};
pub use types::{Bucket, Event, Item, Outcome, StrategyKind, Task, TaskKey, TaskState};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process receives a termination signal
///
/// This is the only place an OS signal turns into a cancellation; the
/// scheduler itself only ever looks at the token.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// The listener also stops (without cancelling) if the token is cancelled
/// elsewhere first.
///
/// # Example
///
/// ```no_run
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() {
///     let cancel = CancellationToken::new();
///     let listener = bulk_dl::spawn_signal_listener(cancel.clone());
///
///     // ... run the scheduler with `cancel` ...
///
///     listener.abort();
/// }
/// ```
pub fn spawn_signal_listener(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => {
                tracing::info!("Cancelling run, in-flight tasks will finish first");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            // Never resolve, so a broken listener does not cancel the run
            std::future::pending::<()>().await;
        }
    }
}
