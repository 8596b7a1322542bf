//! Bounded multi-bucket scheduler
//!
//! A run classifies the discovered items, checks the environment, then starts
//! one worker pool per non-empty bucket. Each pool runs at most its bucket's
//! `concurrency` tasks at a time, pulling from a queue in discovery order.
//! Terminal outcomes go to the checkpoint ledger as they happen.
//!
//! Cancellation stops workers from picking up new tasks; in-flight attempts
//! finish (executors see the token and may stop early), then the ledger is
//! flushed one last time. Tasks that never reached a terminal state are absent
//! from the record and get classified as pending again by the next run.
//!
//! # Example
//!
//! ```no_run
//! use bulk_dl::config::Config;
//! use bulk_dl::scheduler::{RunRequest, Scheduler};
//! use bulk_dl::strategy::StrategySet;
//! use bulk_dl::types::Item;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(strategies: StrategySet, items: Vec<Item>) -> bulk_dl::Result<()> {
//! let cancel = CancellationToken::new();
//! bulk_dl::spawn_signal_listener(cancel.clone());
//!
//! let scheduler = Scheduler::new(Config::default(), strategies, cancel)?;
//! let summary = scheduler
//!     .run(RunRequest::new("folder-123", "/data/downloads", items))
//!     .await?;
//! println!("{} succeeded, {} failed", summary.succeeded(), summary.failed());
//! # Ok(())
//! # }
//! ```

mod ledger;
mod worker;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{CheckpointLoad, CheckpointRecord, CheckpointStore};
use crate::classifier::{Classification, Filters, classify};
use crate::config::Config;
use crate::error::{EnvironmentError, Result};
use crate::progress::{BucketSnapshot, ProgressAggregator};
use crate::strategy::StrategySet;
use crate::types::{Bucket, Event, Item, TaskKey};

use ledger::Ledger;
use worker::{RunContext, run_worker};

/// How a run treats the existing checkpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Load the scope's checkpoint and skip completed keys
    pub resume: bool,
    /// Delete the scope's checkpoint before dispatching (after preflight)
    pub clear_checkpoint: bool,
    /// Delete the checkpoint when the run finishes with nothing failed or pending
    pub clear_on_success: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            resume: false,
            clear_checkpoint: false,
            clear_on_success: true,
        }
    }
}

/// Input of one run
#[derive(Clone, Debug)]
pub struct RunRequest {
    /// Scope the checkpoint is keyed by
    pub scope_id: String,
    /// Root directory all artifacts are written under
    pub destination_root: PathBuf,
    /// Items produced by discovery
    pub items: Vec<Item>,
    /// Inclusion filters
    pub filters: Filters,
    /// Checkpoint handling
    pub options: RunOptions,
}

impl RunRequest {
    /// Request with no filters and default options
    pub fn new(
        scope_id: impl Into<String>,
        destination_root: impl Into<PathBuf>,
        items: Vec<Item>,
    ) -> Self {
        Self {
            scope_id: scope_id.into(),
            destination_root: destination_root.into(),
            items,
            filters: Filters::default(),
            options: RunOptions::default(),
        }
    }

    /// Set the inclusion filters
    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    /// Set the checkpoint handling
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }
}

/// What a run did
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    /// Scope of the run
    pub scope_id: String,
    /// Final counters of every bucket
    pub buckets: Vec<BucketSnapshot>,
    /// Items skipped because a previous run completed them
    pub skipped: usize,
    /// Items excluded by the inclusion filters
    pub filtered_out: usize,
    /// Items dropped as duplicate keys
    pub duplicates: usize,
    /// Keys of items no strategy can handle
    pub unsupported: Vec<TaskKey>,
    /// Tasks left pending because the run was cancelled
    pub abandoned: usize,
    /// Completed keys of the final record
    pub completed_keys: BTreeSet<TaskKey>,
    /// Failed keys of the final record
    pub failed_keys: BTreeSet<TaskKey>,
    /// Whether cancellation was observed
    pub cancelled: bool,
    /// Whether the checkpoint was deleted at the end
    pub checkpoint_cleared: bool,
}

impl RunSummary {
    /// Counters of one bucket
    pub fn bucket(&self, bucket: Bucket) -> Option<&BucketSnapshot> {
        self.buckets.iter().find(|s| s.bucket == Some(bucket))
    }

    /// Tasks that succeeded in this run
    pub fn succeeded(&self) -> usize {
        self.buckets.iter().map(|s| s.succeeded).sum()
    }

    /// Tasks that failed in this run
    pub fn failed(&self) -> usize {
        self.buckets.iter().map(|s| s.failed).sum()
    }

    /// Tasks that were dispatchable but have no outcome
    pub fn remaining(&self) -> usize {
        self.buckets.iter().map(|s| s.remaining).sum()
    }

    /// Whether every dispatched task succeeded
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.remaining() == 0 && self.failed_keys.is_empty()
    }
}

/// Runs scopes through the per-bucket worker pools
///
/// Owns no global state: the checkpoint store, counters and cancellation token
/// all belong to this instance. Once the token is cancelled, later runs stop
/// before dispatching anything.
pub struct Scheduler {
    config: Arc<Config>,
    store: Arc<CheckpointStore>,
    strategies: StrategySet,
    cancel: CancellationToken,
    progress: Arc<ProgressAggregator>,
}

impl Scheduler {
    /// Create a scheduler with a checkpoint store rooted at `config.checkpoint_dir`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if the configuration is invalid.
    pub fn new(config: Config, strategies: StrategySet, cancel: CancellationToken) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(CheckpointStore::new(config.checkpoint_dir.clone()));
        Ok(Self {
            config: Arc::new(config),
            store,
            strategies,
            cancel,
            progress: Arc::new(ProgressAggregator::new()),
        })
    }

    /// Use an existing checkpoint store instead of the configured directory
    pub fn with_store(mut self, store: Arc<CheckpointStore>) -> Self {
        self.store = store;
        self
    }

    /// Use an aggregator built with reporters
    pub fn with_progress(mut self, progress: Arc<ProgressAggregator>) -> Self {
        self.progress = progress;
        self
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.progress.subscribe()
    }

    /// The checkpoint store
    pub fn store(&self) -> &Arc<CheckpointStore> {
        &self.store
    }

    /// Live counters
    pub fn progress(&self) -> &Arc<ProgressAggregator> {
        &self.progress
    }

    /// The active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run a scope to completion or cancellation
    ///
    /// Task failures never fail the run; they end up in the summary and the
    /// record's failed set.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::Environment`] when preflight fails; nothing was
    ///   dispatched and the checkpoint was not touched.
    /// - [`crate::Error::Checkpoint`] when `clear_checkpoint` cannot remove the
    ///   record, or the final flush cannot write it.
    pub async fn run(&self, request: RunRequest) -> Result<RunSummary> {
        let RunRequest {
            scope_id,
            destination_root,
            items,
            filters,
            options,
        } = request;

        filters.log_active();

        let previous = if options.resume && !options.clear_checkpoint {
            self.load_previous(&scope_id, &destination_root).await
        } else {
            None
        };

        let mut classification = classify(&items, previous.as_ref(), &filters);

        self.preflight(&destination_root, &classification).await?;

        if options.clear_checkpoint {
            self.store.clear(&scope_id).await?;
        }

        let discovered: HashSet<TaskKey> = items.iter().map(Item::key).collect();
        let ledger = Ledger::new(
            scope_id.clone(),
            destination_root.clone(),
            self.store.clone(),
            self.progress.clone(),
            self.config.checkpoint_interval,
            previous.as_ref(),
            &discovered,
        );

        self.progress.reset();
        for bucket in Bucket::DISPATCHABLE {
            self.progress.begin(
                bucket,
                classification.tasks(bucket).len(),
                classification.skipped_in(bucket),
            );
        }
        self.progress.begin(
            Bucket::Unsupported,
            0,
            classification.skipped_in(Bucket::Unsupported),
        );

        for item in &classification.unsupported {
            tracing::debug!(task_key = %item.key(), mime_type = %item.mime_type, "No strategy for item");
        }
        tracing::info!(
            scope_id = %scope_id,
            direct_fetch = classification.direct_fetch.len(),
            browser_media = classification.browser_media.len(),
            browser_capture = classification.browser_capture.len(),
            unsupported = classification.unsupported.len(),
            skipped = classification.skipped.len(),
            "Starting run"
        );
        self.progress.emit(Event::RunStarted {
            scope_id: scope_id.clone(),
            pending: classification.pending(),
            skipped: classification.skipped.len(),
        });

        let ctx = Arc::new(RunContext {
            strategies: self.strategies.clone(),
            cancel: self.cancel.clone(),
            progress: self.progress.clone(),
            ledger,
            abandoned: AtomicUsize::new(0),
        });

        let mut handles = Vec::new();
        for bucket in Bucket::DISPATCHABLE {
            let tasks = classification.take_tasks(bucket);
            let Some(bucket_config) = self.config.bucket(bucket) else {
                continue;
            };
            if tasks.is_empty() {
                continue;
            }

            let workers = bucket_config.concurrency.min(tasks.len());
            tracing::debug!(bucket = %bucket, workers, tasks = tasks.len(), "Starting worker pool");

            let queue = Arc::new(Mutex::new(VecDeque::from(tasks)));
            for worker_id in 0..workers {
                handles.push(tokio::spawn(run_worker(
                    ctx.clone(),
                    bucket,
                    bucket_config.retry.clone(),
                    queue.clone(),
                    worker_id,
                )));
            }
        }

        for result in join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(scope_id = %scope_id, error = %e, "Worker task failed");
            }
        }

        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            tracing::info!(scope_id = %scope_id, "Cancellation observed, drain complete");
            self.progress.emit(Event::Cancelled {
                scope_id: scope_id.clone(),
            });
        }

        let record = ctx.ledger.flush().await?;
        tracing::info!(
            scope_id = %scope_id,
            completed = record.completed_keys.len(),
            failed = record.failed_keys.len(),
            "Final checkpoint flushed"
        );

        let abandoned = ctx.abandoned.load(Ordering::SeqCst);
        let mut summary = self.summarize(&scope_id, classification, record, abandoned, cancelled);

        if options.clear_on_success && summary.is_complete() {
            match self.store.clear(&scope_id).await {
                Ok(()) => summary.checkpoint_cleared = true,
                Err(e) => {
                    tracing::warn!(scope_id = %scope_id, error = %e, "Could not remove checkpoint after success");
                    self.progress
                        .warn(&scope_id, format!("could not remove checkpoint: {e}"));
                }
            }
        }

        tracing::info!(
            scope_id = %scope_id,
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            skipped = summary.skipped,
            abandoned,
            cancelled,
            "Run finished"
        );
        self.progress.emit(Event::RunFinished {
            scope_id,
            succeeded: summary.succeeded(),
            failed: summary.failed(),
            cancelled,
        });

        Ok(summary)
    }

    async fn load_previous(&self, scope_id: &str, destination_root: &Path) -> Option<CheckpointRecord> {
        match self.store.load_checked(scope_id).await {
            CheckpointLoad::Found(record) => {
                if Path::new(&record.destination_root) != destination_root {
                    tracing::warn!(
                        scope_id,
                        recorded = %record.destination_root,
                        requested = %destination_root.display(),
                        "Resuming into a different destination than the checkpoint recorded"
                    );
                }
                Some(record)
            }
            CheckpointLoad::Absent => {
                tracing::info!(scope_id, "No checkpoint found, starting fresh");
                None
            }
            CheckpointLoad::Corrupt { path, reason } => {
                self.progress.warn(
                    scope_id,
                    format!(
                        "checkpoint {} is unusable ({reason}), starting fresh",
                        path.display()
                    ),
                );
                None
            }
        }
    }

    /// Abort before any dispatch or checkpoint mutation if the run cannot work
    async fn preflight(&self, destination_root: &Path, classification: &Classification) -> Result<()> {
        probe_destination(destination_root).await?;
        self.strategies
            .preflight(&classification.strategies_in_use())
            .await?;
        Ok(())
    }

    fn summarize(
        &self,
        scope_id: &str,
        classification: Classification,
        record: CheckpointRecord,
        abandoned: usize,
        cancelled: bool,
    ) -> RunSummary {
        RunSummary {
            scope_id: scope_id.to_string(),
            buckets: self.progress.snapshots(),
            skipped: classification.skipped.len(),
            filtered_out: classification.filtered_out,
            duplicates: classification.duplicates,
            unsupported: classification.unsupported.iter().map(Item::key).collect(),
            abandoned,
            completed_keys: record.completed_keys,
            failed_keys: record.failed_keys,
            cancelled,
            checkpoint_cleared: false,
        }
    }
}

/// Create the destination root and prove a file can be written in it
async fn probe_destination(root: &Path) -> std::result::Result<(), EnvironmentError> {
    let not_writable = |e: std::io::Error| EnvironmentError::DestinationNotWritable {
        path: root.to_path_buf(),
        reason: e.to_string(),
    };

    tokio::fs::create_dir_all(root).await.map_err(not_writable)?;
    let probe = root.join(format!(".bulk-dl-probe-{}", std::process::id()));
    tokio::fs::write(&probe, b"").await.map_err(not_writable)?;
    let _ = tokio::fs::remove_file(&probe).await;
    Ok(())
}
