//! Progress aggregation
//!
//! Workers report task events here from any thread. Counters are atomics; the
//! aggregator forwards per-bucket snapshots to registered [`ProgressReporter`]s
//! and broadcasts every [`Event`] to subscribers.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

use crate::types::{Bucket, Event, Outcome, TaskKey};

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Point-in-time counters of one bucket
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSnapshot {
    /// Bucket the counters belong to
    pub bucket: Option<Bucket>,
    /// Tasks dispatched to this bucket in the run
    pub total: usize,
    /// Tasks that succeeded
    pub succeeded: usize,
    /// Tasks that failed terminally
    pub failed: usize,
    /// Items skipped because a previous run completed them
    pub skipped: usize,
    /// Tasks with no terminal outcome yet
    pub remaining: usize,
    /// Attempts running right now
    pub active: usize,
    /// Highest number of simultaneously running attempts seen
    pub peak_active: usize,
    /// Most recent failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Receives progress from the scheduler (a terminal UI, a log sink)
///
/// Called from multiple worker tasks concurrently; implementations must not block.
pub trait ProgressReporter: Send + Sync {
    /// A bucket's counters changed
    fn on_progress(&self, snapshot: &BucketSnapshot);

    /// A non-fatal problem the operator should see (e.g. a corrupt checkpoint)
    fn on_warning(&self, _message: &str) {}
}

#[derive(Default)]
struct BucketCounters {
    total: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    last_error: Mutex<Option<String>>,
}

/// Thread-safe per-bucket counters plus event fan-out
pub struct ProgressAggregator {
    counters: [BucketCounters; 4],
    /// Keys that already reported a terminal outcome
    finished: Mutex<HashSet<TaskKey>>,
    event_tx: broadcast::Sender<Event>,
    reporters: Vec<Arc<dyn ProgressReporter>>,
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressAggregator {
    /// Aggregator with no reporters
    pub fn new() -> Self {
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            counters: Default::default(),
            finished: Mutex::new(HashSet::new()),
            event_tx,
            reporters: Vec::new(),
        }
    }

    /// Add a reporter that receives snapshots and warnings
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    /// Subscribe to the event stream
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Broadcast an event; having no subscribers is fine
    pub fn emit(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    /// Forget the terminal outcomes of a previous run
    pub fn reset(&self) {
        lock(&self.finished).clear();
    }

    /// Reset a bucket's counters at the start of a run
    pub fn begin(&self, bucket: Bucket, total: usize, skipped: usize) {
        let c = self.counters(bucket);
        c.total.store(total, Ordering::SeqCst);
        c.skipped.store(skipped, Ordering::SeqCst);
        c.succeeded.store(0, Ordering::SeqCst);
        c.failed.store(0, Ordering::SeqCst);
        c.active.store(0, Ordering::SeqCst);
        c.peak_active.store(0, Ordering::SeqCst);
        *lock(&c.last_error) = None;
        self.report(bucket);
    }

    /// A worker started an attempt
    pub fn attempt_started(&self, key: &TaskKey, bucket: Bucket, first_attempt: bool) {
        let c = self.counters(bucket);
        let now = c.active.fetch_add(1, Ordering::SeqCst) + 1;
        c.peak_active.fetch_max(now, Ordering::SeqCst);
        if first_attempt {
            self.emit(Event::TaskStarted {
                key: key.clone(),
                bucket,
            });
        }
    }

    /// A worker's attempt returned
    pub fn attempt_finished(&self, bucket: Bucket) {
        let c = self.counters(bucket);
        // Never underflow, even on a mismatched call
        let _ = c
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Record a task's terminal outcome
    ///
    /// Returns false (and changes nothing) if the key already reported one.
    pub fn task_finished(
        &self,
        key: &TaskKey,
        bucket: Bucket,
        outcome: Outcome,
        error: Option<String>,
    ) -> bool {
        if !lock(&self.finished).insert(key.clone()) {
            tracing::warn!(task_key = %key, "Duplicate terminal outcome ignored");
            return false;
        }

        let c = self.counters(bucket);
        match outcome {
            Outcome::Succeeded => {
                c.succeeded.fetch_add(1, Ordering::SeqCst);
            }
            Outcome::Failed => {
                c.failed.fetch_add(1, Ordering::SeqCst);
                if let Some(message) = &error {
                    *lock(&c.last_error) = Some(message.clone());
                }
            }
        }

        self.emit(Event::TaskFinished {
            key: key.clone(),
            bucket,
            outcome,
            error,
        });
        self.report(bucket);
        true
    }

    /// Surface a non-fatal warning to reporters and subscribers
    pub fn warn(&self, scope_id: &str, message: impl Into<String>) {
        let message = message.into();
        for reporter in &self.reporters {
            reporter.on_warning(&message);
        }
        self.emit(Event::CheckpointWarning {
            scope_id: scope_id.to_string(),
            message,
        });
    }

    /// Current counters of a bucket
    pub fn snapshot(&self, bucket: Bucket) -> BucketSnapshot {
        let c = self.counters(bucket);
        let total = c.total.load(Ordering::SeqCst);
        let succeeded = c.succeeded.load(Ordering::SeqCst);
        let failed = c.failed.load(Ordering::SeqCst);
        BucketSnapshot {
            bucket: Some(bucket),
            total,
            succeeded,
            failed,
            skipped: c.skipped.load(Ordering::SeqCst),
            remaining: total.saturating_sub(succeeded + failed),
            active: c.active.load(Ordering::SeqCst),
            peak_active: c.peak_active.load(Ordering::SeqCst),
            last_error: lock(&c.last_error).clone(),
        }
    }

    /// Counters of every bucket, unsupported included
    pub fn snapshots(&self) -> Vec<BucketSnapshot> {
        [
            Bucket::DirectFetch,
            Bucket::BrowserMedia,
            Bucket::BrowserCapture,
            Bucket::Unsupported,
        ]
        .into_iter()
        .map(|bucket| self.snapshot(bucket))
        .collect()
    }

    fn report(&self, bucket: Bucket) {
        if self.reporters.is_empty() {
            return;
        }
        let snapshot = self.snapshot(bucket);
        for reporter in &self.reporters {
            reporter.on_progress(&snapshot);
        }
    }

    fn counters(&self, bucket: Bucket) -> &BucketCounters {
        let index = match bucket {
            Bucket::DirectFetch => 0,
            Bucket::BrowserMedia => 1,
            Bucket::BrowserCapture => 2,
            Bucket::Unsupported => 3,
        };
        &self.counters[index]
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
