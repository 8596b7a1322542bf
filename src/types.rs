//! Core types for bulk-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Stable identifier of a task, derived from the source item's id and name
///
/// Renaming an item on the remote side produces a different key, so a renamed
/// item is downloaded again on the next run.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskKey(pub String);

impl TaskKey {
    /// Build the key for an item from its immutable id and its current name
    pub fn for_item(id: &str, name: &str) -> Self {
        Self(format!("{id}_{name}"))
    }

    /// Get the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strategy that executes a task
///
/// Selected once by the classifier. Each variant has exactly one executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Plain download of the item's bytes
    DirectFetch,
    /// Server-side export of a native document into a portable format
    ExportConvert,
    /// Media extraction through a browser session and a transcoder
    BrowserMediaExtract,
    /// Page-by-page capture of a rendered document in a browser
    BrowserPageCapture,
}

impl StrategyKind {
    /// All strategies, in dispatch order
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::DirectFetch,
        StrategyKind::ExportConvert,
        StrategyKind::BrowserMediaExtract,
        StrategyKind::BrowserPageCapture,
    ];

    /// Bucket whose worker pool runs this strategy
    pub fn bucket(&self) -> Bucket {
        match self {
            StrategyKind::DirectFetch | StrategyKind::ExportConvert => Bucket::DirectFetch,
            StrategyKind::BrowserMediaExtract => Bucket::BrowserMedia,
            StrategyKind::BrowserPageCapture => Bucket::BrowserCapture,
        }
    }

    /// Stable name for logs and config keys
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::DirectFetch => "direct_fetch",
            StrategyKind::ExportConvert => "export_convert",
            StrategyKind::BrowserMediaExtract => "browser_media_extract",
            StrategyKind::BrowserPageCapture => "browser_page_capture",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Group of tasks sharing one concurrency limit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    /// Network-bound downloads and exports, highly parallel
    DirectFetch,
    /// Browser-driven media extraction
    BrowserMedia,
    /// Browser-driven page capture
    BrowserCapture,
    /// Items no strategy can handle; never dispatched
    Unsupported,
}

impl Bucket {
    /// Buckets that own a worker pool
    pub const DISPATCHABLE: [Bucket; 3] = [
        Bucket::DirectFetch,
        Bucket::BrowserMedia,
        Bucket::BrowserCapture,
    ];

    /// Stable name for logs and config keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::DirectFetch => "direct_fetch",
            Bucket::BrowserMedia => "browser_media",
            Bucket::BrowserCapture => "browser_capture",
            Bucket::Unsupported => "unsupported",
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task lifecycle state
///
/// `Pending -> Active -> (Succeeded | FailedRetryable -> Active | FailedTerminal)`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created, not yet picked up by a worker
    Pending,
    /// An attempt is running
    Active,
    /// Finished successfully
    Succeeded,
    /// Last attempt failed with a transient error, waiting for backoff
    FailedRetryable,
    /// Failed for good in this run
    FailedTerminal,
}

impl TaskState {
    /// Whether no further transition can occur in this run
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::FailedTerminal)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Active, Succeeded)
                | (Active, FailedRetryable)
                | (Active, FailedTerminal)
                | (FailedRetryable, Active)
                | (FailedRetryable, FailedTerminal)
        )
    }
}

/// Item yielded by discovery
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Immutable id assigned by the source
    pub id: String,
    /// Current display name
    pub name: String,
    /// MIME type reported by the source
    pub mime_type: String,
    /// Whether the source allows a plain download of the bytes
    pub can_download: bool,
    /// Target path for the produced artifact
    pub destination: PathBuf,
}

impl Item {
    /// Task key of this item
    pub fn key(&self) -> TaskKey {
        TaskKey::for_item(&self.id, &self.name)
    }
}

/// A unit of work handed to a strategy executor
///
/// Tasks live only for the duration of a run; their terminal outcome is what
/// gets persisted.
#[derive(Clone, Debug)]
pub struct Task {
    /// Stable key
    pub key: TaskKey,
    /// Strategy selected by the classifier
    pub strategy: StrategyKind,
    /// Target path for the produced artifact
    pub destination: PathBuf,
    /// The discovered item (id, name, MIME type) for strategy-specific use
    pub item: Item,
    /// Attempts made so far in this run
    pub attempt: u32,
    /// Current state
    pub state: TaskState,
}

impl Task {
    /// Create a pending task for an item
    pub fn new(item: Item, strategy: StrategyKind) -> Self {
        Self {
            key: item.key(),
            strategy,
            destination: item.destination.clone(),
            item,
            attempt: 0,
            state: TaskState::Pending,
        }
    }

    /// Bucket this task belongs to
    pub fn bucket(&self) -> Bucket {
        self.strategy.bucket()
    }

    /// Move to `next`, returning false (and leaving the state untouched) if illegal
    pub fn transition(&mut self, next: TaskState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::error!(
                task_key = %self.key,
                from = ?self.state,
                to = ?next,
                "Illegal task state transition"
            );
            return false;
        }
        self.state = next;
        true
    }
}

/// Terminal outcome of a task in a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Task succeeded
    Succeeded,
    /// Task failed terminally
    Failed,
}

/// Event emitted during a run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Classification finished and dispatch is about to begin
    RunStarted {
        /// Scope of the run
        scope_id: String,
        /// Number of tasks to dispatch
        pending: usize,
        /// Items skipped because they were already completed
        skipped: usize,
    },

    /// A worker picked up a task
    TaskStarted {
        /// Task key
        key: TaskKey,
        /// Bucket of the worker
        bucket: Bucket,
    },

    /// An attempt failed with a transient error and will be retried
    TaskRetrying {
        /// Task key
        key: TaskKey,
        /// Attempt that just failed (1-based)
        attempt: u32,
        /// Backoff before the next attempt, in milliseconds
        delay_ms: u64,
        /// Error message of the failed attempt
        error: String,
    },

    /// A task reached a terminal state
    TaskFinished {
        /// Task key
        key: TaskKey,
        /// Bucket of the worker
        bucket: Bucket,
        /// Terminal outcome
        outcome: Outcome,
        /// Last error, for failures
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Checkpoint record was persisted
    CheckpointSaved {
        /// Scope of the record
        scope_id: String,
        /// Completed keys in the record
        completed: usize,
        /// Failed keys in the record
        failed: usize,
    },

    /// Checkpoint problem that did not stop the run
    CheckpointWarning {
        /// Scope of the record
        scope_id: String,
        /// What went wrong
        message: String,
    },

    /// Cancellation was observed; the run is draining
    Cancelled {
        /// Scope of the run
        scope_id: String,
    },

    /// Run finished (drained and flushed)
    RunFinished {
        /// Scope of the run
        scope_id: String,
        /// Tasks that succeeded in this run
        succeeded: usize,
        /// Tasks that failed in this run
        failed: usize,
        /// Whether the run ended because of cancellation
        cancelled: bool,
    },
}
