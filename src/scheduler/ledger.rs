//! In-memory progress of one run, persisted through the checkpoint store

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::error::Result;
use crate::progress::ProgressAggregator;
use crate::types::{Event, Outcome, TaskKey};

#[derive(Default)]
struct LedgerState {
    completed: BTreeSet<TaskKey>,
    failed: BTreeSet<TaskKey>,
    /// Outcomes recorded since the last successful save
    unsaved: usize,
}

/// Completed/failed sets of a run
///
/// Recording an outcome and saving the snapshot happen under one lock, so a
/// save never drops an outcome recorded by a concurrent worker.
pub(crate) struct Ledger {
    scope_id: String,
    destination_root: PathBuf,
    store: Arc<CheckpointStore>,
    progress: Arc<ProgressAggregator>,
    interval: usize,
    state: Mutex<LedgerState>,
}

impl Ledger {
    /// Start from the previous record, if the run resumes one
    ///
    /// Failed keys of items that were not discovered again are dropped; they
    /// can never be retried.
    pub(crate) fn new(
        scope_id: String,
        destination_root: PathBuf,
        store: Arc<CheckpointStore>,
        progress: Arc<ProgressAggregator>,
        interval: usize,
        previous: Option<&CheckpointRecord>,
        discovered: &HashSet<TaskKey>,
    ) -> Self {
        let mut state = LedgerState::default();
        if let Some(record) = previous {
            state.completed = record.completed_keys.clone();
            state.failed = record
                .failed_keys
                .iter()
                .filter(|key| discovered.contains(*key))
                .cloned()
                .collect();
            let stale = record.failed_keys.len() - state.failed.len();
            if stale > 0 {
                tracing::debug!(scope_id = %scope_id, stale, "Dropping failed keys no longer discovered");
            }
        }

        Self {
            scope_id,
            destination_root,
            store,
            progress,
            interval: interval.max(1),
            state: Mutex::new(state),
        }
    }

    /// Record a terminal outcome, saving once `interval` outcomes accumulated
    ///
    /// A failed save is reported as a warning and retried with the next outcome.
    pub(crate) async fn record(&self, key: &TaskKey, outcome: Outcome) {
        let mut state = self.state.lock().await;
        match outcome {
            Outcome::Succeeded => {
                state.failed.remove(key);
                state.completed.insert(key.clone());
            }
            Outcome::Failed => {
                if !state.completed.contains(key) {
                    state.failed.insert(key.clone());
                }
            }
        }
        state.unsaved += 1;

        if state.unsaved >= self.interval {
            if let Err(e) = self.persist(&mut state).await {
                tracing::warn!(scope_id = %self.scope_id, error = %e, "Checkpoint save failed, will retry");
                self.progress
                    .warn(&self.scope_id, format!("checkpoint save failed: {e}"));
            }
        }
    }

    /// Persist the current sets regardless of the interval
    ///
    /// # Errors
    ///
    /// Returns the store's error; the run reports it to the caller.
    pub(crate) async fn flush(&self) -> Result<CheckpointRecord> {
        let mut state = self.state.lock().await;
        self.persist(&mut state).await
    }

    async fn persist(&self, state: &mut LedgerState) -> Result<CheckpointRecord> {
        let record = self
            .store
            .save(
                &self.scope_id,
                &state.completed,
                &state.failed,
                &self.destination_root,
            )
            .await?;
        state.unsaved = 0;
        self.progress.emit(Event::CheckpointSaved {
            scope_id: self.scope_id.clone(),
            completed: record.completed_keys.len(),
            failed: record.failed_keys.len(),
        });
        Ok(record)
    }
}
