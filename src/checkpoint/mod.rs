//! Crash-consistent checkpoint persistence
//!
//! One JSON record per scope records which task keys completed and which failed.
//! Every save writes the full record to a `.tmp` sibling, fsyncs it and renames
//! it over the final path, so a reader sees either the previous record or the
//! new one and never a partial write.
//!
//! Saves for the same scope are serialized through a per-scope lock; saves for
//! different scopes proceed independently. A record that fails to parse or
//! validate is reported as [`CheckpointLoad::Corrupt`] and treated as absent.
//!
//! ## Record format
//!
//! ```json
//! {
//!   "schemaVersion": 1,
//!   "scopeId": "folder-123",
//!   "destinationRoot": "/data/downloads",
//!   "completedKeys": ["a_report.pdf"],
//!   "failedKeys": ["b_talk.mp4"],
//!   "timestamp": "2026-10-17T09:30:00Z"
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{CheckpointError, Result};
use crate::types::TaskKey;

/// Schema version written by this crate
pub const SCHEMA_VERSION: u32 = 1;

/// Longest readable scope prefix kept in a checkpoint file name
const MAX_SCOPE_NAME_LEN: usize = 48;

/// Durable record of a scope's progress
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRecord {
    /// Format version of the record
    pub schema_version: u32,
    /// Scope this record belongs to
    pub scope_id: String,
    /// Destination root of the run that wrote the record
    pub destination_root: String,
    /// Keys that completed successfully
    pub completed_keys: BTreeSet<TaskKey>,
    /// Keys that failed terminally and will be retried on resume
    pub failed_keys: BTreeSet<TaskKey>,
    /// When the record was written
    pub timestamp: DateTime<Utc>,
}

impl CheckpointRecord {
    /// Whether the key is recorded as completed
    pub fn is_completed(&self, key: &TaskKey) -> bool {
        self.completed_keys.contains(key)
    }
}

/// Result of reading a scope's record
#[derive(Debug)]
pub enum CheckpointLoad {
    /// No record exists for the scope
    Absent,
    /// A valid record was read
    Found(CheckpointRecord),
    /// A record exists but is unusable; the run must start fresh
    Corrupt {
        /// Path of the rejected record
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },
}

impl CheckpointLoad {
    /// The record, if one was read successfully
    pub fn into_record(self) -> Option<CheckpointRecord> {
        match self {
            CheckpointLoad::Found(record) => Some(record),
            CheckpointLoad::Absent | CheckpointLoad::Corrupt { .. } => None,
        }
    }
}

/// Summary of a scope's record for display
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckpointInfo {
    /// Whether a valid record exists
    pub exists: bool,
    /// When it was written
    pub timestamp: Option<DateTime<Utc>>,
    /// Number of completed keys
    pub completed: usize,
    /// Number of failed keys
    pub failed: usize,
    /// Destination root recorded by the last run
    pub destination_root: Option<String>,
}

/// Owner of all checkpoint files in one directory
///
/// This is the only component that touches checkpoint files. Share it across
/// workers behind an `Arc`.
pub struct CheckpointStore {
    dir: PathBuf,
    /// Per-scope write locks, created on first use
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CheckpointStore {
    /// Create a store rooted at `dir`; the directory is created on first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Directory holding the checkpoint files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final path of a scope's record
    ///
    /// Derived deterministically from the scope id: a sanitized readable prefix
    /// plus a hash of the full id, so distinct ids never collide after sanitizing.
    pub fn record_path(&self, scope_id: &str) -> PathBuf {
        self.dir.join(format!(
            "checkpoint_{}_{}.json",
            sanitize_scope(scope_id),
            scope_digest(scope_id)
        ))
    }

    /// Persist the full progress of a scope atomically
    ///
    /// A key present in both sets is kept as completed only, so the written
    /// record always has disjoint sets.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::WriteFailed`] if the directory, temp file,
    /// fsync or rename fails. The previous record is left intact in that case.
    pub async fn save(
        &self,
        scope_id: &str,
        completed: &BTreeSet<TaskKey>,
        failed: &BTreeSet<TaskKey>,
        destination_root: &Path,
    ) -> Result<CheckpointRecord> {
        let record = CheckpointRecord {
            schema_version: SCHEMA_VERSION,
            scope_id: scope_id.to_string(),
            destination_root: destination_root.to_string_lossy().into_owned(),
            completed_keys: completed.clone(),
            failed_keys: failed.difference(completed).cloned().collect(),
            timestamp: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&record)?;
        let path = self.record_path(scope_id);

        let lock = self.scope_lock(scope_id).await;
        let _guard = lock.lock().await;

        let write_failed = |source| CheckpointError::WriteFailed {
            path: path.clone(),
            source,
        };
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(write_failed)?;
        write_atomic(&path, &bytes).await.map_err(write_failed)?;

        tracing::debug!(
            scope_id,
            completed = record.completed_keys.len(),
            failed = record.failed_keys.len(),
            path = %path.display(),
            "Checkpoint saved"
        );
        Ok(record)
    }

    /// Read and validate a scope's record
    ///
    /// Never fails: unreadable or invalid records come back as
    /// [`CheckpointLoad::Corrupt`] so the caller can warn and start fresh.
    pub async fn load_checked(&self, scope_id: &str) -> CheckpointLoad {
        let path = self.record_path(scope_id);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CheckpointLoad::Absent,
            Err(e) => {
                return corrupt(path, format!("unreadable: {e}"));
            }
        };

        let mut record: CheckpointRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => return corrupt(path, format!("invalid record: {e}")),
        };

        if record.schema_version == 0 || record.schema_version > SCHEMA_VERSION {
            return corrupt(
                path,
                format!("unsupported schema version {}", record.schema_version),
            );
        }
        if record.scope_id != scope_id {
            return corrupt(
                path,
                format!(
                    "record belongs to scope '{}', expected '{scope_id}'",
                    record.scope_id
                ),
            );
        }

        let overlap = record
            .failed_keys
            .intersection(&record.completed_keys)
            .count();
        if overlap > 0 {
            tracing::warn!(
                scope_id,
                overlap,
                "Checkpoint lists keys as both completed and failed, keeping them as completed"
            );
            let completed = record.completed_keys.clone();
            record.failed_keys.retain(|key| !completed.contains(key));
        }

        tracing::info!(
            scope_id,
            completed = record.completed_keys.len(),
            failed = record.failed_keys.len(),
            "Checkpoint loaded"
        );
        CheckpointLoad::Found(record)
    }

    /// Read a scope's record, treating a corrupt record as absent
    pub async fn load(&self, scope_id: &str) -> Option<CheckpointRecord> {
        self.load_checked(scope_id).await.into_record()
    }

    /// Remove a scope's record; a missing record is not an error
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::RemoveFailed`] if the file exists but cannot be removed.
    pub async fn clear(&self, scope_id: &str) -> Result<()> {
        let path = self.record_path(scope_id);

        let lock = self.scope_lock(scope_id).await;
        let _guard = lock.lock().await;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(scope_id, "Checkpoint removed");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(scope_id, "No checkpoint to remove");
            }
            Err(source) => {
                return Err(CheckpointError::RemoveFailed { path, source }.into());
            }
        }

        // Leftover from an interrupted save
        let _ = tokio::fs::remove_file(tmp_path(&path)).await;
        Ok(())
    }

    /// Summary of a scope's record
    pub async fn info(&self, scope_id: &str) -> CheckpointInfo {
        match self.load(scope_id).await {
            Some(record) => CheckpointInfo {
                exists: true,
                timestamp: Some(record.timestamp),
                completed: record.completed_keys.len(),
                failed: record.failed_keys.len(),
                destination_root: Some(record.destination_root),
            },
            None => CheckpointInfo {
                exists: false,
                timestamp: None,
                completed: 0,
                failed: 0,
                destination_root: None,
            },
        }
    }

    async fn scope_lock(&self, scope_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(scope_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn corrupt(path: PathBuf, reason: String) -> CheckpointLoad {
    tracing::warn!(
        path = %path.display(),
        reason = %reason,
        "Ignoring corrupt checkpoint, starting fresh"
    );
    CheckpointLoad::Corrupt { path, reason }
}

/// Keep `[A-Za-z0-9_-]`, replace everything else, and bound the length
fn sanitize_scope(scope_id: &str) -> String {
    let sanitized: String = scope_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_SCOPE_NAME_LEN)
        .collect();
    if sanitized.is_empty() {
        "scope".to_string()
    } else {
        sanitized
    }
}

fn scope_digest(scope_id: &str) -> String {
    let digest = Sha256::digest(scope_id.as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write to the `.tmp` sibling, fsync, then rename over `path`
async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let temp_path = tmp_path(path);

    let mut file = tokio::fs::File::create(&temp_path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }

    // Rename durability needs the parent directory synced on unix
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            if let Ok(dir) = tokio::fs::File::open(parent).await {
                let _ = dir.sync_all().await;
            }
        }
    }

    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
