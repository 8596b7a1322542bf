//! Error types for bulk-dl
//!
//! This module provides the error taxonomy of the orchestration core:
//! - Crate-wide [`Error`] for operations that can stop a run
//! - [`StrategyError`] returned by strategy executors, classified as transient or permanent
//! - [`CheckpointError`] for persistence failures of the checkpoint record
//! - [`EnvironmentError`] for conditions detected before any task is dispatched

use std::path::PathBuf;
use thiserror::Error;

use crate::types::StrategyKind;

/// Result type alias for bulk-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bulk-dl
///
/// Task-level failures never surface as this type from a run; they are captured
/// as the task's terminal state. Only configuration, environment and checkpoint
/// flush failures propagate to the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "direct_fetch.concurrency")
        key: Option<String>,
    },

    /// Checkpoint persistence failed
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Environment is unfit for the run (missing tool, unwritable destination)
    #[error("environment error: {0}")]
    Environment(#[from] EnvironmentError),

    /// A strategy executor reported a failure
    #[error("strategy error: {0}")]
    Strategy(#[from] StrategyError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error for a specific key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Checkpoint persistence errors
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Writing the record (temp file, fsync or rename) failed
    #[error("failed to write checkpoint {path}: {source}")]
    WriteFailed {
        /// Final path of the record being written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Removing the record failed
    #[error("failed to remove checkpoint {path}: {source}")]
    RemoveFailed {
        /// Path of the record being removed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Conditions detected before dispatch that abort the run
#[derive(Debug, Error)]
pub enum EnvironmentError {
    /// A required external tool could not be located
    #[error("required tool '{tool}' not found: {hint}")]
    ToolNotFound {
        /// Name of the binary that was searched for
        tool: String,
        /// Installation hint for the operator
        hint: String,
    },

    /// The destination root cannot be created or written to
    #[error("destination {path} is not writable: {reason}")]
    DestinationNotWritable {
        /// The destination root of the run
        path: PathBuf,
        /// The reason the probe failed
        reason: String,
    },

    /// No executor is registered for a strategy that has pending tasks
    #[error("no executor registered for strategy {0}")]
    MissingExecutor(StrategyKind),

    /// An executor's own preflight check failed
    #[error("strategy {kind} is unavailable: {reason}")]
    StrategyUnavailable {
        /// Strategy whose preflight failed
        kind: StrategyKind,
        /// Reason reported by the executor
        reason: String,
    },
}

/// Classification of a strategy failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StrategyErrorKind {
    /// Network or per-task timeout
    Timeout,
    /// Remote side asked us to slow down
    RateLimited,
    /// Temporary resource unavailability or lock contention
    Unavailable,
    /// Access to the item was denied
    AccessDenied,
    /// The item no longer exists
    NotFound,
    /// Content type cannot be handled by this strategy
    Unsupported,
    /// Unclassified transient failure
    Transient,
    /// Unclassified permanent failure
    Permanent,
}

/// Failure reported by a strategy executor for a single attempt
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct StrategyError {
    /// Classification driving the retry decision
    pub kind: StrategyErrorKind,
    /// Human-readable message for reporting
    pub message: String,
}

impl StrategyError {
    /// Create an error of the given kind
    pub fn new(kind: StrategyErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Unclassified transient failure
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(StrategyErrorKind::Transient, message)
    }

    /// Unclassified permanent failure
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(StrategyErrorKind::Permanent, message)
    }

    /// Timeout of the executor's own I/O
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StrategyErrorKind::Timeout, message)
    }

    /// Rate-limit response from the remote side
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(StrategyErrorKind::RateLimited, message)
    }

    /// Access denied
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(StrategyErrorKind::AccessDenied, message)
    }

    /// Item not found
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StrategyErrorKind::NotFound, message)
    }

    /// Content not supported by the strategy
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(StrategyErrorKind::Unsupported, message)
    }
}

impl From<std::io::Error> for StrategyError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let kind = match e.kind() {
            ErrorKind::TimedOut => StrategyErrorKind::Timeout,
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock => StrategyErrorKind::Unavailable,
            ErrorKind::PermissionDenied => StrategyErrorKind::AccessDenied,
            ErrorKind::NotFound => StrategyErrorKind::NotFound,
            _ => StrategyErrorKind::Permanent,
        };
        Self::new(kind, e.to_string())
    }
}
