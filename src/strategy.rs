//! Strategy executor seam
//!
//! The mechanics of each strategy (calling a remote API, driving a browser,
//! invoking a transcoder) live outside this crate. The scheduler only sees the
//! [`StrategyExecutor`] trait, with one implementation registered per
//! [`StrategyKind`] in a [`StrategySet`].
//!
//! ```no_run
//! use async_trait::async_trait;
//! use bulk_dl::error::StrategyError;
//! use bulk_dl::strategy::{StrategyExecutor, StrategySet};
//! use bulk_dl::types::{StrategyKind, Task};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! struct HttpFetch;
//!
//! #[async_trait]
//! impl StrategyExecutor for HttpFetch {
//!     async fn execute(&self, task: &Task, _cancel: &CancellationToken) -> Result<(), StrategyError> {
//!         println!("fetching {} into {}", task.key, task.destination.display());
//!         Ok(())
//!     }
//!
//!     fn name(&self) -> &'static str {
//!         "http-fetch"
//!     }
//! }
//!
//! let strategies = StrategySet::new().with(StrategyKind::DirectFetch, Arc::new(HttpFetch));
//! assert!(strategies.get(StrategyKind::DirectFetch).is_some());
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{EnvironmentError, StrategyError};
use crate::types::{StrategyKind, Task};

/// Performs the actual retrieval or conversion for one task
///
/// Implementations must be safe to call concurrently up to the bucket's
/// configured limit, must not retry on their own, and should check `cancel`
/// at reasonable intervals. Per-task timeouts belong here and are reported as
/// [`StrategyError::timeout`].
#[async_trait]
pub trait StrategyExecutor: Send + Sync {
    /// Run one attempt of the task
    ///
    /// # Errors
    ///
    /// Returns a classified [`StrategyError`]; transient kinds are retried by
    /// the scheduler, permanent kinds end the task immediately.
    async fn execute(&self, task: &Task, cancel: &CancellationToken) -> Result<(), StrategyError>;

    /// Check that everything this strategy needs is available
    ///
    /// Called once per run before any task is dispatched, only for strategies
    /// that have pending tasks.
    ///
    /// # Errors
    ///
    /// Returns an [`EnvironmentError`] that aborts the run.
    async fn preflight(&self) -> Result<(), EnvironmentError> {
        Ok(())
    }

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Registry of executors, one per strategy
#[derive(Clone, Default)]
pub struct StrategySet {
    executors: HashMap<StrategyKind, Arc<dyn StrategyExecutor>>,
}

impl StrategySet {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `executor` for `kind`, replacing any previous one
    pub fn with(mut self, kind: StrategyKind, executor: Arc<dyn StrategyExecutor>) -> Self {
        self.insert(kind, executor);
        self
    }

    /// Register `executor` for `kind`, replacing any previous one
    pub fn insert(&mut self, kind: StrategyKind, executor: Arc<dyn StrategyExecutor>) {
        if let Some(previous) = self.executors.insert(kind, executor) {
            tracing::debug!(strategy = %kind, previous = previous.name(), "Replaced executor");
        }
    }

    /// Executor registered for `kind`
    pub fn get(&self, kind: StrategyKind) -> Option<Arc<dyn StrategyExecutor>> {
        self.executors.get(&kind).cloned()
    }

    /// Run the preflight of every strategy in `kinds`
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::MissingExecutor`] if a strategy has no
    /// executor, or the first preflight failure.
    pub async fn preflight(&self, kinds: &[StrategyKind]) -> Result<(), EnvironmentError> {
        for kind in kinds {
            let executor = self
                .get(*kind)
                .ok_or(EnvironmentError::MissingExecutor(*kind))?;
            executor.preflight().await?;
            tracing::debug!(strategy = %kind, executor = executor.name(), "Preflight passed");
        }
        Ok(())
    }
}

/// Locate a required external binary in PATH
///
/// Strategies that shell out (a transcoder, a browser driver) call this from
/// their [`StrategyExecutor::preflight`].
///
/// # Errors
///
/// Returns [`EnvironmentError::ToolNotFound`] carrying `hint` for the operator.
pub fn require_tool(tool: &str, hint: &str) -> Result<PathBuf, EnvironmentError> {
    which::which(tool).map_err(|_| EnvironmentError::ToolNotFound {
        tool: tool.to_string(),
        hint: hint.to_string(),
    })
}
