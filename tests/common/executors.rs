//! Mock strategy executors with instrumentation

use async_trait::async_trait;
use bulk_dl::{StrategyError, StrategyExecutor, Task, TaskKey};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Shared call bookkeeping: attempts per key and concurrency high-water mark
#[derive(Default)]
pub struct Calls {
    attempts: Mutex<HashMap<TaskKey, u32>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Calls {
    fn enter(&self, key: &TaskKey) -> u32 {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(key.clone()).or_default();
            *n += 1;
            *n
        };
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        attempt
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// Attempts made for `key`
    pub fn attempts(&self, key: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(&TaskKey::from(key))
            .copied()
            .unwrap_or(0)
    }

    /// Keys the executor was called with at least once
    pub fn called_keys(&self) -> HashSet<TaskKey> {
        self.attempts.lock().unwrap().keys().cloned().collect()
    }

    /// Calls running right now
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous calls seen
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Succeeds after a delay, except for item ids listed as failing
pub struct FailingIds {
    pub calls: Calls,
    delay: Duration,
    failing: HashSet<String>,
}

impl FailingIds {
    pub fn new(delay: Duration, failing: &[&str]) -> Self {
        Self {
            calls: Calls::default(),
            delay,
            failing: failing.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn succeeding(delay: Duration) -> Self {
        Self::new(delay, &[])
    }
}

#[async_trait]
impl StrategyExecutor for FailingIds {
    async fn execute(&self, task: &Task, _cancel: &CancellationToken) -> Result<(), StrategyError> {
        self.calls.enter(&task.key);
        tokio::time::sleep(self.delay).await;
        self.calls.leave();

        if self.failing.contains(&task.item.id) {
            Err(StrategyError::not_found(format!("{} is gone", task.item.id)))
        } else {
            Ok(())
        }
    }

    fn name(&self) -> &'static str {
        "failing-ids"
    }
}

/// Blocks every call until the gate opens, then succeeds
pub struct Gated {
    pub calls: Calls,
    gate: CancellationToken,
}

impl Gated {
    pub fn new() -> Self {
        Self {
            calls: Calls::default(),
            gate: CancellationToken::new(),
        }
    }

    /// Let every blocked and future call through
    pub fn open(&self) {
        self.gate.cancel();
    }

    /// Wait until `n` calls are blocked at the gate
    pub async fn wait_for_active(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls.active() < n {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("executor calls never became active");
    }
}

#[async_trait]
impl StrategyExecutor for Gated {
    async fn execute(&self, task: &Task, _cancel: &CancellationToken) -> Result<(), StrategyError> {
        self.calls.enter(&task.key);
        self.gate.cancelled().await;
        self.calls.leave();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

/// Succeeds, and cancels the run once `after` calls have finished
pub struct CancelAfter {
    pub calls: Calls,
    finished: AtomicUsize,
    after: usize,
    run: CancellationToken,
}

impl CancelAfter {
    pub fn new(after: usize, run: CancellationToken) -> Self {
        Self {
            calls: Calls::default(),
            finished: AtomicUsize::new(0),
            after,
            run,
        }
    }
}

#[async_trait]
impl StrategyExecutor for CancelAfter {
    async fn execute(&self, task: &Task, _cancel: &CancellationToken) -> Result<(), StrategyError> {
        self.calls.enter(&task.key);
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.calls.leave();

        if self.finished.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
            self.run.cancel();
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "cancel-after"
    }
}

/// Sleeps for a per-key duration derived from the key, then succeeds
pub struct Jittery {
    pub calls: Calls,
    max_delay_ms: u64,
}

impl Jittery {
    pub fn new(max_delay_ms: u64) -> Self {
        Self {
            calls: Calls::default(),
            max_delay_ms: max_delay_ms.max(1),
        }
    }
}

#[async_trait]
impl StrategyExecutor for Jittery {
    async fn execute(&self, task: &Task, _cancel: &CancellationToken) -> Result<(), StrategyError> {
        self.calls.enter(&task.key);
        let spread = task
            .key
            .as_str()
            .bytes()
            .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
        tokio::time::sleep(Duration::from_millis(spread % self.max_delay_ms)).await;
        self.calls.leave();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "jittery"
    }
}
