//! Bucket worker loop

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::ledger::Ledger;
use crate::config::RetryConfig;
use crate::error::StrategyError;
use crate::progress::ProgressAggregator;
use crate::retry::{RetryController, RetryNotice, Verdict};
use crate::strategy::{StrategyExecutor, StrategySet};
use crate::types::{Bucket, Event, Outcome, Task};

/// Pending tasks of one bucket, consumed in discovery order
pub(crate) type TaskQueue = Arc<Mutex<VecDeque<Task>>>;

/// State shared by every worker of a run
pub(crate) struct RunContext {
    pub(crate) strategies: StrategySet,
    pub(crate) cancel: CancellationToken,
    pub(crate) progress: Arc<ProgressAggregator>,
    pub(crate) ledger: Ledger,
    /// Tasks left without a terminal outcome because of cancellation
    pub(crate) abandoned: AtomicUsize,
}

/// Pull tasks from `queue` until it is empty or the run is cancelled
///
/// Every task that ends here ends with a terminal outcome recorded in the
/// ledger, except tasks abandoned during a cancelled backoff.
pub(crate) async fn run_worker(
    ctx: Arc<RunContext>,
    bucket: Bucket,
    policy: RetryConfig,
    queue: TaskQueue,
    worker_id: usize,
) {
    tracing::debug!(bucket = %bucket, worker_id, "Worker started");

    loop {
        if ctx.cancel.is_cancelled() {
            tracing::debug!(bucket = %bucket, worker_id, "Cancellation observed, worker stopping");
            break;
        }

        let next = {
            let mut queue_guard = queue.lock().await;
            queue_guard.pop_front()
        };
        let Some(mut task) = next else {
            break;
        };

        let Some(executor) = ctx.strategies.get(task.strategy) else {
            // Preflight rejects runs with missing executors, so this is a bug
            tracing::error!(task_key = %task.key, strategy = %task.strategy, "No executor for task");
            finish(
                &ctx,
                &task,
                bucket,
                Outcome::Failed,
                Some(format!("no executor for strategy {}", task.strategy)),
            )
            .await;
            continue;
        };

        let verdict = RetryController::new(&policy, &ctx.cancel)
            .run(
                &mut task,
                |current| {
                    attempt_once(
                        executor.clone(),
                        current.clone(),
                        bucket,
                        ctx.cancel.clone(),
                        ctx.progress.clone(),
                    )
                },
                |notice: RetryNotice<'_, StrategyError>| {
                    ctx.progress.emit(Event::TaskRetrying {
                        key: notice.key.clone(),
                        attempt: notice.attempt,
                        delay_ms: notice.delay.as_millis() as u64,
                        error: notice.error.to_string(),
                    });
                },
            )
            .await;

        match verdict {
            Verdict::Succeeded { .. } => {
                finish(&ctx, &task, bucket, Outcome::Succeeded, None).await;
            }
            Verdict::FailedTerminal { error, .. } => {
                finish(&ctx, &task, bucket, Outcome::Failed, Some(error.to_string())).await;
            }
            Verdict::Abandoned { attempts, .. } => {
                tracing::info!(task_key = %task.key, attempts, "Task left pending for the next run");
                ctx.abandoned.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    tracing::debug!(bucket = %bucket, worker_id, "Worker finished");
}

/// Run one attempt in its own task so a panicking executor only fails this task
async fn attempt_once(
    executor: Arc<dyn StrategyExecutor>,
    task: Task,
    bucket: Bucket,
    cancel: CancellationToken,
    progress: Arc<ProgressAggregator>,
) -> Result<(), StrategyError> {
    let key = task.key.clone();
    progress.attempt_started(&key, bucket, task.attempt == 1);

    let handle = tokio::spawn(async move { executor.execute(&task, &cancel).await });
    let result = match handle.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            tracing::error!(task_key = %key, "Strategy executor panicked");
            Err(StrategyError::permanent("strategy executor panicked"))
        }
        Err(e) => Err(StrategyError::permanent(format!("attempt aborted: {e}"))),
    };

    progress.attempt_finished(bucket);
    result
}

async fn finish(
    ctx: &RunContext,
    task: &Task,
    bucket: Bucket,
    outcome: Outcome,
    error: Option<String>,
) {
    ctx.ledger.record(&task.key, outcome).await;
    ctx.progress.task_finished(&task.key, bucket, outcome, error);
}
