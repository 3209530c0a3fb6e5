//! Batch work executor: partitions a work list into fixed-size batches and
//! dispatches them across a bounded worker pool with per-batch retry.
//!
//! The executor never merges results; handlers append into caller-owned
//! concurrency-safe state (the typed buffer). Batch completion order is
//! deliberately unspecified; callers sort downstream.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::recorder::{ExceptionRecorder, Level};
use crate::rpc::RpcError;
use crate::types::BlockRange;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    Fixed {
        delay_ms: u64,
    },
    Exponential {
        initial_delay_ms: u64,
        multiplier: f64,
        max_delay_ms: u64,
    },
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-indexed; attempt 0 never waits).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match self {
            BackoffPolicy::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            BackoffPolicy::Exponential {
                initial_delay_ms,
                multiplier,
                max_delay_ms,
            } => {
                let delay_ms =
                    *initial_delay_ms as f64 * multiplier.powi(attempt.saturating_sub(1) as i32);
                std::cmp::min(
                    Duration::from_millis(delay_ms as u64),
                    Duration::from_millis(*max_delay_ms),
                )
            }
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            initial_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Stop accepting new batches; in-flight batches run to completion.
    Graceful,
    /// Stop accepting new batches and cancel in-flight ones.
    Abort,
}

/// Failure raised by a batch handler, pre-classified by the handler.
#[derive(Debug, Error)]
pub enum WorkError {
    #[error("retriable batch failure: {0}")]
    Retriable(String),

    #[error("fatal batch failure: {0}")]
    Fatal(String),
}

impl From<RpcError> for WorkError {
    fn from(e: RpcError) -> Self {
        if e.is_retriable() {
            WorkError::Retriable(e.to_string())
        } else {
            WorkError::Fatal(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("batch failed after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("fatal batch failure: {0}")]
    Fatal(String),

    #[error("batch task panicked: {0}")]
    Panicked(String),

    #[error("executor shut down before all batches completed")]
    ShutDown,
}

/// Split a work list into batches of at most `batch_size`, preserving order.
/// The last batch may be smaller.
pub fn partition<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(batch_size));
    let mut current = Vec::with_capacity(batch_size);
    for item in items {
        current.push(item);
        if current.len() == batch_size {
            batches.push(std::mem::replace(&mut current, Vec::with_capacity(batch_size)));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

pub struct BatchWorkExecutor {
    batch_size: usize,
    max_workers: usize,
    retry: RetryPolicy,
    shutdown_mode: ShutdownMode,
    shutting_down: AtomicBool,
    recorder: Arc<dyn ExceptionRecorder>,
}

impl BatchWorkExecutor {
    pub fn new(
        batch_size: usize,
        max_workers: usize,
        retry: RetryPolicy,
        shutdown_mode: ShutdownMode,
        recorder: Arc<dyn ExceptionRecorder>,
    ) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_workers: max_workers.max(1),
            retry,
            shutdown_mode,
            shutting_down: AtomicBool::new(false),
            recorder,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Request shutdown. New batches stop being dispatched; in-flight batches
    /// finish (`Graceful`) or are cancelled (`Abort`) by the running
    /// `execute` call, which records every dropped contribution.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Run `handler` over `items` in batches, blocking until every batch has
    /// completed, one has failed fatally, or shutdown was requested.
    ///
    /// A batch whose handler returns `WorkError::Retriable` is retried up to
    /// `max_attempts` with the configured backoff; `WorkError::Fatal` aborts
    /// immediately without consuming retry budget. Either terminal failure
    /// aborts the whole call and is recorded against `range`.
    pub async fn execute<T, F, Fut>(
        &self,
        range: BlockRange,
        dataclass: &str,
        items: Vec<T>,
        handler: F,
    ) -> Result<(), ExecutorError>
    where
        T: Clone + Send + 'static,
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks: JoinSet<Result<(), ExecutorError>> = JoinSet::new();

        let batches = partition(items, self.batch_size);
        let total_batches = batches.len();
        let mut dispatched = 0usize;

        for batch in batches {
            if self.is_shutting_down() {
                break;
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            dispatched += 1;

            let handler = handler.clone();
            let retry = self.retry.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let mut attempt = 0u32;
                loop {
                    attempt += 1;
                    match handler(batch.clone()).await {
                        Ok(()) => return Ok(()),
                        Err(WorkError::Retriable(message)) => {
                            if attempt >= retry.max_attempts {
                                return Err(ExecutorError::RetriesExhausted { attempts: attempt, message });
                            }
                            let delay = retry.backoff.delay_for_attempt(attempt);
                            tracing::warn!(
                                attempt,
                                max_attempts = retry.max_attempts,
                                delay_ms = delay.as_millis() as u64,
                                "retriable batch failure: {message}"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        Err(WorkError::Fatal(message)) => {
                            return Err(ExecutorError::Fatal(message));
                        }
                    }
                }
            });
        }

        let undispatched = total_batches - dispatched;
        let shut_down = undispatched > 0;
        if shut_down {
            self.recorder.record(
                Some(range.start_block),
                dataclass,
                Level::Warn,
                "executor_shutdown",
                &format!("{undispatched} batch(es) not dispatched before shutdown"),
                json!({"start_block": range.start_block, "end_block": range.end_block}),
            );
            if self.shutdown_mode == ShutdownMode::Abort {
                tasks.abort_all();
            }
        }

        let mut failure: Option<ExecutorError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.recorder.record(
                        Some(range.start_block),
                        dataclass,
                        Level::Error,
                        "batch_failed",
                        &e.to_string(),
                        json!({"start_block": range.start_block, "end_block": range.end_block}),
                    );
                    if failure.is_none() {
                        failure = Some(e);
                        // One fatal batch aborts the whole call.
                        tasks.abort_all();
                    }
                }
                Err(join_err) if join_err.is_cancelled() => {
                    self.recorder.record(
                        Some(range.start_block),
                        dataclass,
                        Level::Warn,
                        "batch_abandoned",
                        "in-flight batch cancelled before completion",
                        json!({"start_block": range.start_block, "end_block": range.end_block}),
                    );
                }
                Err(join_err) => {
                    if failure.is_none() {
                        failure = Some(ExecutorError::Panicked(join_err.to_string()));
                    }
                }
            }
        }

        if let Some(failure) = failure {
            return Err(failure);
        }
        if shut_down {
            return Err(ExecutorError::ShutDown);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::MemoryRecorder;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn executor(batch_size: usize, max_workers: usize, max_attempts: u32) -> BatchWorkExecutor {
        BatchWorkExecutor::new(
            batch_size,
            max_workers,
            RetryPolicy {
                max_attempts,
                backoff: BackoffPolicy::Fixed { delay_ms: 1 },
            },
            ShutdownMode::Graceful,
            Arc::new(MemoryRecorder::new()),
        )
    }

    fn range() -> BlockRange {
        BlockRange::new(1, 10).unwrap()
    }

    #[test]
    fn partition_preserves_multiset() {
        let items: Vec<u32> = (0..57).collect();
        let batches = partition(items.clone(), 10);
        assert_eq!(batches.len(), 6);
        assert_eq!(batches.last().unwrap().len(), 7);
        let flattened: Vec<u32> = batches.into_iter().flatten().collect();
        assert_eq!(flattened, items);
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let backoff = BackoffPolicy::Exponential {
            initial_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 350,
        };
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn every_item_is_handled_exactly_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let exec = executor(7, 4, 1);
        let seen_handler = seen.clone();
        exec.execute(range(), "test", (0u32..100).collect(), move |batch| {
            let seen = seen_handler.clone();
            async move {
                seen.lock().unwrap().extend(batch);
                Ok(())
            }
        })
        .await
        .unwrap();
        let mut all = seen.lock().unwrap().clone();
        all.sort_unstable();
        assert_eq!(all, (0u32..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_max_workers() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let exec = executor(1, 3, 1);
        let (current_h, peak_h) = (current.clone(), peak.clone());
        exec.execute(range(), "test", (0u32..20).collect(), move |_batch| {
            let current = current_h.clone();
            let peak = peak_h.clone();
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn retriable_failures_are_retried_until_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let exec = executor(10, 2, 5);
        let attempts_h = attempts.clone();
        exec.execute(range(), "test", vec![1u32], move |_batch| {
            let attempts = attempts_h.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(WorkError::Retriable("node lagging".to_string()))
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_and_are_recorded() {
        let recorder = Arc::new(MemoryRecorder::new());
        let exec = BatchWorkExecutor::new(
            10,
            2,
            RetryPolicy {
                max_attempts: 3,
                backoff: BackoffPolicy::Fixed { delay_ms: 1 },
            },
            ShutdownMode::Graceful,
            recorder.clone(),
        );
        let result = exec
            .execute(range(), "blocks", vec![1u32], |_batch| async {
                Err(WorkError::Retriable("still lagging".to_string()))
            })
            .await;
        assert!(matches!(
            result,
            Err(ExecutorError::RetriesExhausted { attempts: 3, .. })
        ));
        let entries = recorder.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message_type, "batch_failed");
        assert_eq!(entries[0].block_number, Some(1));
    }

    #[tokio::test]
    async fn fatal_failure_skips_retry_budget() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let exec = executor(10, 2, 5);
        let attempts_h = attempts.clone();
        let result = exec
            .execute(range(), "test", vec![1u32], move |_batch| {
                let attempts = attempts_h.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(WorkError::Fatal("malformed call".to_string()))
                }
            })
            .await;
        assert!(matches!(result, Err(ExecutorError::Fatal(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_new_dispatch_and_records_it() {
        let recorder = Arc::new(MemoryRecorder::new());
        let exec = Arc::new(BatchWorkExecutor::new(
            1,
            1,
            RetryPolicy::default(),
            ShutdownMode::Graceful,
            recorder.clone(),
        ));
        exec.shutdown();
        let result = exec
            .execute(range(), "test", (0u32..5).collect(), |_batch| async { Ok(()) })
            .await;
        assert!(matches!(result, Err(ExecutorError::ShutDown)));
        let entries = recorder.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message_type, "executor_shutdown");
    }
}
