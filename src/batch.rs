//! Generic batch executor with bounded concurrency, retry with backoff, and
//! progress reporting. Every remote call in the system routes through here.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::ConnectorError;
use crate::progress::{ProgressEvent, ProgressSink};

/// Emit an item-level progress event at most once per this many items.
const ITEM_PROGRESS_INTERVAL: usize = 10;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Items per batch; batches run sequentially.
    pub batch_size: usize,
    /// Concurrent mapper invocations within a batch.
    pub concurrency_limit: usize,
    /// Retry attempts after the first failure.
    pub retry_count: usize,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Fixed pause before each attempt, for rate-limit shaping.
    pub request_delay: Duration,
    /// Per-attempt timeout; a timeout counts as a retryable failure.
    pub item_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            concurrency_limit: 5,
            retry_count: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
            request_delay: Duration::ZERO,
            item_timeout: Duration::from_secs(30),
        }
    }
}

impl BatchConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }
}

/// Ordered results with a cancellation marker. `results[i]` corresponds to
/// `items[i]` for every completed batch; batches skipped after cancellation
/// are absent entirely.
#[derive(Debug)]
pub struct BatchOutput<R> {
    pub results: Vec<Result<R, ConnectorError>>,
    pub cancelled: bool,
}

impl<R> BatchOutput<R> {
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    pub fn error_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_err()).count()
    }
}

pub struct BatchExecutor {
    config: BatchConfig,
}

impl BatchExecutor {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Run `mapper` over `items` in fixed-size batches.
    ///
    /// Within a batch up to `concurrency_limit` mappers run in parallel
    /// behind a counting semaphore; each invocation is wrapped in a
    /// per-attempt timeout and exponential backoff with full jitter. A
    /// failing item occupies its result slot as an error and never cancels
    /// its peers. Cancellation is honored at batch boundaries: in-flight
    /// items finish, no new batch starts.
    pub async fn run<T, R, F, Fut>(
        &self,
        task_name: &str,
        items: Vec<T>,
        mapper: F,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> BatchOutput<R>
    where
        T: Clone + Send + Sync,
        R: Send,
        F: Fn(T) -> Fut + Sync,
        Fut: Future<Output = Result<R, ConnectorError>> + Send,
    {
        if items.is_empty() {
            return BatchOutput {
                results: Vec::new(),
                cancelled: false,
            };
        }

        let total_items = items.len();
        let total_batches = total_items.div_ceil(self.config.batch_size);

        progress.emit(ProgressEvent::BatchStarted {
            task: task_name.to_string(),
            total_items,
            total_batches,
        });

        let semaphore = Semaphore::new(self.config.concurrency_limit);
        let processed_counter = AtomicUsize::new(0);

        let mut results: Vec<Result<R, ConnectorError>> = Vec::with_capacity(total_items);
        let mut cancelled = false;

        for (batch_index, batch) in items.chunks(self.config.batch_size).enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let batch_number = batch_index + 1;
            progress.emit(ProgressEvent::BatchProgress {
                task: task_name.to_string(),
                batch_number,
                total_batches,
                items_processed: results.len(),
                total_items,
            });

            let batch_futures = batch.iter().map(|item| {
                let item = item.clone();
                let semaphore = &semaphore;
                let mapper = &mapper;
                let processed_counter = &processed_counter;
                async move {
                    let _permit = match semaphore.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => return Err(ConnectorError::Cancelled),
                    };

                    let backoff = ExponentialBuilder::default()
                        .with_min_delay(self.config.retry_base_delay)
                        .with_max_delay(self.config.retry_max_delay)
                        .with_max_times(self.config.retry_count)
                        .with_jitter();

                    let attempt = || async {
                        if !self.config.request_delay.is_zero() {
                            tokio::time::sleep(self.config.request_delay).await;
                        }
                        match tokio::time::timeout(self.config.item_timeout, mapper(item.clone()))
                            .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(ConnectorError::Timeout),
                        }
                    };

                    let result = attempt
                        .retry(backoff)
                        .when(ConnectorError::is_retryable)
                        .notify(|err, delay| {
                            tracing::warn!(
                                task = task_name,
                                error = %err,
                                retry_in = ?delay,
                                "retrying after transient failure"
                            );
                        })
                        .await;

                    let done = processed_counter.fetch_add(1, Ordering::Relaxed) + 1;
                    if done % ITEM_PROGRESS_INTERVAL == 0 || done == total_items {
                        progress.emit(ProgressEvent::ItemProcessed {
                            task: task_name.to_string(),
                            items_processed: done,
                            total_items,
                        });
                    }

                    result
                }
            });

            // join_all preserves input order even under parallel execution.
            let batch_results = futures::future::join_all(batch_futures).await;
            let mut failures = 0;
            for result in &batch_results {
                if let Err(err) = result {
                    failures += 1;
                    tracing::error!(task = task_name, error = %err, "item processing failed");
                }
            }
            results.extend(batch_results);

            progress.emit(ProgressEvent::BatchCompleted {
                task: task_name.to_string(),
                batch_number,
                items_processed: results.len(),
                total_items,
                failures,
            });
        }

        BatchOutput { results, cancelled }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgress;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn quick_config() -> BatchConfig {
        BatchConfig {
            batch_size: 3,
            concurrency_limit: 2,
            retry_count: 2,
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(5),
            request_delay: Duration::ZERO,
            item_timeout: Duration::from_secs(1),
        }
    }

    struct CollectingSink {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl CollectingSink {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }
    }

    impl ProgressSink for CollectingSink {
        fn emit(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[tokio::test]
    async fn preserves_input_order_under_concurrency() {
        let executor = BatchExecutor::new(quick_config());
        let items: Vec<u64> = (0..10).collect();

        let output = executor
            .run(
                "order",
                items,
                |n| async move {
                    // Later items finish earlier; order must still hold.
                    tokio::time::sleep(Duration::from_millis(10 - n)).await;
                    Ok(n)
                },
                &NoopProgress,
                &CancellationToken::new(),
            )
            .await;

        assert!(!output.cancelled);
        let values: Vec<u64> = output.results.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, (0..10).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn failing_item_does_not_cancel_peers() {
        let executor = BatchExecutor::new(quick_config());
        let items: Vec<u64> = (0..5).collect();

        let output = executor
            .run(
                "isolation",
                items,
                |n| async move {
                    if n == 2 {
                        Err(ConnectorError::Permanent("not found".into()))
                    } else {
                        Ok(n * 10)
                    }
                },
                &NoopProgress,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(output.results.len(), 5);
        assert_eq!(output.error_count(), 1);
        assert!(output.results[2].is_err());
        assert_eq!(*output.results[4].as_ref().unwrap(), 40);
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let executor = BatchExecutor::new(quick_config());
        let attempts = AtomicUsize::new(0);

        let output = executor
            .run(
                "retry",
                vec![1u64],
                |n| {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 2 {
                            Err(ConnectorError::Transient("flaky".into()))
                        } else {
                            Ok(n)
                        }
                    }
                },
                &NoopProgress,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(output.success_count(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let executor = BatchExecutor::new(quick_config());
        let attempts = AtomicUsize::new(0);

        let output = executor
            .run(
                "no-retry",
                vec![1u64],
                |_| {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err(ConnectorError::Permanent("gone".into())) as Result<u64, _> }
                },
                &NoopProgress,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(output.error_count(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_input_short_circuits() {
        let executor = BatchExecutor::new(quick_config());
        let sink = CollectingSink::new();

        let output = executor
            .run(
                "empty",
                Vec::<u64>::new(),
                |n| async move { Ok(n) },
                &sink,
                &CancellationToken::new(),
            )
            .await;

        assert!(output.results.is_empty());
        assert!(!output.cancelled);
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_new_batches() {
        let executor = BatchExecutor::new(quick_config());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let output = executor
            .run(
                "cancelled",
                vec![1u64, 2, 3],
                |n| async move { Ok(n) },
                &NoopProgress,
                &cancel,
            )
            .await;

        assert!(output.cancelled);
        assert!(output.results.is_empty());
    }

    #[tokio::test]
    async fn emits_lifecycle_events_in_order() {
        let executor = BatchExecutor::new(quick_config());
        let sink = CollectingSink::new();

        executor
            .run(
                "events",
                (0..4u64).collect(),
                |n| async move { Ok(n) },
                &sink,
                &CancellationToken::new(),
            )
            .await;

        let events = sink.events.lock().unwrap();
        assert!(matches!(events[0], ProgressEvent::BatchStarted { .. }));
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::BatchCompleted { .. })
        ));
        // 4 items with batch_size 3 -> two batches.
        let completed = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::BatchCompleted { .. }))
            .count();
        assert_eq!(completed, 2);
    }
}
