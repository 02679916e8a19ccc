//! Progress reporting for long-running batch operations.
//!
//! Events are advisory only: sinks may drop, coalesce, or ignore them, and
//! nothing downstream depends on their delivery.

/// Structured progress events emitted by the batch executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    BatchStarted {
        task: String,
        total_items: usize,
        total_batches: usize,
    },
    BatchProgress {
        task: String,
        batch_number: usize,
        total_batches: usize,
        items_processed: usize,
        total_items: usize,
    },
    ItemProcessed {
        task: String,
        items_processed: usize,
        total_items: usize,
    },
    BatchCompleted {
        task: String,
        batch_number: usize,
        items_processed: usize,
        total_items: usize,
        failures: usize,
    },
}

/// Capability interface for progress consumers, injected by value at
/// construction. A no-op implementation covers headless and test runs.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Sink that forwards events to tracing, for CLI runs.
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn emit(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::BatchStarted {
                task,
                total_items,
                total_batches,
            } => {
                tracing::info!(task, total_items, total_batches, "batch processing started");
            }
            ProgressEvent::BatchProgress {
                task,
                batch_number,
                total_batches,
                ..
            } => {
                tracing::debug!(task, batch_number, total_batches, "processing batch");
            }
            ProgressEvent::ItemProcessed {
                task,
                items_processed,
                total_items,
            } => {
                tracing::debug!(task, items_processed, total_items, "items processed");
            }
            ProgressEvent::BatchCompleted {
                task,
                batch_number,
                failures,
                ..
            } => {
                tracing::debug!(task, batch_number, failures, "batch completed");
            }
        }
    }
}
