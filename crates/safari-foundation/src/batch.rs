//! Batch scheduling
//!
//! A batch is checked against its hard cap, split into sub-batches of the
//! processing batch size, and each sub-batch runs concurrently. Results are
//! written back into per-index slots so the output order always matches the
//! input order, whatever order the items complete in.

use std::future::Future;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tracing::debug;

use safari_kernel::config::ModelSettings;
use safari_kernel::{BatchItemOutcome, BatchReport, DetectResult, DetectionError, DetectionResult};

/// Partitions and dispatches multi-item requests.
#[derive(Debug, Clone, Copy)]
pub struct BatchScheduler {
    processing_batch_size: usize,
    max_batch_size: usize,
}

impl BatchScheduler {
    pub fn new(processing_batch_size: usize, max_batch_size: usize) -> Self {
        Self {
            processing_batch_size: processing_batch_size.max(1),
            max_batch_size,
        }
    }

    pub fn from_settings(settings: &ModelSettings) -> Self {
        Self::new(settings.batch_size, settings.max_batch_size)
    }

    pub fn processing_batch_size(&self) -> usize {
        self.processing_batch_size
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// The caller's cap never raises the configured one.
    pub fn effective_cap(&self, requested_max: usize) -> usize {
        requested_max.min(self.max_batch_size)
    }

    /// Reject a batch wholesale before any item runs.
    pub fn admit(&self, len: usize, requested_max: usize) -> DetectResult<()> {
        if len == 0 {
            return Err(DetectionError::InvalidInput("batch contains no items".to_string()));
        }
        let cap = self.effective_cap(requested_max);
        if len > cap {
            return Err(DetectionError::BatchTooLarge { size: len, max: cap });
        }
        Ok(())
    }

    /// Run `f` over every item and return the outcomes in input order.
    ///
    /// Only [`admit`](Self::admit) failures abort the whole batch; item
    /// errors land in their slot.
    pub async fn run<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        requested_max: usize,
        f: F,
    ) -> DetectResult<Vec<DetectResult<R>>>
    where
        F: Fn(usize, T) -> Fut,
        Fut: Future<Output = DetectResult<R>>,
    {
        self.admit(items.len(), requested_max)?;

        let total = items.len();
        let mut slots: Vec<Option<DetectResult<R>>> = (0..total).map(|_| None).collect();
        let mut items = items.into_iter().enumerate().peekable();
        let mut chunk = 0usize;

        while items.peek().is_some() {
            let mut in_flight: FuturesUnordered<_> = items
                .by_ref()
                .take(self.processing_batch_size)
                .map(|(index, item)| {
                    let fut = f(index, item);
                    async move { (index, fut.await) }
                })
                .collect();
            debug!(chunk, size = in_flight.len(), total, "dispatching sub-batch");

            while let Some((index, outcome)) = in_flight.next().await {
                slots[index] = Some(outcome);
            }
            chunk += 1;
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| DetectionError::Internal(format!("batch item {index} produced no outcome")))
            })
            .collect()
    }
}

/// Build the response for a finished batch.
///
/// An item is successful when it produced a non-"Unknown" label.
pub fn summarize(outcomes: Vec<DetectResult<DetectionResult>>) -> BatchReport {
    let batch_size = outcomes.len();
    let results: Vec<BatchItemOutcome> = outcomes
        .into_iter()
        .enumerate()
        .map(|(index, outcome)| match outcome {
            Ok(result) => BatchItemOutcome::Ok { index, result },
            Err(err) => BatchItemOutcome::Error {
                index,
                error: err.to_body(),
            },
        })
        .collect();
    let successful_detections = results
        .iter()
        .filter(|r| r.result().is_some_and(|r| !r.is_unknown()))
        .count();

    BatchReport {
        batch_size,
        successful_detections,
        success_rate: if batch_size == 0 {
            0.0
        } else {
            successful_detections as f64 / batch_size as f64
        },
        results,
    }
}
