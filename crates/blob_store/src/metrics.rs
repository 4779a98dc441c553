//! Metrics for blob store operations.

use std::time::Instant;

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};

use crate::{BlobResult, Operation, OperationOutcome};

/// Metrics for blob store operations.
#[derive(Clone)]
pub struct BlobMetrics {
    /// Histogram for operation latencies.
    pub operations: Histogram<f64>,

    /// Counter for operation errors.
    pub errors: Counter<u64>,
}

impl BlobMetrics {
    /// Create new metrics from a meter.
    pub fn new(meter: &Meter) -> Self {
        let operations = meter
            .f64_histogram("blob_store_operation_duration_seconds")
            .with_description("Duration of blob store operations in seconds")
            .build();

        let errors = meter
            .u64_counter("blob_store_errors_total")
            .with_description("Total number of failed blob store operations")
            .build();

        Self { operations, errors }
    }

    /// Start timing an operation. Call [`Timer::finish`] with the result to
    /// label it with its outcome.
    pub fn start(&self, op: Operation, provider: &'static str) -> Timer {
        Timer {
            start: Instant::now(),
            metrics: self.clone(),
            labels: vec![
                KeyValue::new("op", op.to_string()),
                KeyValue::new("provider", provider),
            ],
            outcome: None,
        }
    }
}

/// Timer for measuring operation duration. Records on drop.
pub struct Timer {
    start: Instant,
    metrics: BlobMetrics,
    labels: Vec<KeyValue>,
    outcome: Option<OperationOutcome>,
}

impl Timer {
    /// Record the outcome of `result`, counting failures.
    pub fn finish<T>(mut self, result: &BlobResult<T>) {
        let outcome = match result {
            Ok(_) => OperationOutcome::Success,
            Err(err) => err.outcome(),
        };
        if outcome != OperationOutcome::Success {
            let mut labels = self.labels.clone();
            labels.push(KeyValue::new("outcome", outcome.to_string()));
            self.metrics.errors.add(1, &labels);
        }
        self.outcome = Some(outcome);
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        // An unfinished timer belongs to a cancelled operation.
        let outcome = self.outcome.map_or_else(|| "cancelled".to_string(), |o| o.to_string());
        let mut labels = std::mem::take(&mut self.labels);
        labels.push(KeyValue::new("outcome", outcome));
        self.metrics.operations.record(duration, &labels);
    }
}
