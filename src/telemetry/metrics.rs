//! Metric instrument factories for litejob.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"litejob"` meter. Without a
//! configured provider they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for litejob instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("litejob")
}

/// Counter: number of jobs enqueued.
/// Labels: `queue`.
pub fn jobs_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("litejob.jobs.enqueued")
        .with_description("Number of jobs enqueued")
        .build()
}

/// Counter: job status transitions.
/// Labels: `from`, `to`.
pub fn job_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("litejob.jobs.state_transitions")
        .with_description("Number of job status transitions")
        .build()
}

/// Counter: claim attempts.
/// Labels: `queue`, `result` ("claimed" | "empty" | "race").
pub fn claims() -> Counter<u64> {
    meter()
        .u64_counter("litejob.claims")
        .with_description("Number of claim attempts by outcome")
        .build()
}

/// Counter: queue-level operations.
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("litejob.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Histogram: job function execution time in milliseconds.
/// Labels: `function`, `status`.
pub fn job_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("litejob.job.duration_ms")
        .with_description("Job execution duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: errors that aborted a poll iteration.
/// Labels: `queue`.
pub fn poll_errors() -> Counter<u64> {
    meter()
        .u64_counter("litejob.worker.poll_errors")
        .with_description("Poll iterations aborted by a store error")
        .build()
}
