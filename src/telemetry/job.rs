//! Job execution span helpers.
//!
//! Provides span creation and state-transition recording for jobs flowing
//! through a worker.

use tracing::Span;

use crate::model::{JobId, Status};

/// Start a span for one job's execution.
///
/// `job.function` is declared empty because the name is only known once the
/// payload has been decoded; fill it in with [`record_function`].
pub fn start_job_span(queue: &str, job_id: &JobId) -> Span {
    tracing::info_span!(
        "job.execute",
        "job.queue" = queue,
        "job.id" = %job_id,
        "job.function" = tracing::field::Empty,
        "job.status" = tracing::field::Empty,
    )
}

/// Record the resolved function name on the span.
pub fn record_function(span: &Span, function: &str) {
    span.record("job.function", function);
}

/// Record a status transition on the span.
///
/// Emits a tracing `info` event scoped to the given span.
pub fn record_state_transition(span: &Span, from: Status, to: Status) {
    span.record("job.status", to.as_str());
    span.in_scope(|| {
        tracing::info!(from = from.as_str(), to = to.as_str(), "state_transition");
    });
}
