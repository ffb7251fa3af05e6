//! Job execution span helpers.
//!
//! Provides span creation and status-transition recording for jobs flowing
//! through the worker pool.

use tracing::Span;
use uuid::Uuid;

/// Start a span for one job execution.
///
/// The `job.status` field is declared empty and can be updated via
/// [`record_state_transition`].
pub fn start_job_span(kind: &str, job_id: &Uuid) -> Span {
    tracing::info_span!(
        "job.execute",
        "job.kind" = kind,
        "job.id" = %job_id,
        "job.status" = tracing::field::Empty,
    )
}

/// Record a status transition on the given span.
///
/// Sets `job.status` and emits a `debug` event scoped to the span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("job.status", to);
    span.in_scope(|| {
        tracing::debug!(from = from, to = to, "state_transition");
    });
}
