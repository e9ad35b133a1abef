//! Generation attempt span helpers.
//!
//! One span per attempt wraps every stage, the cleanup cascade, and the
//! status write that follow it.

use tracing::Span;
use uuid::Uuid;

/// Start a span for one generation attempt (1-based).
///
/// The `attempt.outcome` field is declared empty and filled in by
/// [`record_outcome`].
pub fn start_attempt_span(project: &str, project_id: &Uuid, attempt: u32) -> Span {
    tracing::info_span!(
        "generation.attempt",
        "project.name" = project,
        "project.id" = %project_id,
        "attempt" = attempt,
        "attempt.outcome" = tracing::field::Empty,
    )
}

/// Record the attempt's outcome label on its span.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("attempt.outcome", outcome);
}

/// Emit a project status transition inside the given span.
pub fn record_status_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "status_transition");
    });
}
