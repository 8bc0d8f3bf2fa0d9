//! Span helpers for actions run by the idle dispatcher.

use tracing::Span;

use crate::model::EventId;

/// Start a span covering one action run.
///
/// The `event.status` field is declared empty and filled in by
/// [`record_outcome`].
pub fn start_dispatch_span(id: EventId, tag: &str) -> Span {
    tracing::info_span!(
        "dispatch.run",
        "event.id" = %id,
        "event.tag" = tag,
        "event.status" = tracing::field::Empty,
    )
}

/// Record how the run ended ("one_shot", "continue", "panicked").
pub fn record_outcome(span: &Span, status: &str) {
    span.record("event.status", status);
    span.in_scope(|| {
        tracing::debug!(status = status, "action finished");
    });
}
