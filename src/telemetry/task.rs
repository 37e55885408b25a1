//! Task execution span helpers.
//!
//! Every submitted task runs inside a `keyseq.task` span. Wait time and
//! outcome are declared empty and filled in as the task progresses.

use std::time::Duration;

use tracing::Span;

use super::duration_ms;
use crate::event::TaskOutcome;
use crate::sequencer::Ticket;

/// Start a span for one submitted task.
pub fn start_task_span(sequencer: &str, key: &str, ticket: Ticket) -> Span {
    tracing::debug_span!(
        "keyseq.task",
        "task.sequencer" = sequencer,
        "task.key" = key,
        "task.ticket" = ticket.0,
        "task.waited_ms" = tracing::field::Empty,
        "task.outcome" = tracing::field::Empty,
    )
}

/// Record how long the task waited for its key's turn.
pub fn record_wait(span: &Span, waited: Duration) {
    span.record("task.waited_ms", duration_ms(waited));
}

/// Record how the task's work settled.
pub fn record_outcome(span: &Span, outcome: TaskOutcome) {
    span.record("task.outcome", outcome.as_str());
}
