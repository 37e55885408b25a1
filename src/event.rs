//! Structured events emitted by a sequencer over a task's lifetime.
//!
//! Subscribers get them through [`KeyedSequencer::subscribe`]. Delivery is
//! best-effort: a subscriber that falls behind loses the oldest events.
//!
//! [`KeyedSequencer::subscribe`]: crate::sequencer::KeyedSequencer::subscribe

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sequencer::Ticket;

/// A structured event emitted by a sequencer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic per-sequencer sequence number. Consumers can detect gaps.
    pub seq: u64,
    /// When this event occurred.
    pub timestamp: DateTime<Utc>,
    /// Name of the emitting sequencer.
    pub sequencer: String,
    /// Display label of the key.
    pub key: String,
    /// What happened.
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A task joined the back of its key's queue.
    Enqueued { ticket: Ticket, depth: usize },
    /// Every earlier task for the key has settled; this one's work begins.
    Started { ticket: Ticket, waited_ms: u64 },
    /// The work settled. Cleanup follows immediately.
    Settled {
        ticket: Ticket,
        outcome: TaskOutcome,
        run_ms: u64,
    },
    /// The key's queue emptied and its registry entry was dropped.
    KeyRetired,
}

/// How a task's work settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Fulfilled,
    Rejected,
    Panicked,
    Cancelled,
}

impl TaskOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fulfilled => "fulfilled",
            Self::Rejected => "rejected",
            Self::Panicked => "panicked",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
