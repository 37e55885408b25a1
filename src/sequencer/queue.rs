//! Per-key queue of outstanding task handles.
//!
//! Handles are stored in an ordered arena keyed by [`Ticket`]. A handle is the
//! receiving half of a settlement signal that flips to `true` once the task
//! has run and removed itself from the queue. New submissions wait on the
//! handle at the back of the queue.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Position of a submission within its key's queue.
///
/// Monotonically increasing for as long as the key has an entry in the
/// registry. Numbering restarts when an idle key is garbage-collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ticket(pub u64);

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a new submission takes away from [`KeyQueue::enqueue`].
pub(crate) struct Enqueued {
    pub ticket: Ticket,
    /// Settlement signal of the previous tail, if the queue was not empty.
    pub tail: Option<watch::Receiver<bool>>,
    /// Flipped to `true` once this task has settled and been removed.
    pub settled: watch::Sender<bool>,
    /// Queue length including the new submission.
    pub depth: usize,
}

#[derive(Default)]
pub(crate) struct KeyQueue {
    next_ticket: u64,
    pending: BTreeMap<Ticket, watch::Receiver<bool>>,
}

impl KeyQueue {
    /// Append a new handle and return it along with the tail it must wait on.
    pub fn enqueue(&mut self) -> Enqueued {
        let tail = self.pending.last_key_value().map(|(_, rx)| rx.clone());

        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;

        let (settled, rx) = watch::channel(false);
        self.pending.insert(ticket, rx);

        Enqueued {
            ticket,
            tail,
            settled,
            depth: self.pending.len(),
        }
    }

    /// Remove a handle. Returns `false` if the ticket was not present.
    pub fn remove(&mut self, ticket: Ticket) -> bool {
        self.pending.remove(&ticket).is_some()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
