//! The caller's view of a submitted task.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use thiserror::Error;
use tokio::sync::oneshot;

use super::queue::Ticket;
use crate::error::Error;

/// Why a submitted task did not produce a value.
#[derive(Debug, Error)]
pub enum TaskError<E> {
    /// The work itself returned this error.
    #[error("{0}")]
    Failed(E),

    /// The sequencer could not deliver the work's outcome.
    #[error(transparent)]
    Sequencer(#[from] Error),
}

impl<E> TaskError<E> {
    /// The work's own error, if that is what this is.
    pub fn failure(&self) -> Option<&E> {
        match self {
            Self::Failed(e) => Some(e),
            Self::Sequencer(_) => None,
        }
    }

    pub fn into_failure(self) -> Option<E> {
        match self {
            Self::Failed(e) => Some(e),
            Self::Sequencer(_) => None,
        }
    }
}

pub(crate) type Delivery<T, E> = Result<T, TaskError<E>>;

/// Resolves with the outcome of a submitted task.
///
/// By the time this resolves, the task's handle has already been removed
/// from its key's queue, so [`KeyedSequencer::len`] no longer counts it.
///
/// Dropping a `Completion` does not cancel the task.
///
/// [`KeyedSequencer::len`]: super::KeyedSequencer::len
#[must_use = "a Completion does nothing when dropped; the task runs regardless"]
pub struct Completion<T, E> {
    key: String,
    ticket: Option<Ticket>,
    rx: oneshot::Receiver<Delivery<T, E>>,
}

impl<T, E> Completion<T, E> {
    pub(crate) fn new(key: String, ticket: Ticket, rx: oneshot::Receiver<Delivery<T, E>>) -> Self {
        Self {
            key,
            ticket: Some(ticket),
            rx,
        }
    }

    /// A completion that is already resolved with a sequencer error. The task
    /// never entered a queue, so it has no ticket.
    pub(crate) fn rejected(key: String, error: Error) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(TaskError::Sequencer(error)));
        Self {
            key,
            ticket: None,
            rx,
        }
    }

    /// Display label of the key this task was submitted under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The task's ticket, or `None` if it was never enqueued.
    pub fn ticket(&self) -> Option<Ticket> {
        self.ticket
    }
}

impl<T, E> Future for Completion<T, E> {
    type Output = Result<T, TaskError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match ready!(Pin::new(&mut this.rx).poll(cx)) {
            Ok(delivery) => Poll::Ready(delivery),
            // The driving task was dropped without reporting, e.g. on runtime shutdown.
            Err(_) => Poll::Ready(Err(TaskError::Sequencer(Error::Cancelled {
                key: this.key.clone(),
            }))),
        }
    }
}
