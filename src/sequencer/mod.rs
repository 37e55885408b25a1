//! Per-key sequential task queue.
//!
//! A [`KeyedSequencer`] keeps a registry from key to an ordered queue of
//! outstanding task handles. Submitting work under a key chains it behind
//! the key's current tail: it starts only once every earlier task for that
//! key has settled and cleaned up after itself. Work under different keys
//! runs concurrently.
//!
//! When a task settles it removes its own handle from the queue, and the
//! key's registry entry is dropped as soon as its queue is empty. A
//! task's [`Completion`] resolves only after that cleanup, so
//! [`KeyedSequencer::len`] never counts a task whose caller has already
//! seen the result.
//!
//! There is no cancellation. A task that never settles blocks its key for
//! good.

mod completion;
mod queue;

pub use completion::{Completion, TaskError};
pub use queue::Ticket;

use std::any::Any;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt::{self, Display};
use std::future::{Future, ready};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, warn};

use crate::error::Error;
use crate::event::{Event, EventKind, TaskOutcome};
use crate::telemetry::duration_ms;
use crate::telemetry::metrics::SequencerMetrics;
use crate::telemetry::task::{record_outcome, record_wait, start_task_span};
use queue::{Enqueued, KeyQueue};

/// Anything usable as a queue key. `Display` labels the key in logs,
/// events and errors.
pub trait SequenceKey: Eq + Hash + Clone + Display + Send + Sync + 'static {}

impl<T> SequenceKey for T where T: Eq + Hash + Clone + Display + Send + Sync + 'static {}

/// Configuration for a sequencer instance.
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Reported in events, spans and metric labels.
    pub name: String,
    /// Buffer size of the event broadcast channel.
    pub event_capacity: usize,
    /// Waits longer than this are logged at `warn`.
    pub slow_wait_threshold: Option<Duration>,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            name: "keyseq".to_string(),
            event_capacity: 256,
            slow_wait_threshold: None,
        }
    }
}

/// Runs work one item at a time per key, in submission order.
///
/// Cloning is cheap and yields a handle to the same registry.
pub struct KeyedSequencer<K> {
    inner: Arc<Inner<K>>,
}

struct Inner<K> {
    config: SequencerConfig,
    registry: Mutex<HashMap<K, KeyQueue>>,
    events: broadcast::Sender<Event>,
    event_seq: AtomicU64,
    metrics: SequencerMetrics,
}

impl<K> Clone for KeyedSequencer<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> fmt::Debug for KeyedSequencer<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedSequencer")
            .field("name", &self.inner.config.name)
            .finish_non_exhaustive()
    }
}

impl<K: SequenceKey> Default for KeyedSequencer<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: SequenceKey> KeyedSequencer<K> {
    pub fn new() -> Self {
        Self::with_config(SequencerConfig::default())
    }

    pub fn with_config(config: SequencerConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let metrics = SequencerMetrics::new(&config.name);
        Self {
            inner: Arc::new(Inner {
                config,
                registry: Mutex::new(HashMap::new()),
                events,
                event_seq: AtomicU64::new(0),
                metrics,
            }),
        }
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.inner.config
    }

    /// Subscribe to task lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    /// Submit work under `key`.
    ///
    /// `work` is called once every earlier task for `key` has settled. It
    /// receives the time spent waiting for that turn. The returned
    /// [`Completion`] resolves with exactly what the work's future resolves
    /// to, after the task has been removed from the queue.
    ///
    /// The task is scheduled immediately on the current Tokio runtime and
    /// runs whether or not the `Completion` is polled. Outside a runtime,
    /// nothing is enqueued and the `Completion` resolves to
    /// [`Error::Runtime`].
    pub fn submit<F, Fut, T, E>(&self, key: K, work: F) -> Completion<T, E>
    where
        F: FnOnce(Duration) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let label = key.to_string();
        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => return Completion::rejected(label, Error::Runtime(e.to_string())),
        };

        let Enqueued {
            ticket,
            tail,
            settled,
            depth,
        } = self.inner.enqueue(&key, &label);
        debug!(key = %label, %ticket, depth, "task enqueued");

        let (result_tx, result_rx) = oneshot::channel();
        let span = start_task_span(&self.inner.config.name, &label, ticket);
        let task_span = span.clone();
        let inner = Arc::clone(&self.inner);
        let task_label = label.clone();
        let enqueued_at = Instant::now();

        runtime.spawn(
            async move {
                if let Some(mut tail) = tail {
                    // A closed channel means the predecessor is gone; the turn is ours either way.
                    let _ = tail.wait_for(|settled| *settled).await;
                }

                let waited = enqueued_at.elapsed();
                record_wait(&task_span, waited);
                inner.task_started(&task_label, ticket, waited);

                let started_at = Instant::now();
                let joined = tokio::spawn(async move { work(waited).await }).await;
                let ran = started_at.elapsed();

                let (outcome, delivery) = settle(&task_label, joined);
                record_outcome(&task_span, outcome);
                inner.task_settled(&task_label, ticket, outcome, ran);

                let delivery = match inner.retire(&key, &task_label, ticket) {
                    Ok(()) => delivery,
                    Err(e) => {
                        error!(key = %task_label, %ticket, "queue bookkeeping failed: {e}");
                        Err(TaskError::Sequencer(e))
                    }
                };

                // Successors start only once cleanup is done.
                settled.send_replace(true);
                let _ = result_tx.send(delivery);
            }
            .instrument(span),
        );

        Completion::new(label, ticket, result_rx)
    }

    /// Submit synchronous work. It runs on the runtime when its turn comes,
    /// so it should not block for long.
    pub fn submit_fn<F, T, E>(&self, key: K, work: F) -> Completion<T, E>
    where
        F: FnOnce(Duration) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.submit(key, move |waited| ready(work(waited)))
    }

    /// Queue an existing future. It is polled once its turn comes, and the
    /// key stays blocked until it settles.
    pub fn submit_future<Fut, T, E>(&self, key: K, future: Fut) -> Completion<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.submit(key, move |_waited| future)
    }

    /// Queue a plain value. Resolves to it once every earlier task for `key`
    /// has settled.
    pub fn submit_value<T>(&self, key: K, value: T) -> Completion<T, Infallible>
    where
        T: Send + 'static,
    {
        self.submit(key, move |_waited| ready(Ok(value)))
    }

    /// Resolves once every task submitted under `key` before this call has
    /// settled.
    pub fn barrier(&self, key: K) -> Completion<(), Infallible> {
        self.submit_value(key, ())
    }

    /// Number of outstanding tasks for `key`, including one being cleaned
    /// up. Never creates a registry entry.
    pub fn len<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock_registry().get(key).map_or(0, KeyQueue::len)
    }

    /// Whether `key` has any outstanding task.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock_registry().contains_key(key)
    }

    /// Number of keys with at least one outstanding task.
    pub fn active_keys(&self) -> usize {
        self.inner.lock_registry().len()
    }
}

impl<K: SequenceKey> Inner<K> {
    fn lock_registry(&self) -> MutexGuard<'_, HashMap<K, KeyQueue>> {
        // No registry update can panic halfway, so a poisoned map is still consistent.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, key: &K, label: &str) -> Enqueued {
        let enqueued = self
            .lock_registry()
            .entry(key.clone())
            .or_default()
            .enqueue();

        self.metrics.record_submitted();
        self.emit(
            label,
            EventKind::Enqueued {
                ticket: enqueued.ticket,
                depth: enqueued.depth,
            },
        );
        enqueued
    }

    fn task_started(&self, label: &str, ticket: Ticket, waited: Duration) {
        let waited_ms = duration_ms(waited);
        if self
            .config
            .slow_wait_threshold
            .is_some_and(|threshold| waited > threshold)
        {
            warn!(key = label, %ticket, waited_ms, "task waited longer than threshold");
        } else {
            debug!(key = label, %ticket, waited_ms, "task started");
        }

        self.metrics.record_started(waited.as_secs_f64() * 1000.0);
        self.emit(label, EventKind::Started { ticket, waited_ms });
    }

    fn task_settled(&self, label: &str, ticket: Ticket, outcome: TaskOutcome, ran: Duration) {
        let run_ms = duration_ms(ran);
        debug!(key = label, %ticket, %outcome, run_ms, "task settled");

        self.metrics.record_settled(outcome, ran.as_secs_f64() * 1000.0);
        self.emit(
            label,
            EventKind::Settled {
                ticket,
                outcome,
                run_ms,
            },
        );
    }

    /// Remove a settled task's handle, dropping the key's entry if its queue
    /// is left empty. Runs in full even when the handle has gone missing.
    fn retire(&self, key: &K, label: &str, ticket: Ticket) -> Result<(), Error> {
        let (removed, key_retired) = {
            let mut registry = self.lock_registry();
            let removed = registry
                .get_mut(key)
                .is_some_and(|queue| queue.remove(ticket));
            let emptied = registry.get(key).is_some_and(KeyQueue::is_empty);
            if emptied {
                registry.remove(key);
            }
            (removed, emptied)
        };

        self.metrics.record_removed();
        if key_retired {
            debug!(key = label, "key retired");
            self.emit(label, EventKind::KeyRetired);
        }

        if !removed {
            return Err(Error::HandleMissing {
                key: label.to_string(),
                ticket: ticket.0,
            });
        }
        Ok(())
    }

    fn emit(&self, key: &str, kind: EventKind) {
        if self.events.receiver_count() == 0 {
            return;
        }
        let event = Event {
            seq: self.event_seq.fetch_add(1, Ordering::Relaxed),
            timestamp: Utc::now(),
            sequencer: self.config.name.clone(),
            key: key.to_string(),
            kind,
        };
        // Only fails when every receiver has gone away since the check above.
        let _ = self.events.send(event);
    }
}

/// Translate the joined work task into an outcome and what the caller gets.
fn settle<T, E>(
    key: &str,
    joined: Result<Result<T, E>, JoinError>,
) -> (TaskOutcome, Result<T, TaskError<E>>) {
    match joined {
        Ok(Ok(value)) => (TaskOutcome::Fulfilled, Ok(value)),
        Ok(Err(e)) => (TaskOutcome::Rejected, Err(TaskError::Failed(e))),
        Err(join) if join.is_panic() => {
            let message = panic_message(join.into_panic());
            error!(key, %message, "work panicked");
            let error = Error::WorkPanicked {
                key: key.to_string(),
                message,
            };
            (TaskOutcome::Panicked, Err(error.into()))
        }
        Err(_) => {
            let error = Error::Cancelled {
                key: key.to_string(),
            };
            (TaskOutcome::Cancelled, Err(error.into()))
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
