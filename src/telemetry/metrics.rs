//! Metric instruments for keyseq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without a registered provider every instrument is a no-op.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};

use crate::event::TaskOutcome;

/// Returns the shared meter for keyseq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("keyseq")
}

/// Counter: tasks submitted.
/// Labels: `sequencer`.
pub fn task_submitted() -> Counter<u64> {
    meter()
        .u64_counter("keyseq.task.submitted")
        .with_description("Number of tasks submitted")
        .build()
}

/// Counter: tasks settled.
/// Labels: `sequencer`, `outcome` ("fulfilled" | "rejected" | "panicked" | "cancelled").
pub fn task_settled() -> Counter<u64> {
    meter()
        .u64_counter("keyseq.task.settled")
        .with_description("Number of tasks settled")
        .build()
}

/// Histogram: time a task spent waiting for its key's turn.
/// Labels: `sequencer`.
pub fn task_wait_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("keyseq.task.wait_ms")
        .with_description("Time spent waiting behind earlier tasks for the same key")
        .with_unit("ms")
        .build()
}

/// Histogram: time a task's work took to settle.
/// Labels: `sequencer`.
pub fn task_run_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("keyseq.task.run_ms")
        .with_description("Time from a task's turn starting to its work settling")
        .with_unit("ms")
        .build()
}

/// Up/down counter: tasks submitted but not yet cleaned up.
/// Labels: `sequencer`.
pub fn queue_outstanding() -> UpDownCounter<i64> {
    meter()
        .i64_up_down_counter("keyseq.queue.outstanding")
        .with_description("Tasks submitted and not yet removed from their queue")
        .build()
}

/// Instruments bound to one sequencer instance.
pub(crate) struct SequencerMetrics {
    sequencer: KeyValue,
    submitted: Counter<u64>,
    settled: Counter<u64>,
    wait_ms: Histogram<f64>,
    run_ms: Histogram<f64>,
    outstanding: UpDownCounter<i64>,
}

impl SequencerMetrics {
    pub fn new(sequencer: &str) -> Self {
        Self {
            sequencer: KeyValue::new("sequencer", sequencer.to_string()),
            submitted: task_submitted(),
            settled: task_settled(),
            wait_ms: task_wait_ms(),
            run_ms: task_run_ms(),
            outstanding: queue_outstanding(),
        }
    }

    pub fn record_submitted(&self) {
        let labels = [self.sequencer.clone()];
        self.submitted.add(1, &labels);
        self.outstanding.add(1, &labels);
    }

    pub fn record_started(&self, waited_ms: f64) {
        self.wait_ms.record(waited_ms, &[self.sequencer.clone()]);
    }

    pub fn record_settled(&self, outcome: TaskOutcome, run_ms: f64) {
        self.run_ms.record(run_ms, &[self.sequencer.clone()]);
        self.settled.add(
            1,
            &[
                self.sequencer.clone(),
                KeyValue::new("outcome", outcome.as_str()),
            ],
        );
    }

    pub fn record_removed(&self) {
        self.outstanding.add(-1, &[self.sequencer.clone()]);
    }
}
