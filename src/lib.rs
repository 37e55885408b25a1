//! # keyseq
//!
//! Per-key sequential task queue for Tokio.
//!
//! Work submitted under the same key runs strictly one item at a time, in
//! submission order. Work under different keys runs independently. Each
//! key's queue removes itself from the registry once its last item settles.
//!
//! Also provides small async helpers (delay, sequential processing, line
//! iteration), a deep-copyable dynamic [`util::Value`], tracing/OpenTelemetry
//! setup, and a TOML scenario runner used by the `keyseq` binary.

pub mod config;
pub mod error;
pub mod event;
pub mod scenario;
pub mod sequencer;
pub mod telemetry;
pub mod util;

pub use sequencer::{Completion, KeyedSequencer, SequenceKey, SequencerConfig, TaskError, Ticket};
