//! Scripted workloads for driving a sequencer.
//!
//! A scenario is a list of tasks, each naming the key it runs under, how
//! long its work takes and whether it fails. Tasks are submitted in file
//! order and reported in the order they finished.
//!
//! ```toml
//! name = "checkout"
//!
//! [[task]]
//! key = "alice"
//! label = "reserve"
//! duration_ms = 40
//!
//! [[task]]
//! key = "alice"
//! duration_ms = 5
//! fail = true
//! ```

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::event::TaskOutcome;
use crate::sequencer::{KeyedSequencer, TaskError};
use crate::util::delay;

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(rename = "task", default)]
    pub tasks: Vec<TaskSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskSpec {
    pub key: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub fail: bool,
}

impl TaskSpec {
    fn label_or_default(&self, index: usize) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("{}#{index}", self.key))
    }
}

/// How one task went.
#[derive(Debug, Clone)]
pub struct TaskReport {
    /// Position in the scenario's task list.
    pub index: usize,
    pub key: String,
    pub label: String,
    pub waited: Duration,
    pub ran: Duration,
    pub outcome: TaskOutcome,
    /// Zero-based finishing position across all keys.
    pub finished: usize,
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    waited: Duration,
    ran: Duration,
    finished: usize,
}

#[derive(Debug, Error)]
#[error("task {label} failed: {reason}")]
struct TaskFailure {
    label: String,
    reason: String,
    timing: Timing,
}

fn default_name() -> String {
    "scenario".to_string()
}

impl FromStr for Scenario {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let scenario: Self =
            toml::from_str(s).map_err(|e| Error::Scenario(format!("bad scenario: {e}")))?;
        scenario.validate()?;
        Ok(scenario)
    }
}

impl Scenario {
    /// Load a scenario from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        content.parse().map_err(|e| match e {
            Error::Scenario(reason) => Error::Scenario(format!("{}: {reason}", path.display())),
            other => other,
        })
    }

    /// Round-robin workload over `keys` keys. Within a key, earlier tasks
    /// take longer than later ones. Durations saturate at `u64::MAX`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Scenario`] if the total task count overflows.
    pub fn generated(keys: usize, tasks_per_key: usize, duration_ms: u64) -> Result<Self> {
        let total = keys.checked_mul(tasks_per_key).ok_or_else(|| {
            Error::Scenario(format!("{keys} keys x {tasks_per_key} tasks is too many"))
        })?;

        let mut tasks = Vec::with_capacity(total.min(4096));
        for round in 0..tasks_per_key {
            let remaining = u64::try_from(tasks_per_key - round).unwrap_or(u64::MAX);
            for k in 0..keys {
                tasks.push(TaskSpec {
                    key: format!("key-{k}"),
                    label: Some(format!("key-{k}/{round}")),
                    duration_ms: duration_ms.saturating_mul(remaining),
                    fail: false,
                });
            }
        }
        Ok(Self {
            name: format!("generated-{keys}x{tasks_per_key}"),
            tasks,
        })
    }

    fn validate(&self) -> Result<()> {
        if let Some(index) = self.tasks.iter().position(|t| t.key.is_empty()) {
            return Err(Error::Scenario(format!("task {index} has an empty key")));
        }
        Ok(())
    }

    /// Submit every task and wait for all of them.
    ///
    /// A task's scripted failure shows up as a `Rejected` report. Sequencer
    /// errors abort the run.
    pub async fn run(&self, sequencer: &KeyedSequencer<String>) -> Result<Vec<TaskReport>> {
        let finished = Arc::new(AtomicUsize::new(0));

        let submitted: Vec<_> = self
            .tasks
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                let label = spec.label_or_default(index);
                let work_label = label.clone();
                let finished = Arc::clone(&finished);
                let duration = Duration::from_millis(spec.duration_ms);
                let fail = spec.fail;

                let completion = sequencer.submit(spec.key.clone(), move |waited| async move {
                    let ran = delay(duration).await;
                    let timing = Timing {
                        waited,
                        ran: ran.as_ref().copied().unwrap_or_default(),
                        finished: finished.fetch_add(1, Ordering::SeqCst),
                    };
                    match ran {
                        Err(e) => Err(TaskFailure {
                            label: work_label,
                            reason: e.to_string(),
                            timing,
                        }),
                        Ok(_) if fail => Err(TaskFailure {
                            label: work_label,
                            reason: "scripted failure".to_string(),
                            timing,
                        }),
                        Ok(_) => Ok(timing),
                    }
                });
                (index, spec, label, completion)
            })
            .collect();

        let mut reports = Vec::with_capacity(submitted.len());
        for (index, spec, label, completion) in submitted {
            let (outcome, timing) = match completion.await {
                Ok(timing) => (TaskOutcome::Fulfilled, timing),
                Err(TaskError::Failed(failure)) => {
                    warn!(key = %spec.key, "{failure}");
                    (TaskOutcome::Rejected, failure.timing)
                }
                Err(TaskError::Sequencer(e)) => return Err(e),
            };
            reports.push(TaskReport {
                index,
                key: spec.key.clone(),
                label,
                waited: timing.waited,
                ran: timing.ran,
                outcome,
                finished: timing.finished,
            });
        }

        reports.sort_by_key(|r| r.finished);
        info!(scenario = %self.name, tasks = reports.len(), "scenario finished");
        Ok(reports)
    }
}
