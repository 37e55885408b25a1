//! keyseq CLI: run scripted or generated workloads through a sequencer.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use keyseq::KeyedSequencer;
use keyseq::config::Config;
use keyseq::scenario::{Scenario, TaskReport};
use keyseq::telemetry::{TelemetryConfig, init_telemetry};
use tokio::sync::broadcast::error::TryRecvError;

#[derive(Parser)]
#[command(name = "keyseq", about = "Per-key sequential task queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scenario file
    Run {
        /// Path to a scenario TOML file
        scenario: PathBuf,
        /// Print the event stream as JSON lines
        #[arg(long)]
        events: bool,
    },
    /// Run a generated round-robin workload
    Demo {
        /// Number of distinct keys
        #[arg(long, default_value_t = 3)]
        keys: usize,
        /// Tasks submitted per key
        #[arg(long, default_value_t = 4)]
        tasks: usize,
        /// Base task duration in milliseconds
        #[arg(long, default_value_t = 20)]
        duration_ms: u64,
        /// Print the event stream as JSON lines
        #[arg(long)]
        events: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: config.sequencer.name.clone(),
        log_level: config.log_level.clone(),
    })?;

    let (scenario, events) = match cli.command {
        Command::Run { scenario, events } => (Scenario::load(&scenario)?, events),
        Command::Demo {
            keys,
            tasks,
            duration_ms,
            events,
        } => (Scenario::generated(keys, tasks, duration_ms)?, events),
    };

    let sequencer = KeyedSequencer::<String>::with_config(config.sequencer);
    cmd_run(&sequencer, &scenario, events).await
}

async fn cmd_run(
    sequencer: &KeyedSequencer<String>,
    scenario: &Scenario,
    events: bool,
) -> anyhow::Result<()> {
    let mut rx = events.then(|| sequencer.subscribe());

    let reports = scenario.run(sequencer).await?;

    // Every event was sent before its task's completion resolved.
    if let Some(rx) = rx.as_mut() {
        loop {
            match rx.try_recv() {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(TryRecvError::Lagged(missed)) => eprintln!("missed {missed} events"),
                Err(_) => break,
            }
        }
    }

    print_reports(&scenario.name, &reports);
    Ok(())
}

fn print_reports(name: &str, reports: &[TaskReport]) {
    if reports.is_empty() {
        println!("Scenario {name} has no tasks.");
        return;
    }

    println!("Scenario {name}");
    println!(
        "{:<4}  {:<12}  {:<20}  {:>10}  {:>8}  OUTCOME",
        "#", "KEY", "LABEL", "WAITED_MS", "RAN_MS"
    );
    println!("{}", "-".repeat(72));

    for report in reports {
        let label: String = report.label.chars().take(20).collect();
        println!(
            "{:<4}  {:<12}  {:<20}  {:>10}  {:>8}  {}",
            report.finished,
            report.key,
            label,
            report.waited.as_millis(),
            report.ran.as_millis(),
            report.outcome
        );
    }
}
