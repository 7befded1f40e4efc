//! Task lifecycle commands.
//!
//! Each invocation loads the day file, rebuilds the engine with a clock
//! fixed at `--at`, re-arms open verification windows (timing out those
//! already overdue), applies one operation and writes the file back.

use chrono::{DateTime, Utc};
use clap::{Subcommand, ValueEnum};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskgate_core::{Config, InMemoryTaskStore, ManualClock, Phase, Timeline, VerificationEngine};

use super::{load_day, print_json, save_day, CliResult};

#[derive(Clone, Copy, ValueEnum)]
pub enum PhaseArg {
    Start,
    Finish,
}

impl From<PhaseArg> for Phase {
    fn from(phase: PhaseArg) -> Self {
        match phase {
            PhaseArg::Start => Phase::Start,
            PhaseArg::Finish => Phase::Finish,
        }
    }
}

#[derive(clap::Args)]
pub struct Target {
    /// Day file (JSON array of tasks)
    #[arg(long)]
    file: PathBuf,
    /// Task ID
    #[arg(long)]
    id: String,
    /// Current instant (RFC 3339). Defaults to now
    #[arg(long)]
    at: Option<DateTime<Utc>>,
}

#[derive(Subcommand)]
pub enum TaskAction {
    /// Request to start a task
    Start(Target),
    /// Request to finish a started task
    Finish(Target),
    /// Report a successful verification
    Verify {
        #[command(flatten)]
        target: Target,
        #[arg(long, value_enum)]
        phase: PhaseArg,
    },
    /// Submit recognized labels as verification evidence
    Evidence {
        #[command(flatten)]
        target: Target,
        #[arg(long, value_enum)]
        phase: PhaseArg,
        /// Comma-separated labels
        #[arg(long, value_delimiter = ',')]
        labels: Vec<String>,
    },
    /// Start regardless of verification
    ForceStart(Target),
    /// Complete regardless of verification
    Complete(Target),
    /// Time out overdue verification windows
    Tick {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Print the day's timeline
    List {
        #[arg(long)]
        file: PathBuf,
    },
}

enum Op {
    Start,
    Finish,
    Verify(Phase),
    Evidence(Phase, Vec<String>),
    ForceStart,
    Complete,
}

pub fn run(action: TaskAction) -> CliResult {
    match action {
        TaskAction::Start(t) => apply(t, Op::Start),
        TaskAction::Finish(t) => apply(t, Op::Finish),
        TaskAction::Verify { target, phase } => apply(target, Op::Verify(phase.into())),
        TaskAction::Evidence { target, phase, labels } => apply(target, Op::Evidence(phase.into(), labels)),
        TaskAction::ForceStart(t) => apply(t, Op::ForceStart),
        TaskAction::Complete(t) => apply(t, Op::Complete),
        TaskAction::Tick { file, at } => tick(file, at),
        TaskAction::List { file } => {
            let tasks = load_day(&file)?;
            let timeline = Timeline::from_tasks(&tasks);
            print_json(&json!({
                "slots": timeline.slots(),
                "tasks": tasks,
            }))
        }
    }
}

fn with_engine<R>(
    file: &Path,
    at: Option<DateTime<Utc>>,
    f: impl FnOnce(&VerificationEngine<InMemoryTaskStore>) -> CliResult<R>,
) -> CliResult<R> {
    let store = InMemoryTaskStore::from_tasks(load_day(file)?)?;
    let clock = Arc::new(ManualClock::new(at.unwrap_or_else(Utc::now)));
    let config = Config::load_or_default().engine_config();

    let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build()?;
    let (result, store) = runtime.block_on(async move {
        let engine = VerificationEngine::with_clock(store, config, clock)?;
        let result = f(&engine)?;
        let store = engine
            .into_store()
            .map_err(|_| "engine still has a timer firing")?;
        CliResult::Ok((result, store))
    })?;

    save_day(file, &store.into_tasks())?;
    Ok(result)
}

fn apply(target: Target, op: Op) -> CliResult {
    let Target { file, id, at } = target;
    let report = with_engine(&file, at, |engine| {
        let rearmed = engine.rearm()?;
        let result = match op {
            Op::Start => json!({ "outcome": engine.request_start(&id)? }),
            Op::Finish => json!({ "outcome": engine.request_finish(&id)? }),
            Op::Verify(phase) => json!({ "outcome": engine.verification_succeeded(&id, phase)? }),
            Op::Evidence(phase, labels) => {
                json!({ "evidence": engine.submit_evidence(&id, phase, labels.as_slice())? })
            }
            Op::ForceStart => json!({ "outcome": engine.force_start(&id)? }),
            Op::Complete => json!({ "outcome": engine.force_complete(&id)? }),
        };
        Ok(json!({
            "rearmed": rearmed,
            "result": result,
            "task": engine.task(&id)?,
        }))
    })?;
    print_json(&report)
}

fn tick(file: PathBuf, at: Option<DateTime<Utc>>) -> CliResult {
    let fired = with_engine(&file, at, |engine| Ok(engine.rearm()?))?;
    print_json(&json!({ "fired": fired }))
}
