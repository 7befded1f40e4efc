//! Dry-run timeline adjustments. The day file is not modified.

use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde_json::json;
use std::path::PathBuf;
use taskgate_core::adjust_spanning_days;

use super::{load_day, print_json, CliResult};

#[derive(Subcommand)]
pub enum TimelineAction {
    /// Move a task to an actual start
    AdjustStart {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        id: String,
        #[arg(long)]
        at: DateTime<Utc>,
    },
    /// Move a task's end to an actual finish
    AdjustEnd {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        id: String,
        #[arg(long)]
        at: DateTime<Utc>,
    },
}

pub fn run(action: TimelineAction) -> CliResult {
    let (file, id, at, is_start) = match action {
        TimelineAction::AdjustStart { file, id, at } => (file, id, at, true),
        TimelineAction::AdjustEnd { file, id, at } => (file, id, at, false),
    };

    let tasks = load_day(&file)?;
    let day = tasks
        .iter()
        .find(|t| t.id == id)
        .map(|t| t.day())
        .ok_or_else(|| format!("unknown task: {id}"))?;
    let (timeline, changes) = adjust_spanning_days(
        day,
        |d| tasks.iter().filter(|t| t.day() == d).cloned().collect(),
        |timeline| {
            if is_start {
                timeline.adjust_start(&id, at)
            } else {
                timeline.adjust_end(&id, at)
            }
        },
    )?;
    print_json(&json!({
        "changes": changes,
        "slots": timeline.slots(),
    }))
}
