pub mod config;
pub mod reward;
pub mod task;
pub mod timeline;

use std::path::Path;
use taskgate_core::Task;

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Read a day file: a JSON array of tasks.
pub fn load_day(path: &Path) -> CliResult<Vec<Task>> {
    let content = std::fs::read_to_string(path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save_day(path: &Path, tasks: &[Task]) -> CliResult {
    let mut tasks = tasks.to_vec();
    tasks.sort_by(|a, b| a.scheduled_start.cmp(&b.scheduled_start).then_with(|| a.id.cmp(&b.id)));
    std::fs::write(path, serde_json::to_string_pretty(&tasks)?)?;
    Ok(())
}

pub fn print_json<T: serde::Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
