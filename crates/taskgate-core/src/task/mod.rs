//! Task record operated on by the verification engine.
//!
//! Tasks are created by the caller in the `pending` state. The engine only
//! ever changes lifecycle fields through a [`TaskPatch`]; titles, tags and
//! other descriptive fields are left alone.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::ValidationError;

/// Lifecycle state of a task.
///
/// ```text
/// pending ──> verifying_start ──> started ──> verifying_finish ──> completed
///    │                               ^  │                              ^
///    └──────── (no verification) ────┘  └──── (no verification) ───────┘
/// ```
///
/// `completed` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    VerifyingStart,
    Started,
    VerifyingFinish,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::VerifyingStart => "verifying_start",
            Self::Started => "started",
            Self::VerifyingFinish => "verifying_finish",
            Self::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Whether a verification window is open in this state.
    pub fn verifying_phase(&self) -> Option<Phase> {
        match self {
            Self::VerifyingStart => Some(Phase::Start),
            Self::VerifyingFinish => Some(Phase::Finish),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which verification gate a timer or event belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Start,
    Finish,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Finish => "finish",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body posture while doing the task; standing work earns a higher rate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Posture {
    #[default]
    Sitting,
    Standing,
}

/// Verification gate configuration attached to a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VerificationConfig {
    pub enabled: bool,
    #[serde(default)]
    pub start_keywords: BTreeSet<String>,
    #[serde(default)]
    pub completion_keywords: BTreeSet<String>,
}

impl VerificationConfig {
    pub fn keywords(&self, phase: Phase) -> &BTreeSet<String> {
        match phase {
            Phase::Start => &self.start_keywords,
            Phase::Finish => &self.completion_keywords,
        }
    }
}

/// A scheduled task on a day's timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Unique identifier
    pub id: String,
    /// Task title
    pub title: String,
    /// Tags for categorization
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub posture: Posture,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    /// Planned duration. Survives timeline shifts even when the slot does not.
    pub duration_minutes: u32,
    #[serde(default)]
    pub status: TaskStatus,
    /// Set once on confirmed start
    #[serde(default)]
    pub actual_start_time: Option<DateTime<Utc>>,
    /// Set once on confirmed finish
    #[serde(default)]
    pub actual_end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub verification: Option<VerificationConfig>,
    /// Deadline of the open start verification window, for countdown display and recovery
    #[serde(default)]
    pub start_deadline: Option<DateTime<Utc>>,
    /// Deadline of the open finish verification window
    #[serde(default)]
    pub finish_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_timed_out: bool,
    #[serde(default)]
    pub finish_timed_out: bool,
    /// Gold granted on completion
    #[serde(default)]
    pub reward_gold: Option<u32>,
}

impl Task {
    /// Create a pending task occupying `[scheduled_start, scheduled_start + duration)`.
    ///
    /// # Errors
    /// Returns an error if `duration_minutes` is zero.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        scheduled_start: DateTime<Utc>,
        duration_minutes: u32,
    ) -> Result<Self, ValidationError> {
        let id = id.into();
        if duration_minutes == 0 {
            return Err(ValidationError::InvalidDuration { task_id: id });
        }
        Ok(Self {
            id,
            title: title.into(),
            tags: Vec::new(),
            posture: Posture::Sitting,
            scheduled_start,
            scheduled_end: scheduled_start + Duration::minutes(i64::from(duration_minutes)),
            duration_minutes,
            status: TaskStatus::Pending,
            actual_start_time: None,
            actual_end_time: None,
            verification: None,
            start_deadline: None,
            finish_deadline: None,
            start_timed_out: false,
            finish_timed_out: false,
            reward_gold: None,
        })
    }

    /// Attach an enabled verification gate with the given keyword sets.
    pub fn with_verification<I, J, S>(mut self, start_keywords: I, completion_keywords: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.verification = Some(VerificationConfig {
            enabled: true,
            start_keywords: start_keywords.into_iter().map(Into::into).collect(),
            completion_keywords: completion_keywords.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn with_posture(mut self, posture: Posture) -> Self {
        self.posture = posture;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// True when start and finish are gated on verification.
    pub fn requires_verification(&self) -> bool {
        self.verification.as_ref().is_some_and(|v| v.enabled)
    }

    /// Day whose timeline this task belongs to.
    pub fn day(&self) -> NaiveDate {
        self.scheduled_start.date_naive()
    }

    pub fn planned_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.duration_minutes))
    }

    /// Whole minutes between actual start and end, rounded; 0 when either is missing.
    pub fn actual_elapsed_minutes(&self) -> u32 {
        match (self.actual_start_time, self.actual_end_time) {
            (Some(start), Some(end)) => {
                let secs = (end - start).num_seconds().max(0);
                u32::try_from((secs + 30) / 60).unwrap_or(u32::MAX)
            }
            _ => 0,
        }
    }

    /// Apply a partial update atomically.
    ///
    /// Set-once fields may be written again only with the same value, and
    /// timeout flags can only be raised. Nothing is changed if any check fails.
    pub fn apply(&mut self, patch: &TaskPatch) -> Result<(), ValidationError> {
        check_set_once(&self.id, "actual_start_time", self.actual_start_time, patch.actual_start_time)?;
        check_set_once(&self.id, "actual_end_time", self.actual_end_time, patch.actual_end_time)?;
        check_set_once(&self.id, "reward_gold", self.reward_gold, patch.reward_gold)?;
        check_monotonic(&self.id, "start_timed_out", self.start_timed_out, patch.start_timed_out)?;
        check_monotonic(&self.id, "finish_timed_out", self.finish_timed_out, patch.finish_timed_out)?;

        let start = patch.scheduled_start.unwrap_or(self.scheduled_start);
        let end = patch.scheduled_end.unwrap_or(self.scheduled_end);
        if end < start {
            return Err(ValidationError::InvalidTimeRange { start, end });
        }
        if let (Some(actual_start), Some(actual_end)) = (
            patch.actual_start_time.or(self.actual_start_time),
            patch.actual_end_time.or(self.actual_end_time),
        ) {
            if actual_end < actual_start {
                return Err(ValidationError::InvalidTimeRange {
                    start: actual_start,
                    end: actual_end,
                });
            }
        }

        self.scheduled_start = start;
        self.scheduled_end = end;
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(at) = patch.actual_start_time {
            self.actual_start_time = Some(at);
        }
        if let Some(at) = patch.actual_end_time {
            self.actual_end_time = Some(at);
        }
        if let Some(deadline) = patch.start_deadline {
            self.start_deadline = deadline;
        }
        if let Some(deadline) = patch.finish_deadline {
            self.finish_deadline = deadline;
        }
        if let Some(flag) = patch.start_timed_out {
            self.start_timed_out = flag;
        }
        if let Some(flag) = patch.finish_timed_out {
            self.finish_timed_out = flag;
        }
        if let Some(gold) = patch.reward_gold {
            self.reward_gold = Some(gold);
        }
        Ok(())
    }
}

fn check_set_once<T: PartialEq>(
    task_id: &str,
    field: &'static str,
    current: Option<T>,
    incoming: Option<T>,
) -> Result<(), ValidationError> {
    match (current, incoming) {
        (Some(old), Some(new)) if old != new => Err(ValidationError::ImmutableField {
            task_id: task_id.to_string(),
            field,
        }),
        _ => Ok(()),
    }
}

fn check_monotonic(
    task_id: &str,
    field: &'static str,
    current: bool,
    incoming: Option<bool>,
) -> Result<(), ValidationError> {
    if current && incoming == Some(false) {
        return Err(ValidationError::FlagReset {
            task_id: task_id.to_string(),
            field,
        });
    }
    Ok(())
}

/// Partial update of the engine-owned fields of a [`Task`].
///
/// `None` leaves a field untouched. Deadlines use a nested option so a
/// window can be closed (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub actual_end_time: Option<DateTime<Utc>>,
    pub start_deadline: Option<Option<DateTime<Utc>>>,
    pub finish_deadline: Option<Option<DateTime<Utc>>>,
    pub start_timed_out: Option<bool>,
    pub finish_timed_out: Option<bool>,
    pub reward_gold: Option<u32>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Patch moving the scheduled slot.
    pub fn slot(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            scheduled_start: Some(start),
            scheduled_end: Some(end),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    #[test]
    fn new_task_spans_its_duration() {
        let task = Task::new("a", "Write report", at(9, 0), 30).unwrap();
        assert_eq!(task.scheduled_end, at(9, 30));
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(!task.requires_verification());
    }

    #[test]
    fn zero_duration_is_rejected() {
        let err = Task::new("a", "Nothing", at(9, 0), 0).unwrap_err();
        assert_eq!(err, ValidationError::InvalidDuration { task_id: "a".into() });
    }

    #[test]
    fn actual_start_is_set_once() {
        let mut task = Task::new("a", "Run", at(9, 0), 30).unwrap();
        let first = TaskPatch {
            actual_start_time: Some(at(9, 5)),
            ..TaskPatch::default()
        };
        task.apply(&first).unwrap();
        // Same value again is a no-op
        task.apply(&first).unwrap();

        let second = TaskPatch {
            actual_start_time: Some(at(9, 6)),
            ..TaskPatch::default()
        };
        assert!(matches!(
            task.apply(&second),
            Err(ValidationError::ImmutableField { field: "actual_start_time", .. })
        ));
        assert_eq!(task.actual_start_time, Some(at(9, 5)));
    }

    #[test]
    fn timeout_flags_only_rise() {
        let mut task = Task::new("a", "Run", at(9, 0), 30).unwrap();
        task.apply(&TaskPatch {
            start_timed_out: Some(true),
            ..TaskPatch::default()
        })
        .unwrap();
        let err = task
            .apply(&TaskPatch {
                start_timed_out: Some(false),
                ..TaskPatch::default()
            })
            .unwrap_err();
        assert!(matches!(err, ValidationError::FlagReset { .. }));
        assert!(task.start_timed_out);
    }

    #[test]
    fn failed_patch_changes_nothing() {
        let mut task = Task::new("a", "Run", at(9, 0), 30).unwrap();
        let bad = TaskPatch {
            status: Some(TaskStatus::Started),
            scheduled_start: Some(at(10, 0)),
            scheduled_end: Some(at(9, 0)),
            ..TaskPatch::default()
        };
        assert!(task.apply(&bad).is_err());
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.scheduled_start, at(9, 0));
    }

    #[test]
    fn end_must_not_precede_actual_start() {
        let mut task = Task::new("a", "Run", at(9, 0), 30).unwrap();
        task.apply(&TaskPatch {
            actual_start_time: Some(at(9, 10)),
            ..TaskPatch::default()
        })
        .unwrap();
        let err = task
            .apply(&TaskPatch {
                actual_end_time: Some(at(9, 5)),
                ..TaskPatch::default()
            })
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTimeRange { .. }));
    }

    #[test]
    fn elapsed_minutes_rounds() {
        let mut task = Task::new("a", "Run", at(9, 0), 30).unwrap();
        task.actual_start_time = Some(at(9, 0));
        task.actual_end_time = Some(at(9, 20) + Duration::seconds(40));
        assert_eq!(task.actual_elapsed_minutes(), 21);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::VerifyingFinish).unwrap();
        assert_eq!(json, "\"verifying_finish\"");
    }
}
