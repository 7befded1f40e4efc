use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reward::RewardBreakdown;
use crate::task::{Phase, TaskStatus};

/// Every observable effect of the engine produces an Event.
/// Operations return the events they caused; subscribers also receive
/// them, together with timeouts fired from background timers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    StatusChanged {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
        at: DateTime<Utc>,
    },
    /// A verification window elapsed before success.
    VerificationTimedOut {
        task_id: String,
        phase: Phase,
        at: DateTime<Utc>,
    },
    /// A task's slot moved, either directly or by a cascading shift.
    TimelineAdjusted {
        task_id: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    RewardGranted {
        task_id: String,
        gold: u32,
        breakdown: RewardBreakdown,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn task_id(&self) -> &str {
        match self {
            Self::StatusChanged { task_id, .. }
            | Self::VerificationTimedOut { task_id, .. }
            | Self::TimelineAdjusted { task_id, .. }
            | Self::RewardGranted { task_id, .. } => task_id,
        }
    }
}
