//! Transition rules.
//!
//! | action                      | legal from                   | verified task goes to | unverified task goes to |
//! |-----------------------------|------------------------------|-----------------------|-------------------------|
//! | `RequestStart`              | pending                      | verifying_start       | started                 |
//! | `VerificationSucceeded(S)`  | verifying_start              | started               | -                       |
//! | `ForceStart`                | pending, verifying_start     | started               | started                 |
//! | `RequestFinish`             | started                      | verifying_finish      | completed               |
//! | `VerificationSucceeded(F)`  | verifying_finish             | completed             | -                       |
//! | `ForceComplete`             | any but completed            | completed             | completed               |
//! | `VerificationTimedOut(p)`   | verifying_p, flag not raised | (unchanged)           | -                       |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::engine::EngineConfig;
use crate::task::{Phase, Task, TaskPatch, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    RequestStart,
    RequestFinish,
    VerificationSucceeded(Phase),
    VerificationTimedOut(Phase),
    ForceStart,
    ForceComplete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestStart => f.write_str("request start"),
            Self::RequestFinish => f.write_str("request finish"),
            Self::VerificationSucceeded(phase) => write!(f, "verify {phase}"),
            Self::VerificationTimedOut(phase) => write!(f, "time out {phase} verification"),
            Self::ForceStart => f.write_str("force start"),
            Self::ForceComplete => f.write_str("force complete"),
        }
    }
}

/// The action is not allowed from the task's current state.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("cannot {action} task '{task_id}' while it is {from}")]
pub struct InvalidTransition {
    pub task_id: String,
    pub from: TaskStatus,
    pub action: Action,
}

/// Side effect the engine must carry out after persisting a step's patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StartTimer {
        phase: Phase,
        deadline: DateTime<Utc>,
    },
    CancelTimer(Phase),
    /// Cancel every phase of the task.
    CancelTimers,
    AdjustStart(DateTime<Utc>),
    AdjustEnd(DateTime<Utc>),
    GrantReward,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub patch: TaskPatch,
    pub effects: Vec<Effect>,
}

pub fn transition(
    task: &Task,
    action: Action,
    now: DateTime<Utc>,
    config: &EngineConfig,
) -> Result<Step, InvalidTransition> {
    let reject = || InvalidTransition {
        task_id: task.id.clone(),
        from: task.status,
        action,
    };
    let gated = task.requires_verification();

    match (action, task.status) {
        (Action::RequestStart, TaskStatus::Pending) if gated => {
            let deadline = now + config.start_window;
            Ok(Step {
                patch: TaskPatch {
                    status: Some(TaskStatus::VerifyingStart),
                    start_deadline: Some(Some(deadline)),
                    ..TaskPatch::default()
                },
                effects: vec![Effect::StartTimer {
                    phase: Phase::Start,
                    deadline,
                }],
            })
        }
        (Action::RequestStart, TaskStatus::Pending)
        | (Action::VerificationSucceeded(Phase::Start), TaskStatus::VerifyingStart)
        | (Action::ForceStart, TaskStatus::Pending | TaskStatus::VerifyingStart) => Ok(start(task, now)),

        (Action::RequestFinish, TaskStatus::Started) if gated => {
            let planned_end = task.actual_start_time.unwrap_or(now) + task.planned_duration();
            let deadline = now + (planned_end - now).max(config.min_finish_window);
            Ok(Step {
                patch: TaskPatch {
                    status: Some(TaskStatus::VerifyingFinish),
                    finish_deadline: Some(Some(deadline)),
                    ..TaskPatch::default()
                },
                effects: vec![Effect::StartTimer {
                    phase: Phase::Finish,
                    deadline,
                }],
            })
        }
        (Action::RequestFinish, TaskStatus::Started)
        | (Action::VerificationSucceeded(Phase::Finish), TaskStatus::VerifyingFinish) => {
            Ok(complete(task, now))
        }
        (Action::ForceComplete, status) if !status.is_terminal() => Ok(complete(task, now)),

        (Action::VerificationTimedOut(Phase::Start), TaskStatus::VerifyingStart) if !task.start_timed_out => {
            Ok(Step {
                patch: TaskPatch {
                    start_timed_out: Some(true),
                    ..TaskPatch::default()
                },
                effects: Vec::new(),
            })
        }
        (Action::VerificationTimedOut(Phase::Finish), TaskStatus::VerifyingFinish) if !task.finish_timed_out => {
            Ok(Step {
                patch: TaskPatch {
                    finish_timed_out: Some(true),
                    ..TaskPatch::default()
                },
                effects: Vec::new(),
            })
        }

        _ => Err(reject()),
    }
}

fn start(task: &Task, now: DateTime<Utc>) -> Step {
    let mut patch = TaskPatch {
        status: Some(TaskStatus::Started),
        actual_start_time: Some(now),
        ..TaskPatch::default()
    };
    let mut effects = Vec::new();
    if task.start_deadline.is_some() {
        patch.start_deadline = Some(None);
    }
    if task.status == TaskStatus::VerifyingStart {
        effects.push(Effect::CancelTimer(Phase::Start));
    }
    effects.push(Effect::AdjustStart(now));
    Step { patch, effects }
}

/// Shared by normal and forced completion; cancels whatever window is open.
fn complete(task: &Task, now: DateTime<Utc>) -> Step {
    let mut patch = TaskPatch {
        status: Some(TaskStatus::Completed),
        actual_end_time: Some(now),
        ..TaskPatch::default()
    };
    let mut effects = Vec::new();
    if task.start_deadline.is_some() {
        patch.start_deadline = Some(None);
    }
    if task.finish_deadline.is_some() {
        patch.finish_deadline = Some(None);
    }
    if task.status.verifying_phase().is_some() {
        effects.push(Effect::CancelTimers);
    }
    effects.push(Effect::AdjustEnd(now));
    effects.push(Effect::GrantReward);
    Step { patch, effects }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn plain() -> Task {
        Task::new("a", "Plain", at(9, 0), 30).unwrap()
    }

    fn gated() -> Task {
        Task::new("v", "Gated", at(9, 0), 30)
            .unwrap()
            .with_verification(["desk"], ["notes"])
    }

    fn with_status(mut task: Task, status: TaskStatus) -> Task {
        task.status = status;
        task
    }

    #[test]
    fn unverified_start_is_immediate() {
        let step = transition(&plain(), Action::RequestStart, at(9, 5), &EngineConfig::default()).unwrap();
        assert_eq!(step.patch.status, Some(TaskStatus::Started));
        assert_eq!(step.patch.actual_start_time, Some(at(9, 5)));
        assert_eq!(step.effects, vec![Effect::AdjustStart(at(9, 5))]);
    }

    #[test]
    fn verified_start_opens_window() {
        let config = EngineConfig::default();
        let step = transition(&gated(), Action::RequestStart, at(9, 0), &config).unwrap();
        let deadline = at(9, 0) + config.start_window;
        assert_eq!(step.patch.status, Some(TaskStatus::VerifyingStart));
        assert_eq!(step.patch.start_deadline, Some(Some(deadline)));
        assert_eq!(step.patch.actual_start_time, None);
        assert_eq!(
            step.effects,
            vec![Effect::StartTimer {
                phase: Phase::Start,
                deadline
            }]
        );
    }

    #[test]
    fn second_start_request_is_rejected() {
        let config = EngineConfig::default();
        for status in [TaskStatus::VerifyingStart, TaskStatus::Started, TaskStatus::VerifyingFinish, TaskStatus::Completed] {
            let err = transition(&with_status(gated(), status), Action::RequestStart, at(9, 1), &config).unwrap_err();
            assert_eq!(err.from, status);
            assert_eq!(err.action, Action::RequestStart);
        }
    }

    #[test]
    fn start_success_cancels_timer_and_adjusts() {
        let mut task = with_status(gated(), TaskStatus::VerifyingStart);
        task.start_deadline = Some(at(9, 2));
        let step = transition(&task, Action::VerificationSucceeded(Phase::Start), at(9, 1), &EngineConfig::default()).unwrap();
        assert_eq!(step.patch.start_deadline, Some(None));
        assert_eq!(
            step.effects,
            vec![Effect::CancelTimer(Phase::Start), Effect::AdjustStart(at(9, 1))]
        );
    }

    #[test]
    fn success_for_wrong_phase_is_rejected() {
        let task = with_status(gated(), TaskStatus::VerifyingStart);
        assert!(transition(&task, Action::VerificationSucceeded(Phase::Finish), at(9, 1), &EngineConfig::default()).is_err());
    }

    #[test]
    fn timeout_keeps_status_and_is_one_shot() {
        let config = EngineConfig::default();
        let mut task = with_status(gated(), TaskStatus::VerifyingStart);
        let step = transition(&task, Action::VerificationTimedOut(Phase::Start), at(9, 2), &config).unwrap();
        assert_eq!(step.patch.status, None);
        assert_eq!(step.patch.start_timed_out, Some(true));

        task.start_timed_out = true;
        assert!(transition(&task, Action::VerificationTimedOut(Phase::Start), at(9, 3), &config).is_err());
    }

    #[test]
    fn finish_window_covers_remaining_planned_time() {
        let config = EngineConfig::default();
        let mut task = with_status(gated(), TaskStatus::Started);
        task.actual_start_time = Some(at(9, 0));

        let step = transition(&task, Action::RequestFinish, at(9, 10), &config).unwrap();
        assert_eq!(step.patch.finish_deadline, Some(Some(at(9, 30))));

        // Past the planned end the floor applies
        let late = transition(&task, Action::RequestFinish, at(9, 45), &config).unwrap();
        assert_eq!(late.patch.finish_deadline, Some(Some(at(9, 45) + config.min_finish_window)));
    }

    #[test]
    fn unverified_finish_completes_and_rewards() {
        let mut task = with_status(plain(), TaskStatus::Started);
        task.actual_start_time = Some(at(9, 0));
        let step = transition(&task, Action::RequestFinish, at(9, 25), &EngineConfig::default()).unwrap();
        assert_eq!(step.patch.status, Some(TaskStatus::Completed));
        assert_eq!(step.effects, vec![Effect::AdjustEnd(at(9, 25)), Effect::GrantReward]);
    }

    #[test]
    fn force_complete_cancels_open_window() {
        let mut task = with_status(gated(), TaskStatus::VerifyingFinish);
        task.finish_deadline = Some(at(9, 40));
        let step = transition(&task, Action::ForceComplete, at(9, 35), &EngineConfig::default()).unwrap();
        assert_eq!(step.patch.finish_deadline, Some(None));
        assert_eq!(
            step.effects,
            vec![Effect::CancelTimers, Effect::AdjustEnd(at(9, 35)), Effect::GrantReward]
        );

        let done = with_status(gated(), TaskStatus::Completed);
        assert!(transition(&done, Action::ForceComplete, at(9, 35), &EngineConfig::default()).is_err());
    }

    #[test]
    fn force_start_skips_pending_window() {
        let task = with_status(gated(), TaskStatus::VerifyingStart);
        let step = transition(&task, Action::ForceStart, at(9, 4), &EngineConfig::default()).unwrap();
        assert_eq!(step.patch.status, Some(TaskStatus::Started));
        assert!(step.effects.contains(&Effect::CancelTimer(Phase::Start)));
        assert!(transition(&with_status(gated(), TaskStatus::Started), Action::ForceStart, at(9, 4), &EngineConfig::default()).is_err());
    }

    #[test]
    fn rejection_message_reads_naturally() {
        let err = transition(&with_status(plain(), TaskStatus::Started), Action::RequestStart, at(9, 1), &EngineConfig::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot request start task 'a' while it is started");
    }
}
