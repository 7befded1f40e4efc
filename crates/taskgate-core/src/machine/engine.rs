//! Verification engine.
//!
//! One engine serves one store. Every transition runs under a single lock
//! covering the store and the timer table, so requests for one task are
//! processed in arrival order and cascading timeline shifts are atomic.
//! Countdown timers run on the Tokio runtime the engine was built in and
//! re-enter the engine through the same lock when they fire.
//!
//! ## Usage
//!
//! ```ignore
//! let engine = VerificationEngine::new(store, EngineConfig::default())?;
//! let mut events = engine.subscribe();
//! engine.request_start("task-1")?;
//! engine.verification_succeeded("task-1", Phase::Start)?;
//! ```

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use super::transition::{transition, Action, Effect, InvalidTransition, Step};
use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, Result};
use crate::events::Event;
use crate::keywords::{match_keywords, MatchReport};
use crate::reward::RewardPolicy;
use crate::store::TaskStore;
use crate::task::{Phase, Task, TaskPatch, TaskStatus};
use crate::timeline::{adjust_spanning_days, SlotChange, Timeline};
use crate::timer::{CountdownTimers, TimeoutSink, TimerHandle};

pub const DEFAULT_START_WINDOW_SECS: i64 = 120;
pub const DEFAULT_MIN_FINISH_WINDOW_SECS: i64 = 60;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Tunables of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Time allowed for start verification
    pub start_window: Duration,
    /// Lower bound of the finish verification window
    pub min_finish_window: Duration,
    pub reward: RewardPolicy,
    /// Keywords that must match for evidence to pass
    pub keyword_min_matches: usize,
    /// Buffered events per subscriber before lagging ones drop old events
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            start_window: Duration::seconds(DEFAULT_START_WINDOW_SECS),
            min_finish_window: Duration::seconds(DEFAULT_MIN_FINISH_WINDOW_SECS),
            reward: RewardPolicy::default(),
            keyword_min_matches: 1,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Result of a transition request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    Applied {
        status: TaskStatus,
        events: Vec<Event>,
    },
    /// Not allowed from the current state; nothing changed.
    Rejected(InvalidTransition),
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    pub fn events(&self) -> &[Event] {
        match self {
            Self::Applied { events, .. } => events,
            Self::Rejected(_) => &[],
        }
    }
}

/// Result of submitting verification evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub report: MatchReport,
    /// Present when the evidence passed and a transition was attempted
    pub outcome: Option<Outcome>,
}

struct Core<S> {
    store: S,
    timers: CountdownTimers,
}

struct Shared<S> {
    core: Mutex<Core<S>>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    events: broadcast::Sender<Event>,
}

pub struct VerificationEngine<S: TaskStore> {
    shared: Arc<Shared<S>>,
}

impl<S: TaskStore> VerificationEngine<S> {
    /// Build an engine on the system clock.
    ///
    /// # Errors
    /// Returns [`CoreError::Runtime`] when called outside a Tokio runtime.
    pub fn new(store: S, config: EngineConfig) -> Result<Self> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Build an engine reading instants from `clock`.
    ///
    /// # Errors
    /// Returns [`CoreError::Runtime`] when called outside a Tokio runtime.
    pub fn with_clock(store: S, config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| CoreError::Runtime(e.to_string()))?;
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let shared = Arc::new_cyclic(|weak: &Weak<Shared<S>>| {
            let sink: Weak<dyn TimeoutSink> = weak.clone();
            Shared {
                core: Mutex::new(Core {
                    store,
                    timers: CountdownTimers::new(runtime, sink),
                }),
                clock,
                config,
                events,
            }
        });
        Ok(Self { shared })
    }

    /// Receive every event, including timeouts fired in the background.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.events.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn request_start(&self, task_id: &str) -> Result<Outcome> {
        self.shared.apply(task_id, Action::RequestStart)
    }

    pub fn request_finish(&self, task_id: &str) -> Result<Outcome> {
        self.shared.apply(task_id, Action::RequestFinish)
    }

    pub fn verification_succeeded(&self, task_id: &str, phase: Phase) -> Result<Outcome> {
        self.shared.apply(task_id, Action::VerificationSucceeded(phase))
    }

    /// Start regardless of an open or timed-out start window.
    pub fn force_start(&self, task_id: &str) -> Result<Outcome> {
        self.shared.apply(task_id, Action::ForceStart)
    }

    /// Complete from any non-terminal state, cancelling open windows.
    pub fn force_complete(&self, task_id: &str) -> Result<Outcome> {
        self.shared.apply(task_id, Action::ForceComplete)
    }

    /// Check evidence labels against the phase's keywords and, if they
    /// pass, count it as a successful verification.
    pub fn submit_evidence<L: AsRef<str>>(&self, task_id: &str, phase: Phase, labels: &[L]) -> Result<Evidence> {
        let task = self.task(task_id)?;
        let keywords = task
            .verification
            .as_ref()
            .map(|v| v.keywords(phase).clone())
            .unwrap_or_default();
        let report = match_keywords(&keywords, labels, self.shared.config.keyword_min_matches);
        if !report.passed {
            tracing::info!(task_id, %phase, unmatched = ?report.unmatched, "verification evidence rejected");
            return Ok(Evidence { report, outcome: None });
        }
        let outcome = self.verification_succeeded(task_id, phase)?;
        Ok(Evidence {
            report,
            outcome: Some(outcome),
        })
    }

    /// Re-arm timers for verification windows recorded in the store.
    ///
    /// Windows whose deadline already passed time out immediately; the
    /// returned events are those timeouts.
    pub fn rearm(&self) -> Result<Vec<Event>> {
        self.shared.rearm()
    }

    pub fn task(&self, task_id: &str) -> Result<Task> {
        self.shared.lock().store.get_task(task_id)
    }

    pub fn ordered_tasks(&self, day: NaiveDate) -> Vec<Task> {
        self.shared.lock().store.ordered_tasks(day)
    }

    pub fn active_timer(&self, task_id: &str, phase: Phase) -> Option<TimerHandle> {
        self.shared.lock().timers.active(task_id, phase).cloned()
    }

    pub fn active_timer_count(&self) -> usize {
        self.shared.lock().timers.len()
    }

    /// Read the store under the engine lock.
    pub fn with_store<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.shared.lock().store)
    }

    /// Take the store back, dropping all timers.
    ///
    /// Fails (returning the engine) only while a timer is mid-fire.
    pub fn into_store(self) -> std::result::Result<S, Self> {
        match Arc::try_unwrap(self.shared) {
            Ok(shared) => {
                let core = shared.core.into_inner().unwrap_or_else(PoisonError::into_inner);
                Ok(core.store)
            }
            Err(shared) => Err(Self { shared }),
        }
    }
}

impl<S: TaskStore> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, Core<S>> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, task_id: &str, action: Action) -> Result<Outcome> {
        let mut core = self.lock();
        self.apply_locked(&mut core, task_id, action)
    }

    fn apply_locked(&self, core: &mut Core<S>, task_id: &str, action: Action) -> Result<Outcome> {
        let now = self.clock.now();
        let task = core.store.get_task(task_id)?;
        let step = match transition(&task, action, now, &self.config) {
            Ok(step) => step,
            Err(rejected) => {
                tracing::warn!(task_id, status = %task.status, %action, "transition rejected");
                return Ok(Outcome::Rejected(rejected));
            }
        };

        let events = core.execute(&task, step, now, &self.config)?;
        for event in &events {
            // No subscribers is fine.
            let _ = self.events.send(event.clone());
        }
        let status = core.store.get_task(task_id)?.status;
        Ok(Outcome::Applied { status, events })
    }

    fn rearm(&self) -> Result<Vec<Event>> {
        let now = self.clock.now();
        let mut core = self.lock();
        let mut fired = Vec::new();
        for task in core.store.all_tasks() {
            let Some(phase) = task.status.verifying_phase() else {
                continue;
            };
            let (timed_out, deadline) = match phase {
                Phase::Start => (task.start_timed_out, task.start_deadline),
                Phase::Finish => (task.finish_timed_out, task.finish_deadline),
            };
            let Some(deadline) = deadline.filter(|_| !timed_out) else {
                continue;
            };
            if deadline <= now {
                let outcome = self.apply_locked(&mut core, &task.id, Action::VerificationTimedOut(phase))?;
                fired.extend(outcome.events().iter().cloned());
            } else {
                core.timers.start(&task.id, phase, now, deadline);
                tracing::info!(task_id = %task.id, %phase, %deadline, "verification window re-armed");
            }
        }
        Ok(fired)
    }
}

impl<S: TaskStore> TimeoutSink for Shared<S> {
    fn timed_out(&self, handle: TimerHandle) {
        let mut core = self.lock();
        if !core.timers.claim(&handle) {
            tracing::debug!(task_id = %handle.key.task_id, id = handle.id, "ignoring stale timer");
            return;
        }
        let task_id = handle.key.task_id.clone();
        tracing::info!(task_id = %task_id, phase = %handle.key.phase, "verification window elapsed");
        if let Err(e) = self.apply_locked(&mut core, &task_id, Action::VerificationTimedOut(handle.key.phase)) {
            tracing::warn!(task_id = %task_id, error = %e, "failed to record timeout");
        }
    }
}

impl<S: TaskStore> Core<S> {
    /// Persist the step's patch, then run its effects in order.
    fn execute(&mut self, task: &Task, step: Step, now: DateTime<Utc>, config: &EngineConfig) -> Result<Vec<Event>> {
        self.store.patch_task(&task.id, &step.patch)?;

        let mut events = Vec::new();
        if let Some(to) = step.patch.status.filter(|to| *to != task.status) {
            tracing::info!(task_id = %task.id, from = %task.status, to = %to, "task status changed");
            events.push(Event::StatusChanged {
                task_id: task.id.clone(),
                from: task.status,
                to,
                at: now,
            });
        }
        for (phase, raised) in [
            (Phase::Start, step.patch.start_timed_out),
            (Phase::Finish, step.patch.finish_timed_out),
        ] {
            if raised == Some(true) {
                events.push(Event::VerificationTimedOut {
                    task_id: task.id.clone(),
                    phase,
                    at: now,
                });
            }
        }

        for effect in step.effects {
            match effect {
                Effect::StartTimer { phase, deadline } => {
                    self.timers.start(&task.id, phase, now, deadline);
                }
                Effect::CancelTimer(phase) => {
                    self.timers.cancel(&task.id, phase);
                }
                Effect::CancelTimers => {
                    let cancelled = self.timers.cancel_task(&task.id);
                    tracing::debug!(task_id = %task.id, cancelled, "task timers cancelled");
                }
                Effect::AdjustStart(actual) => {
                    let changes = self.adjust(task, |timeline| timeline.adjust_start(&task.id, actual))?;
                    events.extend(self.persist_slots(changes, now)?);
                }
                Effect::AdjustEnd(actual) => {
                    let changes = self.adjust(task, |timeline| timeline.adjust_end(&task.id, actual))?;
                    events.extend(self.persist_slots(changes, now)?);
                }
                Effect::GrantReward => {
                    let finished = self.store.get_task(&task.id)?;
                    let breakdown = config.reward.for_task(&finished);
                    self.store.patch_task(
                        &task.id,
                        &TaskPatch {
                            reward_gold: Some(breakdown.final_gold),
                            ..TaskPatch::default()
                        },
                    )?;
                    tracing::info!(task_id = %task.id, gold = breakdown.final_gold, reason = ?breakdown.reason, "reward granted");
                    events.push(Event::RewardGranted {
                        task_id: task.id.clone(),
                        gold: breakdown.final_gold,
                        breakdown,
                        at: now,
                    });
                }
            }
        }
        Ok(events)
    }

    /// Run an adjustment over the day the task was scheduled on.
    fn adjust(
        &self,
        task: &Task,
        f: impl Fn(&mut Timeline) -> Result<Vec<SlotChange>>,
    ) -> Result<Vec<SlotChange>> {
        adjust_spanning_days(task.day(), |day| self.store.ordered_tasks(day), f)
            .map(|(_, changes)| changes)
    }

    fn persist_slots(&mut self, changes: Vec<SlotChange>, now: DateTime<Utc>) -> Result<Vec<Event>> {
        let mut events = Vec::with_capacity(changes.len());
        for change in changes {
            self.store
                .patch_task(&change.task_id, &TaskPatch::slot(change.start, change.end))?;
            tracing::info!(task_id = %change.task_id, start = %change.start, end = %change.end, "timeline adjusted");
            events.push(Event::TimelineAdjusted {
                task_id: change.task_id,
                start: change.start,
                end: change.end,
                at: now,
            });
        }
        Ok(events)
    }
}
