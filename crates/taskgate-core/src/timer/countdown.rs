//! Per-task, per-phase countdown timers.
//!
//! Each active timer is one lightweight Tokio task sleeping until its
//! deadline. When it wakes it reports to a [`TimeoutSink`], which must
//! [`claim`](CountdownTimers::claim) the handle before acting on it: a
//! timer cancelled between waking and being claimed is simply dropped, so
//! a cancelled timer is never observed to fire.
//!
//! At most one timer exists per `(task, phase)`. Starting a second one
//! returns the existing handle.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Weak;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::task::Phase;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub task_id: String,
    pub phase: Phase,
}

impl TimerKey {
    pub fn new(task_id: impl Into<String>, phase: Phase) -> Self {
        Self {
            task_id: task_id.into(),
            phase,
        }
    }
}

/// Identity of one armed timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerHandle {
    pub id: u64,
    pub key: TimerKey,
    pub deadline: DateTime<Utc>,
}

/// Result of [`CountdownTimers::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Started {
    New(TimerHandle),
    /// A timer was already active for the key; nothing new was armed.
    Existing(TimerHandle),
}

impl Started {
    pub fn handle(&self) -> &TimerHandle {
        match self {
            Self::New(h) | Self::Existing(h) => h,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::New(_))
    }
}

/// Receiver of elapsed deadlines.
pub trait TimeoutSink: Send + Sync + 'static {
    fn timed_out(&self, handle: TimerHandle);
}

struct ActiveTimer {
    handle: TimerHandle,
    task: JoinHandle<()>,
}

/// Table of armed timers keyed by `(task, phase)`.
pub struct CountdownTimers {
    runtime: Handle,
    sink: Weak<dyn TimeoutSink>,
    active: HashMap<TimerKey, ActiveTimer>,
    next_id: u64,
}

impl CountdownTimers {
    pub fn new(runtime: Handle, sink: Weak<dyn TimeoutSink>) -> Self {
        Self {
            runtime,
            sink,
            active: HashMap::new(),
            next_id: 1,
        }
    }

    /// Arm a timer firing at `deadline` (immediately if it already passed).
    pub fn start(
        &mut self,
        task_id: &str,
        phase: Phase,
        now: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Started {
        let key = TimerKey::new(task_id, phase);
        if let Some(existing) = self.active.get(&key) {
            tracing::debug!(task_id, %phase, id = existing.handle.id, "timer already active");
            return Started::Existing(existing.handle.clone());
        }

        let handle = TimerHandle {
            id: self.next_id,
            key: key.clone(),
            deadline,
        };
        self.next_id += 1;

        let wait = (deadline - now).to_std().unwrap_or_default();
        let sink = self.sink.clone();
        let fired = handle.clone();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(wait).await;
            if let Some(sink) = sink.upgrade() {
                sink.timed_out(fired);
            }
        });
        tracing::debug!(task_id, %phase, id = handle.id, %deadline, "timer started");
        self.active.insert(
            key,
            ActiveTimer {
                handle: handle.clone(),
                task,
            },
        );
        Started::New(handle)
    }

    /// Stop and discard a timer. Safe when none is active.
    pub fn cancel(&mut self, task_id: &str, phase: Phase) -> bool {
        match self.active.remove(&TimerKey::new(task_id, phase)) {
            Some(timer) => {
                timer.task.abort();
                tracing::debug!(task_id, %phase, id = timer.handle.id, "timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every phase of a task. Returns how many were active.
    pub fn cancel_task(&mut self, task_id: &str) -> usize {
        [Phase::Start, Phase::Finish]
            .into_iter()
            .filter(|phase| self.cancel(task_id, *phase))
            .count()
    }

    /// Take ownership of a fired timer.
    ///
    /// Returns false when the handle is no longer the active timer for its
    /// key (it was cancelled, possibly replaced); the firing must be ignored.
    pub fn claim(&mut self, handle: &TimerHandle) -> bool {
        match self.active.get(&handle.key) {
            Some(timer) if timer.handle.id == handle.id => {
                self.active.remove(&handle.key);
                true
            }
            _ => false,
        }
    }

    pub fn active(&self, task_id: &str, phase: Phase) -> Option<&TimerHandle> {
        self.active
            .get(&TimerKey::new(task_id, phase))
            .map(|t| &t.handle)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

impl Drop for CountdownTimers {
    fn drop(&mut self) {
        for timer in self.active.values() {
            timer.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration as StdDuration;

    #[derive(Default)]
    struct Recorder {
        fired: Mutex<Vec<TimerHandle>>,
    }

    impl TimeoutSink for Recorder {
        fn timed_out(&self, handle: TimerHandle) {
            self.fired.lock().unwrap().push(handle);
        }
    }

    fn setup() -> (Arc<Recorder>, CountdownTimers, DateTime<Utc>) {
        let recorder = Arc::new(Recorder::default());
        let sink: Arc<dyn TimeoutSink> = recorder.clone();
        let timers = CountdownTimers::new(Handle::current(), Arc::downgrade(&sink));
        (recorder, timers, Utc::now())
    }

    async fn pass(secs: u64) {
        tokio::time::sleep(StdDuration::from_secs(secs) + StdDuration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_deadline() {
        let (recorder, mut timers, now) = setup();
        let started = timers.start("a", Phase::Start, now, now + chrono::Duration::seconds(60));
        assert!(started.is_new());

        pass(59).await;
        assert!(recorder.fired.lock().unwrap().is_empty());

        pass(1).await;
        let fired = recorder.fired.lock().unwrap().clone();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0], *started.handle());

        pass(600).await;
        assert_eq!(recorder.fired.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (recorder, mut timers, now) = setup();
        timers.start("a", Phase::Finish, now, now + chrono::Duration::seconds(30));
        assert!(timers.cancel("a", Phase::Finish));
        // Second cancel is a no-op
        assert!(!timers.cancel("a", Phase::Finish));

        pass(120).await;
        assert!(recorder.fired.lock().unwrap().is_empty());
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_start_returns_existing_handle() {
        let (_recorder, mut timers, now) = setup();
        let first = timers.start("a", Phase::Start, now, now + chrono::Duration::seconds(60));
        let second = timers.start("a", Phase::Start, now, now + chrono::Duration::seconds(90));

        assert!(!second.is_new());
        assert_eq!(second.handle(), first.handle());
        assert_eq!(timers.len(), 1);

        // Other phase of the same task is independent
        assert!(timers
            .start("a", Phase::Finish, now, now + chrono::Duration::seconds(60))
            .is_new());
        assert_eq!(timers.cancel_task("a"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_handle_cannot_be_claimed() {
        let (recorder, mut timers, now) = setup();
        let first = timers.start("a", Phase::Start, now, now + chrono::Duration::seconds(10));
        pass(10).await;

        let fired = recorder.fired.lock().unwrap()[0].clone();
        timers.cancel("a", Phase::Start);
        timers.start("a", Phase::Start, now, now + chrono::Duration::seconds(100));

        assert_eq!(fired, *first.handle());
        assert!(!timers.claim(&fired));
        assert!(timers.active("a", Phase::Start).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadline_fires_immediately() {
        let (recorder, mut timers, now) = setup();
        let started = timers.start("a", Phase::Start, now, now - chrono::Duration::seconds(5));
        tokio::task::yield_now().await;
        pass(0).await;
        assert_eq!(recorder.fired.lock().unwrap().len(), 1);
        assert!(timers.claim(started.handle()));
        assert!(timers.is_empty());
    }
}
