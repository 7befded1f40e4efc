//! Timeline adjuster.
//!
//! Pure slot arithmetic: persisting and announcing the resulting changes is
//! the engine's job.
//!
//! ## Rules
//!
//! - A started task claims `[actual_start, actual_start + duration)`.
//! - A finished task ends at its actual end; finishing early leaves a gap,
//!   finishing late pushes what follows.
//! - The adjusted slot is never moved or clipped by its own cascade.
//! - Completed slots stay where they happened. One overlapped by the adjusted
//!   slot gives up the overlapped part.
//! - Every other slot, started or not, is moved later (never earlier) to the
//!   first free place at or after its current start, keeping its length.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::{CoreError, Result};
use crate::task::Task;

/// A task's place on the timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub task_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_minutes: u32,
    /// Completed slots are never shifted.
    pub completed: bool,
}

impl Slot {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            start: task.scheduled_start,
            end: task.scheduled_end,
            duration_minutes: task.duration_minutes,
            completed: task.status.is_terminal(),
        }
    }

    fn planned(&self) -> Duration {
        Duration::minutes(i64::from(self.duration_minutes))
    }

    fn len(&self) -> Duration {
        self.end - self.start
    }

    fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.end && self.start < end
    }
}

/// New position of a slot moved by an adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotChange {
    pub task_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Ordered slots of one day.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timeline {
    slots: Vec<Slot>,
}

impl Timeline {
    pub fn new(mut slots: Vec<Slot>) -> Self {
        slots.sort_by(slot_order);
        Self { slots }
    }

    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        Self::new(tasks.into_iter().map(Slot::from_task).collect())
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slot(&self, task_id: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.task_id == task_id)
    }

    /// Sorted by start with every slot ending at or before its successor starts.
    pub fn is_non_overlapping(&self) -> bool {
        self.slots
            .windows(2)
            .all(|w| w[0].start <= w[1].start && w[0].end <= w[1].start && w[0].start <= w[0].end)
    }

    /// Move a task to its actual start and cascade.
    ///
    /// # Errors
    /// Returns [`CoreError::UnknownTask`] if the task is not on this timeline.
    pub fn adjust_start(&mut self, task_id: &str, actual_start: DateTime<Utc>) -> Result<Vec<SlotChange>> {
        let idx = self.index_of(task_id)?;
        let before = self.snapshot();
        let slot = &mut self.slots[idx];
        if actual_start != slot.start {
            slot.start = actual_start;
            slot.end = actual_start + slot.planned();
            self.settle(task_id);
        }
        Ok(self.diff(&before))
    }

    /// Move a task's end to its actual finish; cascades only when it ran late.
    ///
    /// An end before the slot's start collapses the slot to zero length.
    ///
    /// # Errors
    /// Returns [`CoreError::UnknownTask`] if the task is not on this timeline.
    pub fn adjust_end(&mut self, task_id: &str, actual_end: DateTime<Utc>) -> Result<Vec<SlotChange>> {
        let idx = self.index_of(task_id)?;
        let before = self.snapshot();
        let slot = &mut self.slots[idx];
        match actual_end.cmp(&slot.end) {
            Ordering::Less => slot.end = actual_end.max(slot.start),
            Ordering::Greater => {
                slot.end = actual_end;
                self.settle(task_id);
            }
            Ordering::Equal => {}
        }
        Ok(self.diff(&before))
    }

    /// Whether any slot ends after `day` does.
    fn spills_past(&self, day: NaiveDate) -> bool {
        let Some(midnight) = day
            .succ_opt()
            .and_then(|next| next.and_hms_opt(0, 0, 0))
            .map(|naive| Utc.from_utc_datetime(&naive))
        else {
            return false;
        };
        self.slots.iter().any(|s| s.end > midnight)
    }

    fn index_of(&self, task_id: &str) -> Result<usize> {
        self.slots
            .iter()
            .position(|s| s.task_id == task_id)
            .ok_or_else(|| CoreError::UnknownTask(task_id.to_string()))
    }

    fn snapshot(&self) -> HashMap<String, (DateTime<Utc>, DateTime<Utc>)> {
        self.slots
            .iter()
            .map(|s| (s.task_id.clone(), (s.start, s.end)))
            .collect()
    }

    fn diff(&self, before: &HashMap<String, (DateTime<Utc>, DateTime<Utc>)>) -> Vec<SlotChange> {
        self.slots
            .iter()
            .filter(|s| before.get(&s.task_id) != Some(&(s.start, s.end)))
            .map(|s| SlotChange {
                task_id: s.task_id.clone(),
                start: s.start,
                end: s.end,
            })
            .collect()
    }

    /// Restore the non-overlap invariant after `anchor` moved or grew.
    ///
    /// The anchor and completed slots are fixed; fixed slots overlapped by the
    /// anchor are trimmed. Remaining slots are placed in start order at the
    /// first free instant at or after their own start. Each attempt jumps to
    /// the end of a conflicting slot, so placement terminates.
    fn settle(&mut self, anchor: &str) {
        let (mut fixed, movable): (Vec<Slot>, Vec<Slot>) = std::mem::take(&mut self.slots)
            .into_iter()
            .partition(|s| s.task_id == anchor || s.completed);

        if let Some(a) = fixed.iter().find(|s| s.task_id == anchor).cloned() {
            for slot in fixed.iter_mut().filter(|s| s.task_id != anchor) {
                if !slot.overlaps(a.start, a.end) {
                    continue;
                }
                if slot.start < a.start {
                    slot.end = a.start;
                } else {
                    slot.start = a.end;
                    slot.end = slot.end.max(a.end);
                }
            }
        }
        fixed.sort_by(slot_order);
        for i in 1..fixed.len() {
            if fixed[i - 1].task_id != anchor && fixed[i - 1].end > fixed[i].start {
                fixed[i - 1].end = fixed[i].start.max(fixed[i - 1].start);
            }
        }

        let mut placed = fixed;
        let mut movable = movable;
        movable.sort_by(slot_order);
        for mut slot in movable {
            let len = slot.len();
            let mut start = slot.start;
            while let Some(blocker) = placed.iter().find(|p| p.overlaps(start, start + len)) {
                start = blocker.end;
            }
            slot.start = start;
            slot.end = start + len;
            placed.push(slot);
        }

        placed.sort_by(slot_order);
        self.slots = placed;
    }
}

/// Tasks on `day`, plus following days while the adjustment spills past
/// midnight into a day that has tasks.
///
/// `tasks_on` returns one day's tasks. `adjust` runs against a fresh timeline
/// each round, so it must not depend on earlier rounds.
///
/// # Errors
/// Propagates the first error from `adjust`.
pub fn adjust_spanning_days(
    day: NaiveDate,
    tasks_on: impl Fn(NaiveDate) -> Vec<Task>,
    adjust: impl Fn(&mut Timeline) -> Result<Vec<SlotChange>>,
) -> Result<(Timeline, Vec<SlotChange>)> {
    let mut tasks = tasks_on(day);
    let mut last = day;
    loop {
        let mut timeline = Timeline::from_tasks(&tasks);
        let changes = adjust(&mut timeline)?;
        if !timeline.spills_past(last) {
            return Ok((timeline, changes));
        }
        let next_tasks = match last.succ_opt() {
            Some(next) => {
                last = next;
                tasks_on(next)
            }
            None => Vec::new(),
        };
        if next_tasks.is_empty() {
            return Ok((timeline, changes));
        }
        tasks.extend(next_tasks);
    }
}

/// By start, then end, so zero-length slots precede the slot they touch.
fn slot_order(a: &Slot, b: &Slot) -> Ordering {
    a.start
        .cmp(&b.start)
        .then_with(|| a.end.cmp(&b.end))
        .then_with(|| a.task_id.cmp(&b.task_id))
}
