//! Task store seam.
//!
//! The engine never owns storage: it reads tasks and writes partial updates
//! through [`TaskStore`]. [`InMemoryTaskStore`] is the reference
//! implementation used by the CLI and the tests.

use chrono::NaiveDate;

use crate::error::{CoreError, Result, ValidationError};
use crate::task::{Task, TaskPatch};

/// Storage collaborator holding the tasks of one or more days.
pub trait TaskStore: Send + 'static {
    /// Fetch a task by id.
    fn get_task(&self, id: &str) -> Result<Task>;

    /// All tasks scheduled on `day`, ordered by scheduled start.
    fn ordered_tasks(&self, day: NaiveDate) -> Vec<Task>;

    /// Every task in the store, in no particular order.
    fn all_tasks(&self) -> Vec<Task>;

    /// Atomically apply a partial update.
    fn patch_task(&mut self, id: &str, patch: &TaskPatch) -> Result<()>;
}

/// Vec-backed store keeping insertion order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Vec<Task>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a task list.
    ///
    /// # Errors
    /// Returns an error if two tasks share an id.
    pub fn from_tasks(tasks: Vec<Task>) -> Result<Self> {
        let mut store = Self::new();
        for task in tasks {
            store.insert(task)?;
        }
        Ok(store)
    }

    /// Add a task created by the caller.
    pub fn insert(&mut self, task: Task) -> Result<()> {
        if self.tasks.iter().any(|t| t.id == task.id) {
            return Err(ValidationError::DuplicateTask(task.id).into());
        }
        self.tasks.push(task);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }
}

impl TaskStore for InMemoryTaskStore {
    fn get_task(&self, id: &str) -> Result<Task> {
        self.tasks
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| CoreError::UnknownTask(id.to_string()))
    }

    fn ordered_tasks(&self, day: NaiveDate) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.iter().filter(|t| t.day() == day).cloned().collect();
        tasks.sort_by_key(|t| t.scheduled_start);
        tasks
    }

    fn all_tasks(&self) -> Vec<Task> {
        self.tasks.clone()
    }

    fn patch_task(&mut self, id: &str, patch: &TaskPatch) -> Result<()> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| CoreError::UnknownTask(id.to_string()))?;
        task.apply(patch)?;
        Ok(())
    }
}
