//! In-memory task store for engine and executor tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use strata_retry::{StoreError, Task, TaskStatus, TaskStore};

/// Hash-map task store with the same contract as the SQLite stores.
pub struct MemoryTaskStore<T: Task> {
    tasks: Mutex<HashMap<String, (T, TaskStatus)>>,
}

impl<T: Task> MemoryTaskStore<T> {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn with_tasks<R>(&self, body: impl FnOnce(&mut HashMap<String, (T, TaskStatus)>) -> R) -> R {
        let mut guard = match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        body(&mut guard)
    }

    fn insert(&self, task: &T, status: TaskStatus) -> Result<(), StoreError> {
        self.with_tasks(|tasks| {
            if tasks.contains_key(&task.key()) {
                return Err(StoreError::TaskExists);
            }
            tasks.insert(task.key(), (task.clone(), status));
            Ok(())
        })
    }

    fn snapshot(&self, status: TaskStatus) -> Vec<T> {
        self.with_tasks(|tasks| {
            tasks
                .values()
                .filter(|(_, state)| *state == status)
                .map(|(task, _)| task.clone())
                .collect()
        })
    }
}

impl<T: Task> Default for MemoryTaskStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Task> TaskStore<T> for MemoryTaskStore<T> {
    async fn add_pending(&self, task: &T) -> Result<(), StoreError> {
        self.insert(task, TaskStatus::Pending)
    }

    async fn add_failed(&self, task: &T) -> Result<(), StoreError> {
        self.insert(task, TaskStatus::Failed)
    }

    async fn mark_pending(&self, task: &T) -> Result<(), StoreError> {
        self.with_tasks(|tasks| {
            let entry = tasks.get_mut(&task.key()).ok_or(StoreError::TaskNotFound)?;
            entry.1 = TaskStatus::Pending;
            Ok(())
        })
    }

    async fn mark_failed(&self, task: &T) -> Result<(), StoreError> {
        self.with_tasks(|tasks| {
            let entry = tasks.get_mut(&task.key()).ok_or(StoreError::TaskNotFound)?;
            entry.0.record_failure(Utc::now());
            entry.1 = TaskStatus::Failed;
            Ok(())
        })
    }

    async fn get_pending(&self) -> Result<Vec<T>, StoreError> {
        Ok(self.snapshot(TaskStatus::Pending))
    }

    async fn get_failed(&self) -> Result<Vec<T>, StoreError> {
        Ok(self.snapshot(TaskStatus::Failed))
    }

    async fn remove(&self, task: &T) -> Result<(), StoreError> {
        self.with_tasks(|tasks| {
            tasks.remove(&task.key());
            Ok(())
        })
    }
}
