//! The task store contract implemented by callers.

use async_trait::async_trait;
use thiserror::Error;

use crate::task::Task;

/// Failures surfaced by task stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Insert hit an existing row with the same identity key.
    #[error("task already exists")]
    TaskExists,
    /// Update referenced an identity key with no row.
    #[error("task not found")]
    TaskNotFound,
    /// The storage backend failed.
    #[error("task store backend failure")]
    Backend {
        /// Underlying failure.
        #[source]
        source: anyhow::Error,
    },
}

impl StoreError {
    /// Wrap a backend failure.
    #[must_use]
    pub fn backend(source: impl Into<anyhow::Error>) -> Self {
        Self::Backend {
            source: source.into(),
        }
    }
}

/// Durable task storage keyed by each task's identity key.
///
/// Implementations must be safe for concurrent use; the engine calls them
/// from every worker. `remove` is idempotent. The `mark_failed` transition
/// atomically increments the failure count and stamps the attempt time.
#[async_trait]
pub trait TaskStore<T: Task>: Send + Sync {
    /// Insert a task with pending status.
    ///
    /// # Errors
    ///
    /// `TaskExists` on identity-key conflict; `Backend` otherwise.
    async fn add_pending(&self, task: &T) -> Result<(), StoreError>;

    /// Insert a task with failed status.
    ///
    /// # Errors
    ///
    /// `TaskExists` on identity-key conflict; `Backend` otherwise.
    async fn add_failed(&self, task: &T) -> Result<(), StoreError>;

    /// Flip an existing task to pending.
    ///
    /// # Errors
    ///
    /// `TaskNotFound` if the identity key is absent; `Backend` otherwise.
    async fn mark_pending(&self, task: &T) -> Result<(), StoreError>;

    /// Flip an existing task to failed, incrementing its failure count and
    /// stamping `last_attempt = now`.
    ///
    /// # Errors
    ///
    /// `TaskNotFound` if the identity key is absent; `Backend` otherwise.
    async fn mark_failed(&self, task: &T) -> Result<(), StoreError>;

    /// Snapshot of all pending tasks.
    ///
    /// # Errors
    ///
    /// `Backend` on storage failure.
    async fn get_pending(&self) -> Result<Vec<T>, StoreError>;

    /// Snapshot of all failed tasks.
    ///
    /// # Errors
    ///
    /// `Backend` on storage failure.
    async fn get_failed(&self) -> Result<Vec<T>, StoreError>;

    /// Delete a task. Deleting an absent task is a success.
    ///
    /// # Errors
    ///
    /// `Backend` on storage failure.
    async fn remove(&self, task: &T) -> Result<(), StoreError>;
}
