//! The executor contract.

use async_trait::async_trait;

use crate::task::Task;

/// Executes tasks pulled off the engine's channels.
///
/// Execution is not assumed idempotent-safe: the engine guarantees at most
/// one concurrent invocation per task identity through its scheduling
/// discipline, not through locking. Any error return flips the task into the
/// failed set for retry.
#[async_trait]
pub trait Executor<T: Task>: Send + Sync {
    /// Run a task to completion.
    ///
    /// # Errors
    ///
    /// Any error marks the task failed and schedules a retry.
    async fn exec(&self, task: T) -> anyhow::Result<()>;

    /// Executor name used in logs and metric labels.
    fn name(&self) -> &'static str;
}
