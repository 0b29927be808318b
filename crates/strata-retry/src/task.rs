//! The persisted task contract.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Persisted lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Queued or executing; invisible to the retry poller.
    Pending,
    /// Awaiting retry; the poller's territory.
    Failed,
}

impl TaskStatus {
    /// Stable text form used by stores.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Failed => "failed",
        }
    }
}

/// A unit of durable work.
///
/// Implementations are plain data: the identity key is the composite primary
/// key that makes submission idempotent, and the bookkeeping fields
/// (`created_at`, `last_attempt`, `failures`) are owned by the store.
pub trait Task: Clone + Send + Sync + fmt::Debug + fmt::Display + 'static {
    /// Composite primary key identifying this task.
    fn key(&self) -> String;

    /// When the task was first submitted.
    fn created_at(&self) -> DateTime<Utc>;

    /// When the task last finished an execution attempt.
    fn last_attempt(&self) -> DateTime<Utc>;

    /// Number of failed attempts so far.
    fn failures(&self) -> u32;

    /// Submission delay; the task is held back until it elapses.
    fn delay(&self) -> Duration;

    /// Short label for metrics, e.g. the operation kind.
    fn tags(&self) -> String;

    /// Store-side bookkeeping hook: record a failed attempt at `at`.
    ///
    /// SQL stores perform this transition in the database; in-memory stores
    /// apply it through this method. Engine code never calls it directly.
    fn record_failure(&mut self, at: DateTime<Utc>);

    /// Whether the submission delay has elapsed.
    fn ready(&self) -> bool {
        let elapsed = Utc::now().signed_duration_since(self.created_at());
        chrono::Duration::from_std(self.delay())
            .map_or(true, |delay| elapsed >= delay)
    }
}
