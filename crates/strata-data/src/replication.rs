//! Tag-replication tasks and their SQLite store.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use strata_core::Digest;
use strata_retry::{StoreError, Task, TaskStatus, TaskStore};
use tracing::info;

use crate::writeback::{delay_ms, map_insert_error};

/// Durable order to replicate a tag to one remote index.
///
/// Identity key is `(tag, destination)`, so replicating the same tag to N
/// remotes produces N independent tasks and re-submitting any of them is a
/// no-op.
#[derive(Debug, Clone)]
pub struct ReplicationTask {
    /// Tag being replicated.
    pub tag: String,
    /// Digest the tag resolves to.
    pub digest: Digest,
    /// Blobs the tag depends on, in resolution order.
    pub dependencies: Vec<Digest>,
    /// Remote index address receiving the tag.
    pub destination: String,
    created_at: DateTime<Utc>,
    last_attempt: DateTime<Utc>,
    failures: u32,
    delay: Duration,
}

impl ReplicationTask {
    /// Create a fresh task, optionally held back by `delay`.
    #[must_use]
    pub fn new(
        tag: impl Into<String>,
        digest: Digest,
        dependencies: Vec<Digest>,
        destination: impl Into<String>,
        delay: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            tag: tag.into(),
            digest,
            dependencies,
            destination: destination.into(),
            created_at: now,
            last_attempt: now,
            failures: 0,
            delay,
        }
    }
}

impl fmt::Display for ReplicationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "replication task {} -> {}",
            self.tag, self.destination
        )
    }
}

impl Task for ReplicationTask {
    fn key(&self) -> String {
        format!("{}\u{1f}{}", self.tag, self.destination)
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn last_attempt(&self) -> DateTime<Utc> {
        self.last_attempt
    }

    fn failures(&self) -> u32 {
        self.failures
    }

    fn delay(&self) -> Duration {
        self.delay
    }

    fn tags(&self) -> String {
        "tag_replication".to_string()
    }

    fn record_failure(&mut self, at: DateTime<Utc>) {
        self.failures += 1;
        self.last_attempt = at;
    }
}

const INSERT_SQL: &str = r"
    INSERT INTO replication_tasks
        (tag, destination, digest, dependencies, created_at, last_attempt,
         failures, delay_ms, status)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
";

const MARK_PENDING_SQL: &str = r"
    UPDATE replication_tasks SET status = 'pending'
    WHERE tag = ?1 AND destination = ?2
";

const MARK_FAILED_SQL: &str = r"
    UPDATE replication_tasks
    SET status = 'failed', failures = failures + 1, last_attempt = ?3
    WHERE tag = ?1 AND destination = ?2
";

const SELECT_BY_STATUS_SQL: &str = r"
    SELECT tag, destination, digest, dependencies, created_at, last_attempt,
           failures, delay_ms
    FROM replication_tasks
    WHERE status = ?1
";

const SELECT_ALL_SQL: &str = r"
    SELECT tag, destination, digest, dependencies, created_at, last_attempt,
           failures, delay_ms
    FROM replication_tasks
";

const DELETE_SQL: &str = r"
    DELETE FROM replication_tasks WHERE tag = ?1 AND destination = ?2
";

/// SQLite-backed store for tag-replication tasks.
#[derive(Clone)]
pub struct SqliteReplicationStore {
    pool: SqlitePool,
}

impl SqliteReplicationStore {
    /// Wrap an open task database pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Delete every task the predicate rejects.
    ///
    /// Run at startup against the current remote bindings: tasks addressed to
    /// remotes that are no longer configured would otherwise retry forever.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the scan or any delete fails.
    pub async fn delete_where(
        &self,
        invalid: impl Fn(&ReplicationTask) -> bool + Send,
    ) -> Result<usize, StoreError> {
        let mut purged = 0;
        for task in self.select(SELECT_ALL_SQL, None).await? {
            if invalid(&task) {
                self.remove(&task).await?;
                info!(task = %task, "purged replication task for stale destination");
                purged += 1;
            }
        }
        Ok(purged)
    }

    async fn insert(&self, task: &ReplicationTask, status: TaskStatus) -> Result<(), StoreError> {
        let dependencies =
            serde_json::to_string(&task.dependencies).map_err(StoreError::backend)?;
        sqlx::query(INSERT_SQL)
            .bind(&task.tag)
            .bind(&task.destination)
            .bind(task.digest.to_string())
            .bind(dependencies)
            .bind(task.created_at)
            .bind(task.last_attempt)
            .bind(i64::from(task.failures))
            .bind(delay_ms(task.delay))
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_insert_error)?;
        Ok(())
    }

    async fn select(
        &self,
        sql: &'static str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<ReplicationTask>, StoreError> {
        let mut query = sqlx::query(sql);
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let digest: String = row.try_get("digest").map_err(StoreError::backend)?;
            let dependencies: String =
                row.try_get("dependencies").map_err(StoreError::backend)?;
            let failures: i64 = row.try_get("failures").map_err(StoreError::backend)?;
            let delay: i64 = row.try_get("delay_ms").map_err(StoreError::backend)?;
            tasks.push(ReplicationTask {
                tag: row.try_get("tag").map_err(StoreError::backend)?,
                destination: row.try_get("destination").map_err(StoreError::backend)?,
                digest: digest.parse().map_err(StoreError::backend)?,
                dependencies: serde_json::from_str(&dependencies)
                    .map_err(StoreError::backend)?,
                created_at: row.try_get("created_at").map_err(StoreError::backend)?,
                last_attempt: row.try_get("last_attempt").map_err(StoreError::backend)?,
                failures: u32::try_from(failures).unwrap_or(u32::MAX),
                delay: Duration::from_millis(u64::try_from(delay).unwrap_or(0)),
            });
        }
        Ok(tasks)
    }
}

#[async_trait]
impl TaskStore<ReplicationTask> for SqliteReplicationStore {
    async fn add_pending(&self, task: &ReplicationTask) -> Result<(), StoreError> {
        self.insert(task, TaskStatus::Pending).await
    }

    async fn add_failed(&self, task: &ReplicationTask) -> Result<(), StoreError> {
        self.insert(task, TaskStatus::Failed).await
    }

    async fn mark_pending(&self, task: &ReplicationTask) -> Result<(), StoreError> {
        let result = sqlx::query(MARK_PENDING_SQL)
            .bind(&task.tag)
            .bind(&task.destination)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound);
        }
        Ok(())
    }

    async fn mark_failed(&self, task: &ReplicationTask) -> Result<(), StoreError> {
        let result = sqlx::query(MARK_FAILED_SQL)
            .bind(&task.tag)
            .bind(&task.destination)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound);
        }
        Ok(())
    }

    async fn get_pending(&self) -> Result<Vec<ReplicationTask>, StoreError> {
        self.select(SELECT_BY_STATUS_SQL, Some(TaskStatus::Pending)).await
    }

    async fn get_failed(&self) -> Result<Vec<ReplicationTask>, StoreError> {
        self.select(SELECT_BY_STATUS_SQL, Some(TaskStatus::Failed)).await
    }

    async fn remove(&self, task: &ReplicationTask) -> Result<(), StoreError> {
        sqlx::query(DELETE_SQL)
            .bind(&task.tag)
            .bind(&task.destination)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }
}
