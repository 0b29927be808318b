//! Write-back tasks and their SQLite store.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use strata_retry::{StoreError, Task, TaskStatus, TaskStore};

/// Durable order to upload a locally-authored tag to the backend.
///
/// Identity key is `(namespace, name)`: the namespace picks the backend
/// client, the name is the cache file holding the digest to upload.
#[derive(Debug, Clone)]
pub struct WriteBackTask {
    /// Namespace used to resolve the backend client.
    pub namespace: String,
    /// Cache key whose content is uploaded.
    pub name: String,
    created_at: DateTime<Utc>,
    last_attempt: DateTime<Utc>,
    failures: u32,
    delay: Duration,
}

impl WriteBackTask {
    /// Create a fresh task, optionally held back by `delay`.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, delay: Duration) -> Self {
        let now = Utc::now();
        Self {
            namespace: namespace.into(),
            name: name.into(),
            created_at: now,
            last_attempt: now,
            failures: 0,
            delay,
        }
    }
}

impl fmt::Display for WriteBackTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "write-back task {}:{}", self.namespace, self.name)
    }
}

impl Task for WriteBackTask {
    fn key(&self) -> String {
        format!("{}\u{1f}{}", self.namespace, self.name)
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
        "write_back".to_string()
    }

    fn record_failure(&mut self, at: DateTime<Utc>) {
        self.failures += 1;
        self.last_attempt = at;
    }
}

const INSERT_SQL: &str = r"
    INSERT INTO write_back_tasks
        (namespace, name, created_at, last_attempt, failures, delay_ms, status)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
";

const MARK_PENDING_SQL: &str = r"
    UPDATE write_back_tasks SET status = 'pending'
    WHERE namespace = ?1 AND name = ?2
";

const MARK_FAILED_SQL: &str = r"
    UPDATE write_back_tasks
    SET status = 'failed', failures = failures + 1, last_attempt = ?3
    WHERE namespace = ?1 AND name = ?2
";

const SELECT_BY_STATUS_SQL: &str = r"
    SELECT namespace, name, created_at, last_attempt, failures, delay_ms
    FROM write_back_tasks
    WHERE status = ?1
";

const DELETE_SQL: &str = r"
    DELETE FROM write_back_tasks WHERE namespace = ?1 AND name = ?2
";

/// SQLite-backed store for write-back tasks.
#[derive(Clone)]
pub struct SqliteWriteBackStore {
    pool: SqlitePool,
}

impl SqliteWriteBackStore {
    /// Wrap an open task database pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert(&self, task: &WriteBackTask, status: TaskStatus) -> Result<(), StoreError> {
        sqlx::query(INSERT_SQL)
            .bind(&task.namespace)
            .bind(&task.name)
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

    async fn select(&self, status: TaskStatus) -> Result<Vec<WriteBackTask>, StoreError> {
        let rows = sqlx::query(SELECT_BY_STATUS_SQL)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let failures: i64 = row.try_get("failures").map_err(StoreError::backend)?;
            let delay: i64 = row.try_get("delay_ms").map_err(StoreError::backend)?;
            tasks.push(WriteBackTask {
                namespace: row.try_get("namespace").map_err(StoreError::backend)?,
                name: row.try_get("name").map_err(StoreError::backend)?,
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
impl TaskStore<WriteBackTask> for SqliteWriteBackStore {
    async fn add_pending(&self, task: &WriteBackTask) -> Result<(), StoreError> {
        self.insert(task, TaskStatus::Pending).await
    }

    async fn add_failed(&self, task: &WriteBackTask) -> Result<(), StoreError> {
        self.insert(task, TaskStatus::Failed).await
    }

    async fn mark_pending(&self, task: &WriteBackTask) -> Result<(), StoreError> {
        let result = sqlx::query(MARK_PENDING_SQL)
            .bind(&task.namespace)
            .bind(&task.name)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound);
        }
        Ok(())
    }

    async fn mark_failed(&self, task: &WriteBackTask) -> Result<(), StoreError> {
        let result = sqlx::query(MARK_FAILED_SQL)
            .bind(&task.namespace)
            .bind(&task.name)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound);
        }
        Ok(())
    }

    async fn get_pending(&self) -> Result<Vec<WriteBackTask>, StoreError> {
        self.select(TaskStatus::Pending).await
    }

    async fn get_failed(&self) -> Result<Vec<WriteBackTask>, StoreError> {
        self.select(TaskStatus::Failed).await
    }

    async fn remove(&self, task: &WriteBackTask) -> Result<(), StoreError> {
        sqlx::query(DELETE_SQL)
            .bind(&task.namespace)
            .bind(&task.name)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }
}

pub(crate) fn delay_ms(delay: Duration) -> i64 {
    i64::try_from(delay.as_millis()).unwrap_or(i64::MAX)
}

pub(crate) fn map_insert_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::TaskExists;
        }
    }
    StoreError::backend(err)
}
