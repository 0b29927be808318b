//! Task database setup.

use std::path::Path;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use crate::error::{DataError, DataResult};

/// Open the task database, applying pending migrations.
///
/// The pool is capped at a single connection: SQLite allows one writer at a
/// time, and funnelling every statement through one connection avoids the
/// "database is locked" class of errors under concurrent submitters.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or migrations fail.
pub async fn connect(path: impl AsRef<Path>) -> DataResult<SqlitePool> {
    let path = path.as_ref();
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(10));
    let pool = pool_options()
        .connect_with(options)
        .await
        .map_err(|source| DataError::Connect {
            path: path.to_path_buf(),
            source,
        })?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Open an in-memory task database for tests.
///
/// # Errors
///
/// Returns an error if the connection cannot be established or migrations
/// fail.
pub async fn connect_in_memory() -> DataResult<SqlitePool> {
    let options = SqliteConnectOptions::new().in_memory(true);
    let pool = pool_options()
        .connect_with(options)
        .await
        .map_err(|source| DataError::Connect {
            path: ":memory:".into(),
            source,
        })?;
    migrate(&pool).await?;
    Ok(pool)
}

fn pool_options() -> SqlitePoolOptions {
    // One connection total; an in-memory database also vanishes if its only
    // connection is ever reaped, so idling out is disabled.
    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
}

async fn migrate(pool: &SqlitePool) -> DataResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|source| DataError::Migrate { source })
}
