mod fts;
mod migrations;
mod models;
mod queries;

pub use fts::*;
pub use models::*;
pub use queries::*;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::{debug, info};

/// Pool size shared by the API handlers and capture workers.
const MAX_CONNECTIONS: u32 = 5;
/// How long a writer waits for SQLite's single write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to the archive store. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the store at `path` and bring its schema up to date.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened, a migration fails, or the file
    /// turns out to be read-only.
    pub async fn new(path: &Path) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(connect_options(path))
            .await
            .with_context(|| format!("Failed to open archive store at {}", path.display()))?;

        migrations::run(&pool).await?;
        check_writable(&pool)
            .await
            .with_context(|| format!("Archive store at {} is read-only", path.display()))?;

        info!(path = %path.display(), "Archive store ready");
        Ok(Self { pool })
    }

    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn connect_options(path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT)
}

/// Issue a real write so a read-only mount fails at startup rather than mid-capture.
async fn check_writable(pool: &SqlitePool) -> Result<()> {
    let touched = sqlx::query("UPDATE _schema_version SET version = version")
        .execute(pool)
        .await?
        .rows_affected();
    debug!(rows = touched, "Store write check passed");
    Ok(())
}
