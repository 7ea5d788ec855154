use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    if current_version < 2 {
        debug!("Running migration v2");
        run_migration_v2(pool).await?;
        set_schema_version(pool, 2).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("DELETE FROM _schema_version")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v1: archives and search index");

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS archives (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            kind TEXT NOT NULL,
            title TEXT,
            status TEXT NOT NULL,
            error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            out_dir TEXT NOT NULL,
            primary_path TEXT,
            text_path TEXT,
            meta_json TEXT
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create archives table")?;

    // Standalone FTS5 table: rows are written explicitly by the processor so
    // a failed run never touches the entry left by the last success.
    sqlx::query(
        r"
        CREATE VIRTUAL TABLE IF NOT EXISTS archives_fts USING fts5(
            id UNINDEXED,
            title,
            content,
            tokenize='porter'
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create FTS5 table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_archives_status ON archives(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_archives_created_at ON archives(created_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn run_migration_v2(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v2: durable capture queue");

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS capture_jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            archive_id TEXT NOT NULL,
            url TEXT NOT NULL,
            kind TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            enqueued_at TEXT NOT NULL,
            claimed_at TEXT,
            finished_at TEXT
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create capture_jobs table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_capture_jobs_state ON capture_jobs(state, id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_capture_jobs_archive_id ON capture_jobs(archive_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
