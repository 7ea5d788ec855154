use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::SqliteConnection;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use thiserror::Error;

use super::fts::parse_fts_query;
use super::models::{
    ArchiveFilter, ArchiveKind, ArchiveRecord, ArchiveStatus, ArchiveUpdate, CaptureJob,
    CompletedCapture, QueueStats, SearchIndexEntry,
};

/// Store-level failures callers may want to match on.
///
/// Returned inside `anyhow::Error`; use `downcast_ref::<StoreError>()`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("archive {0} already exists")]
    Duplicate(String),
    #[error("archive {0} not found")]
    NotFound(String),
}

/// Current time as RFC 3339 UTC with microseconds.
///
/// Fixed width, so lexical order of stored timestamps is chronological.
#[must_use]
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ========== Archives ==========

/// Create a QUEUED archive record.
///
/// # Errors
///
/// Fails with [`StoreError::Duplicate`] if the id is already taken.
pub async fn create_archive(
    pool: &SqlitePool,
    id: &str,
    url: &str,
    kind: ArchiveKind,
    out_dir: &str,
) -> Result<ArchiveRecord> {
    let mut conn = pool.acquire().await.context("Failed to acquire connection")?;
    insert_archive(&mut conn, id, url, kind, out_dir).await
}

/// Create a QUEUED archive record together with its first capture job.
///
/// Both rows commit or neither does, so a record never sits in QUEUED
/// with nothing queued to process it. Returns the record and the job id.
///
/// # Errors
///
/// Fails with [`StoreError::Duplicate`] if the id is already taken.
pub async fn create_archive_with_job(
    pool: &SqlitePool,
    id: &str,
    url: &str,
    kind: ArchiveKind,
    out_dir: &str,
) -> Result<(ArchiveRecord, i64)> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    let record = insert_archive(&mut tx, id, url, kind, out_dir).await?;
    let job_id = insert_job(&mut tx, id, url, kind).await?;
    tx.commit()
        .await
        .context("Failed to commit archive submission")?;

    Ok((record, job_id))
}

async fn insert_archive(
    conn: &mut SqliteConnection,
    id: &str,
    url: &str,
    kind: ArchiveKind,
    out_dir: &str,
) -> Result<ArchiveRecord> {
    let now = now_timestamp();
    let inserted = sqlx::query_as::<_, ArchiveRecord>(
        r"
        INSERT INTO archives (id, url, kind, status, created_at, updated_at, out_dir)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        ",
    )
    .bind(id)
    .bind(url)
    .bind(kind.as_str())
    .bind(ArchiveStatus::Queued.as_str())
    .bind(&now)
    .bind(&now)
    .bind(out_dir)
    .fetch_one(&mut *conn)
    .await;

    match inserted {
        Ok(record) => Ok(record),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            Err(StoreError::Duplicate(id.to_string()).into())
        }
        Err(e) => Err(e).context("Failed to insert archive"),
    }
}

/// Get an archive by ID.
pub async fn get_archive(pool: &SqlitePool, id: &str) -> Result<Option<ArchiveRecord>> {
    sqlx::query_as("SELECT * FROM archives WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch archive")
}

/// Apply a partial update inside an existing connection or transaction.
///
/// Always refreshes `updated_at`.
async fn apply_update(
    conn: &mut SqliteConnection,
    id: &str,
    update: &ArchiveUpdate,
) -> Result<()> {
    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE archives SET updated_at = ");
    qb.push_bind(now_timestamp());

    if let Some(status) = update.status {
        qb.push(", status = ").push_bind(status.as_str());
    }
    if let Some(error) = &update.error {
        qb.push(", error = ").push_bind(error.clone());
    }
    if let Some(title) = &update.title {
        qb.push(", title = ").push_bind(title.clone());
    }
    if let Some(primary_path) = &update.primary_path {
        qb.push(", primary_path = ").push_bind(primary_path.clone());
    }
    if let Some(text_path) = &update.text_path {
        qb.push(", text_path = ").push_bind(text_path.clone());
    }
    if let Some(meta_json) = &update.meta_json {
        qb.push(", meta_json = ").push_bind(meta_json.clone());
    }
    qb.push(" WHERE id = ").push_bind(id);

    let result = qb
        .build()
        .execute(&mut *conn)
        .await
        .context("Failed to update archive")?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(id.to_string()).into());
    }
    Ok(())
}

/// Apply a partial update to an archive.
///
/// # Errors
///
/// Fails with [`StoreError::NotFound`] if the archive does not exist.
pub async fn update_archive(pool: &SqlitePool, id: &str, update: &ArchiveUpdate) -> Result<()> {
    let mut conn = pool.acquire().await.context("Failed to acquire connection")?;
    apply_update(&mut conn, id, update).await
}

/// Enter a run: status RUNNING, previous error cleared.
pub async fn set_archive_running(pool: &SqlitePool, id: &str) -> Result<()> {
    update_archive(pool, id, &ArchiveUpdate::running()).await
}

/// Record a failed run. The search index is left as it was.
pub async fn set_archive_error(pool: &SqlitePool, id: &str, error: &str) -> Result<()> {
    update_archive(pool, id, &ArchiveUpdate::failed(error)).await
}

/// Finish a run as DONE and replace the search index entry, atomically.
///
/// Readers never see DONE without the matching index entry, or the reverse.
pub async fn set_archive_done(
    pool: &SqlitePool,
    id: &str,
    capture: &CompletedCapture,
) -> Result<()> {
    let update = ArchiveUpdate {
        status: Some(ArchiveStatus::Done),
        error: Some(None),
        title: Some(capture.title.clone()),
        primary_path: Some(Some(capture.primary_path.clone())),
        text_path: Some(capture.text_path.clone()),
        meta_json: Some(capture.meta_json.clone()),
    };

    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    apply_update(&mut tx, id, &update).await?;
    upsert_search_entry(
        &mut tx,
        id,
        capture.title.as_deref(),
        capture.content.as_deref(),
    )
    .await?;
    tx.commit()
        .await
        .context("Failed to commit archive completion")?;

    Ok(())
}

async fn upsert_search_entry(
    conn: &mut SqliteConnection,
    id: &str,
    title: Option<&str>,
    content: Option<&str>,
) -> Result<()> {
    sqlx::query("DELETE FROM archives_fts WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to clear search entry")?;

    sqlx::query("INSERT INTO archives_fts (id, title, content) VALUES (?, ?, ?)")
        .bind(id)
        .bind(title.unwrap_or_default())
        .bind(content.unwrap_or_default())
        .execute(&mut *conn)
        .await
        .context("Failed to insert search entry")?;

    Ok(())
}

/// Get the search index entry for an archive.
pub async fn get_search_entry(pool: &SqlitePool, id: &str) -> Result<Option<SearchIndexEntry>> {
    sqlx::query_as("SELECT id, title, content FROM archives_fts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch search entry")
}

/// List archives, newest created first.
///
/// With a query, only archives whose search entry matches are returned;
/// `after:`/`before:` tokens in the query filter on `created_at`.
pub async fn list_archives(pool: &SqlitePool, filter: &ArchiveFilter) -> Result<Vec<ArchiveRecord>> {
    let parsed = filter
        .query
        .as_deref()
        .map(parse_fts_query)
        .unwrap_or_default();

    // A query that reduces to nothing searchable (e.g. only exclusions)
    // matches nothing rather than everything.
    let query_given = filter.query.as_deref().is_some_and(|q| !q.trim().is_empty());
    if query_given && parsed.is_empty() {
        return Ok(Vec::new());
    }

    let mut qb = QueryBuilder::<Sqlite>::new("SELECT archives.* FROM archives");
    if parsed.has_fts_query() {
        qb.push(" JOIN archives_fts ON archives_fts.id = archives.id");
    }
    qb.push(" WHERE 1 = 1");
    if parsed.has_fts_query() {
        qb.push(" AND archives_fts MATCH ")
            .push_bind(parsed.fts_query.clone());
    }
    if let Some(status) = filter.status {
        qb.push(" AND archives.status = ").push_bind(status.as_str());
    }
    if let Some(after) = parsed.date_after {
        qb.push(" AND archives.created_at >= ")
            .push_bind(after.format("%Y-%m-%d").to_string());
    }
    if let Some(before) = parsed.date_before {
        qb.push(" AND archives.created_at < ")
            .push_bind(before.format("%Y-%m-%d").to_string());
    }
    qb.push(" ORDER BY archives.created_at DESC, archives.rowid DESC LIMIT ")
        .push_bind(filter.limit)
        .push(" OFFSET ")
        .push_bind(filter.offset);

    qb.build_query_as::<ArchiveRecord>()
        .fetch_all(pool)
        .await
        .context("Failed to list archives")
}

/// Delete an archive and its search entry in one transaction.
///
/// Returns whether a record was removed.
pub async fn delete_archive(pool: &SqlitePool, id: &str) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    sqlx::query("DELETE FROM archives_fts WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete search entry")?;

    let result = sqlx::query("DELETE FROM archives WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete archive")?;

    tx.commit().await.context("Failed to commit archive deletion")?;

    Ok(result.rows_affected() > 0)
}

/// Count archives by status.
pub async fn count_archives_by_status(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    sqlx::query_as("SELECT status, COUNT(*) FROM archives GROUP BY status ORDER BY status")
        .fetch_all(pool)
        .await
        .context("Failed to count archives by status")
}

// ========== Capture Queue ==========

/// Append a pending capture job. Returns the job id.
pub async fn insert_capture_job(
    pool: &SqlitePool,
    archive_id: &str,
    url: &str,
    kind: ArchiveKind,
) -> Result<i64> {
    let mut conn = pool.acquire().await.context("Failed to acquire connection")?;
    insert_job(&mut conn, archive_id, url, kind).await
}

async fn insert_job(
    conn: &mut SqliteConnection,
    archive_id: &str,
    url: &str,
    kind: ArchiveKind,
) -> Result<i64> {
    let result = sqlx::query(
        r"
        INSERT INTO capture_jobs (archive_id, url, kind, state, enqueued_at)
        VALUES (?, ?, ?, 'pending', ?)
        ",
    )
    .bind(archive_id)
    .bind(url)
    .bind(kind.as_str())
    .bind(now_timestamp())
    .execute(&mut *conn)
    .await
    .context("Failed to insert capture job")?;

    Ok(result.last_insert_rowid())
}

/// Claim the oldest pending job.
///
/// The single UPDATE is atomic, so a job is handed to at most one caller.
pub async fn claim_next_capture_job(pool: &SqlitePool) -> Result<Option<CaptureJob>> {
    sqlx::query_as(
        r"
        UPDATE capture_jobs
        SET state = 'claimed',
            attempts = attempts + 1,
            claimed_at = ?
        WHERE id = (
            SELECT id FROM capture_jobs
            WHERE state = 'pending'
            ORDER BY id ASC
            LIMIT 1
        )
        RETURNING *
        ",
    )
    .bind(now_timestamp())
    .fetch_optional(pool)
    .await
    .context("Failed to claim capture job")
}

/// Mark a claimed job as finished.
pub async fn complete_capture_job(pool: &SqlitePool, job_id: i64) -> Result<()> {
    sqlx::query("UPDATE capture_jobs SET state = 'done', finished_at = ? WHERE id = ?")
        .bind(now_timestamp())
        .bind(job_id)
        .execute(pool)
        .await
        .context("Failed to complete capture job")?;

    Ok(())
}

/// Refresh the claim on a job that is still being worked on.
///
/// Returns `false` if the job is no longer claimed.
pub async fn touch_capture_job(pool: &SqlitePool, job_id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE capture_jobs SET claimed_at = ? WHERE id = ? AND state = 'claimed'",
    )
    .bind(now_timestamp())
    .bind(job_id)
    .execute(pool)
    .await
    .context("Failed to refresh capture job claim")?;

    Ok(result.rows_affected() > 0)
}

/// Record a job failure.
///
/// The job goes back to pending while `attempts < max_attempts`, otherwise
/// it is parked as failed. Returns the resulting state.
pub async fn fail_capture_job(
    pool: &SqlitePool,
    job_id: i64,
    error: &str,
    max_attempts: u32,
) -> Result<String> {
    let (state,): (String,) = sqlx::query_as(
        r"
        UPDATE capture_jobs
        SET state = CASE WHEN attempts < ?1 THEN 'pending' ELSE 'failed' END,
            finished_at = CASE WHEN attempts < ?1 THEN NULL ELSE ?2 END,
            claimed_at = NULL,
            last_error = ?3
        WHERE id = ?4
        RETURNING state
        ",
    )
    .bind(i64::from(max_attempts))
    .bind(now_timestamp())
    .bind(error)
    .bind(job_id)
    .fetch_one(pool)
    .await
    .context("Failed to record capture job failure")?;

    Ok(state)
}

/// Return claimed jobs whose claim is older than `cutoff` to pending.
pub async fn requeue_expired_capture_jobs(pool: &SqlitePool, cutoff: &str) -> Result<u64> {
    let result = sqlx::query(
        r"
        UPDATE capture_jobs
        SET state = 'pending', claimed_at = NULL
        WHERE state = 'claimed' AND claimed_at < ?
        ",
    )
    .bind(cutoff)
    .execute(pool)
    .await
    .context("Failed to requeue expired capture jobs")?;

    Ok(result.rows_affected())
}

/// All jobs ever enqueued for an archive, oldest first.
pub async fn get_capture_jobs_for_archive(
    pool: &SqlitePool,
    archive_id: &str,
) -> Result<Vec<CaptureJob>> {
    sqlx::query_as("SELECT * FROM capture_jobs WHERE archive_id = ? ORDER BY id ASC")
        .bind(archive_id)
        .fetch_all(pool)
        .await
        .context("Failed to fetch capture jobs")
}

/// Queue depth by state.
pub async fn get_capture_queue_stats(pool: &SqlitePool) -> Result<QueueStats> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT state, COUNT(*) FROM capture_jobs GROUP BY state")
            .fetch_all(pool)
            .await
            .context("Failed to fetch queue stats")?;

    let mut stats = QueueStats::default();
    for (state, count) in rows {
        match state.as_str() {
            "pending" => stats.pending = count,
            "claimed" => stats.claimed = count,
            "done" => stats.done = count,
            "failed" => stats.failed = count,
            _ => {}
        }
    }
    Ok(stats)
}
