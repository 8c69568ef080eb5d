use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{ActionStatus, ActionType, QueuedAction};

/// Secondary indexes over `queued_actions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueIndex {
    Status(ActionStatus),
    Type(ActionType),
}

/// Insert or overwrite an action. `created_at` is kept from the first write.
pub async fn put(pool: &SqlitePool, action: &QueuedAction) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO queued_actions
             (id, action_type, payload, created_at, retry_count, status, last_error, next_attempt_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT (id) DO UPDATE SET
             action_type = excluded.action_type,
             payload = excluded.payload,
             retry_count = MAX(queued_actions.retry_count, excluded.retry_count),
             status = excluded.status,
             last_error = excluded.last_error,
             next_attempt_at = excluded.next_attempt_at",
    )
    .bind(action.id)
    .bind(action.action_type)
    .bind(&action.payload)
    .bind(action.metadata.timestamp.timestamp_millis())
    .bind(i64::from(action.metadata.retry_count))
    .bind(action.metadata.status)
    .bind(action.metadata.last_error.as_deref())
    .bind(action.metadata.next_attempt_at.map(|at| at.timestamp_millis()))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<Option<QueuedAction>, sqlx::Error> {
    sqlx::query_as::<_, QueuedAction>("SELECT * FROM queued_actions WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Full scan, or an index lookup when `index` is given. Always in FIFO order.
pub async fn get_all(
    pool: &SqlitePool,
    index: Option<QueueIndex>,
) -> Result<Vec<QueuedAction>, sqlx::Error> {
    match index {
        None => {
            sqlx::query_as::<_, QueuedAction>(
                "SELECT * FROM queued_actions ORDER BY created_at ASC, id ASC",
            )
            .fetch_all(pool)
            .await
        }
        Some(QueueIndex::Status(status)) => {
            sqlx::query_as::<_, QueuedAction>(
                "SELECT * FROM queued_actions WHERE status = ?1
                 ORDER BY created_at ASC, id ASC",
            )
            .bind(status)
            .fetch_all(pool)
            .await
        }
        Some(QueueIndex::Type(action_type)) => {
            sqlx::query_as::<_, QueuedAction>(
                "SELECT * FROM queued_actions WHERE action_type = ?1
                 ORDER BY created_at ASC, id ASC",
            )
            .bind(action_type)
            .fetch_all(pool)
            .await
        }
    }
}

/// Returns true if a row was removed.
pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM queued_actions WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_by_status(pool: &SqlitePool, status: ActionStatus) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM queued_actions WHERE status = ?1")
        .bind(status)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn count_by_status(pool: &SqlitePool, status: ActionStatus) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queued_actions WHERE status = ?1")
        .bind(status)
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

/// Set the status in place. Entering `syncing` bumps `retry_count`; any
/// scheduled retry time is cleared.
pub async fn update_status(
    pool: &SqlitePool,
    id: Uuid,
    status: ActionStatus,
    error: Option<&str>,
) -> Result<Option<QueuedAction>, sqlx::Error> {
    let increment: i64 = if status == ActionStatus::Syncing { 1 } else { 0 };

    sqlx::query_as::<_, QueuedAction>(
        "UPDATE queued_actions
         SET status = ?2,
             retry_count = retry_count + ?3,
             last_error = COALESCE(?4, last_error),
             next_attempt_at = NULL
         WHERE id = ?1
         RETURNING *",
    )
    .bind(id)
    .bind(status)
    .bind(increment)
    .bind(error)
    .fetch_optional(pool)
    .await
}

/// Put an action back to `pending` with a backoff deadline.
pub async fn schedule_retry(
    pool: &SqlitePool,
    id: Uuid,
    error: &str,
    next_attempt_at: DateTime<Utc>,
) -> Result<Option<QueuedAction>, sqlx::Error> {
    sqlx::query_as::<_, QueuedAction>(
        "UPDATE queued_actions
         SET status = 'pending', last_error = ?2, next_attempt_at = ?3
         WHERE id = ?1
         RETURNING *",
    )
    .bind(id)
    .bind(error)
    .bind(next_attempt_at.timestamp_millis())
    .fetch_optional(pool)
    .await
}

/// Pending actions whose backoff (if any) has elapsed, in FIFO order.
pub async fn list_due(
    pool: &SqlitePool,
    now: DateTime<Utc>,
) -> Result<Vec<QueuedAction>, sqlx::Error> {
    sqlx::query_as::<_, QueuedAction>(
        "SELECT * FROM queued_actions
         WHERE status = 'pending'
           AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
         ORDER BY created_at ASC, id ASC",
    )
    .bind(now.timestamp_millis())
    .fetch_all(pool)
    .await
}

/// Earliest backoff deadline still ahead of `now` among pending actions.
pub async fn next_attempt_at(
    pool: &SqlitePool,
    now: DateTime<Utc>,
) -> Result<Option<i64>, sqlx::Error> {
    let row: (Option<i64>,) = sqlx::query_as(
        "SELECT MIN(next_attempt_at) FROM queued_actions
         WHERE status = 'pending' AND next_attempt_at > ?1",
    )
    .bind(now.timestamp_millis())
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// Return every `syncing` action to `pending`.
pub async fn reset_syncing(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE queued_actions SET status = 'pending', next_attempt_at = NULL
         WHERE status = 'syncing'",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
