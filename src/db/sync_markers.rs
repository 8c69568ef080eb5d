use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::from_millis;

pub async fn insert(pool: &SqlitePool, action_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR REPLACE INTO sync_markers (action_id, started_at) VALUES (?1, ?2)")
        .bind(action_id)
        .bind(Utc::now().timestamp_millis())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete(pool: &SqlitePool, action_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sync_markers WHERE action_id = ?1")
        .bind(action_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<(Uuid, DateTime<Utc>)>, sqlx::Error> {
    let rows: Vec<(Uuid, i64)> =
        sqlx::query_as("SELECT action_id, started_at FROM sync_markers ORDER BY started_at ASC")
            .fetch_all(pool)
            .await?;

    rows.into_iter()
        .map(|(id, started_at)| Ok((id, from_millis("started_at", started_at)?)))
        .collect()
}

pub async fn clear(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM sync_markers").execute(pool).await?;
    Ok(result.rows_affected())
}
