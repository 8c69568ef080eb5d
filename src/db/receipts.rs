use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{ActionType, SyncReceipt};

pub async fn create(
    pool: &SqlitePool,
    queued_id: Uuid,
    action_type: ActionType,
    resource_id: &str,
) -> Result<SyncReceipt, sqlx::Error> {
    sqlx::query_as::<_, SyncReceipt>(
        "INSERT OR REPLACE INTO sync_receipts (queued_id, action_type, resource_id, synced_at)
         VALUES (?1, ?2, ?3, ?4) RETURNING *",
    )
    .bind(queued_id)
    .bind(action_type)
    .bind(resource_id)
    .bind(Utc::now().timestamp_millis())
    .fetch_one(pool)
    .await
}

pub async fn find(pool: &SqlitePool, queued_id: Uuid) -> Result<Option<SyncReceipt>, sqlx::Error> {
    sqlx::query_as::<_, SyncReceipt>("SELECT * FROM sync_receipts WHERE queued_id = ?1")
        .bind(queued_id)
        .fetch_optional(pool)
        .await
}
