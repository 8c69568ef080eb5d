use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

use super::{ActionType, from_millis};

/// Maps the provisional id handed out at enqueue time to the id the upstream assigned.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReceipt {
    pub queued_id: Uuid,
    pub action_type: ActionType,
    pub resource_id: String,
    pub synced_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for SyncReceipt {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(SyncReceipt {
            queued_id: row.try_get("queued_id")?,
            action_type: row.try_get("action_type")?,
            resource_id: row.try_get("resource_id")?,
            synced_at: from_millis("synced_at", row.try_get("synced_at")?)?,
        })
    }
}
