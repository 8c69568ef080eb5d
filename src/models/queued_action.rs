use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

use super::from_millis;

/// The closed set of mutations that can be queued while offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum ActionType {
    CreateMember,
    CreateCampaign,
    SendCampaign,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::CreateMember => "create-member",
            ActionType::CreateCampaign => "create-campaign",
            ActionType::SendCampaign => "send-campaign",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Syncing => "syncing",
            ActionStatus::Synced => "synced",
            ActionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetadata {
    /// Creation time. Never changes and defines replay order.
    pub timestamp: DateTime<Utc>,
    /// Number of times the action has entered `syncing`.
    pub retry_count: u32,
    pub status: ActionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Earliest time a backed-off action may be attempted again.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub payload: serde_json::Value,
    pub metadata: QueueMetadata,
}

impl<'r> FromRow<'r, SqliteRow> for QueuedAction {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let retry_count: i64 = row.try_get("retry_count")?;
        let next_attempt_at: Option<i64> = row.try_get("next_attempt_at")?;

        Ok(QueuedAction {
            id: row.try_get("id")?,
            action_type: row.try_get("action_type")?,
            payload: row.try_get("payload")?,
            metadata: QueueMetadata {
                timestamp: from_millis("created_at", row.try_get("created_at")?)?,
                retry_count: u32::try_from(retry_count).map_err(|e| sqlx::Error::ColumnDecode {
                    index: "retry_count".to_string(),
                    source: Box::new(e),
                })?,
                status: row.try_get("status")?,
                last_error: row.try_get("last_error")?,
                next_attempt_at: next_attempt_at
                    .map(|ms| from_millis("next_attempt_at", ms))
                    .transpose()?,
            },
        })
    }
}
