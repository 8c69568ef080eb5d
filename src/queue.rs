//! Queue manager: the API the rest of the agent uses to read and mutate the
//! durable action queue.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db;
use crate::db::queued_actions::QueueIndex;
use crate::models::{
    ActionStatus, ActionType, QueueMetadata, QueuedAction, SyncReceipt, from_millis,
};

#[derive(Debug)]
pub enum QueueError {
    NotFound(Uuid),
    Database(sqlx::Error),
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::NotFound(id) => write!(f, "Queued action {id} not found"),
            QueueError::Database(err) => write!(f, "Queue storage error: {err}"),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::Database(err)
    }
}

/// Optional replacements for the metadata `enqueue` would otherwise generate.
#[derive(Debug, Clone, Default)]
pub struct MetadataOverrides {
    pub timestamp: Option<DateTime<Utc>>,
    pub retry_count: Option<u32>,
    pub status: Option<ActionStatus>,
    pub last_error: Option<String>,
}

#[derive(Clone)]
pub struct QueueManager {
    pool: SqlitePool,
}

impl QueueManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a new `pending` action and return its id. The row is durable
    /// once this resolves.
    pub async fn enqueue(
        &self,
        action_type: ActionType,
        payload: serde_json::Value,
        overrides: Option<MetadataOverrides>,
    ) -> Result<Uuid, QueueError> {
        let overrides = overrides.unwrap_or_default();
        let action = QueuedAction {
            id: Uuid::now_v7(),
            action_type,
            payload,
            metadata: QueueMetadata {
                timestamp: overrides.timestamp.unwrap_or_else(Utc::now),
                retry_count: overrides.retry_count.unwrap_or(0),
                status: overrides.status.unwrap_or(ActionStatus::Pending),
                last_error: overrides.last_error,
                next_attempt_at: None,
            },
        };

        db::queued_actions::put(&self.pool, &action).await?;
        tracing::debug!("Queued {} action {}", action.action_type, action.id);

        Ok(action.id)
    }

    pub async fn get_queued_action(&self, id: Uuid) -> Result<Option<QueuedAction>, QueueError> {
        Ok(db::queued_actions::get(&self.pool, id).await?)
    }

    pub async fn get_queued_actions(
        &self,
        status: Option<ActionStatus>,
    ) -> Result<Vec<QueuedAction>, QueueError> {
        let index = status.map(QueueIndex::Status);
        Ok(db::queued_actions::get_all(&self.pool, index).await?)
    }

    pub async fn get_queued_actions_by_type(
        &self,
        action_type: ActionType,
    ) -> Result<Vec<QueuedAction>, QueueError> {
        Ok(db::queued_actions::get_all(&self.pool, Some(QueueIndex::Type(action_type))).await?)
    }

    /// Move an action to `status`. Entering `syncing` increments the retry
    /// count; `error` is only recorded for `failed` and `pending`.
    pub async fn update_queued_action_status(
        &self,
        id: Uuid,
        status: ActionStatus,
        error: Option<&str>,
    ) -> Result<QueuedAction, QueueError> {
        let error = match status {
            ActionStatus::Failed | ActionStatus::Pending => error,
            ActionStatus::Syncing | ActionStatus::Synced => None,
        };

        db::queued_actions::update_status(&self.pool, id, status, error)
            .await?
            .ok_or(QueueError::NotFound(id))
    }

    /// Return an action to `pending`, recording the error and the earliest
    /// time it may be attempted again.
    pub async fn schedule_retry(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<QueuedAction, QueueError> {
        db::queued_actions::schedule_retry(&self.pool, id, error, next_attempt_at)
            .await?
            .ok_or(QueueError::NotFound(id))
    }

    /// Returns true if the action existed.
    pub async fn remove_queued_action(&self, id: Uuid) -> Result<bool, QueueError> {
        let removed = db::queued_actions::delete(&self.pool, id).await?;
        db::sync_markers::delete(&self.pool, id).await?;
        Ok(removed)
    }

    pub async fn get_pending_actions_count(&self) -> Result<u64, QueueError> {
        let count = db::queued_actions::count_by_status(&self.pool, ActionStatus::Pending).await?;
        Ok(count.max(0) as u64)
    }

    pub async fn clear_synced_actions(&self) -> Result<u64, QueueError> {
        let cleared = db::queued_actions::delete_by_status(&self.pool, ActionStatus::Synced).await?;
        if cleared > 0 {
            tracing::info!("Cleared {cleared} synced actions");
        }
        Ok(cleared)
    }

    /// Pending actions that may be attempted at `now`, oldest first.
    pub async fn due_actions(&self, now: DateTime<Utc>) -> Result<Vec<QueuedAction>, QueueError> {
        Ok(db::queued_actions::list_due(&self.pool, now).await?)
    }

    /// Earliest future backoff deadline, if any action is waiting on one.
    pub async fn next_retry_at(&self) -> Result<Option<DateTime<Utc>>, QueueError> {
        match db::queued_actions::next_attempt_at(&self.pool, Utc::now()).await? {
            Some(ms) => Ok(Some(from_millis("next_attempt_at", ms)?)),
            None => Ok(None),
        }
    }

    pub async fn mark_in_flight(&self, id: Uuid) -> Result<(), QueueError> {
        Ok(db::sync_markers::insert(&self.pool, id).await?)
    }

    pub async fn clear_in_flight(&self, id: Uuid) -> Result<(), QueueError> {
        Ok(db::sync_markers::delete(&self.pool, id).await?)
    }

    /// Recover from a drain that died mid-flight: anything still `syncing`
    /// goes back to `pending` and the in-flight markers are dropped.
    pub async fn recover_interrupted(&self) -> Result<u64, QueueError> {
        for (id, started_at) in db::sync_markers::list(&self.pool).await? {
            tracing::warn!("Action {id} was interrupted mid-sync (started {started_at})");
        }

        let recovered = db::queued_actions::reset_syncing(&self.pool).await?;
        db::sync_markers::clear(&self.pool).await?;

        if recovered > 0 {
            tracing::info!("Recovered {recovered} interrupted actions");
        }
        Ok(recovered)
    }

    pub async fn record_receipt(
        &self,
        queued_id: Uuid,
        action_type: ActionType,
        resource_id: &str,
    ) -> Result<SyncReceipt, QueueError> {
        Ok(db::receipts::create(&self.pool, queued_id, action_type, resource_id).await?)
    }

    pub async fn find_receipt(&self, queued_id: Uuid) -> Result<Option<SyncReceipt>, QueueError> {
        Ok(db::receipts::find(&self.pool, queued_id).await?)
    }
}
