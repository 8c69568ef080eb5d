use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{ActionStatus, ActionType, QueuedAction, SyncReceipt};
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct QueueFilter {
    pub status: Option<ActionStatus>,
    #[serde(rename = "type")]
    pub action_type: Option<ActionType>,
}

pub async fn list(
    State(state): State<SharedState>,
    Query(filter): Query<QueueFilter>,
) -> Result<Json<Vec<QueuedAction>>, AppError> {
    let actions = match (filter.status, filter.action_type) {
        (status, None) => state.queue.get_queued_actions(status).await?,
        (None, Some(action_type)) => state.queue.get_queued_actions_by_type(action_type).await?,
        (Some(status), Some(action_type)) => state
            .queue
            .get_queued_actions(Some(status))
            .await?
            .into_iter()
            .filter(|a| a.action_type == action_type)
            .collect(),
    };
    Ok(Json(actions))
}

pub async fn count(State(state): State<SharedState>) -> Result<Json<Value>, AppError> {
    let pending = state.queue.get_pending_actions_count().await?;
    Ok(Json(json!({ "pending": pending })))
}

pub async fn get(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<QueuedAction>, AppError> {
    let action = state
        .queue
        .get_queued_action(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Queued action not found".to_string()))?;
    Ok(Json(action))
}

/// Discard a queued action. Actions mid-sync cannot be removed.
pub async fn delete(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let action = state
        .queue
        .get_queued_action(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Queued action not found".to_string()))?;

    if action.metadata.status == ActionStatus::Syncing {
        return Err(AppError::BadRequest(
            "Action is currently syncing".to_string(),
        ));
    }

    state.queue.remove_queued_action(id).await?;
    tracing::info!("Discarded {} action {id}", action.action_type);

    Ok(Json(json!({ "deleted": true })))
}

pub async fn receipt(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SyncReceipt>, AppError> {
    let receipt = state
        .queue
        .find_receipt(id)
        .await?
        .ok_or_else(|| AppError::NotFound("No receipt for this action".to_string()))?;
    Ok(Json(receipt))
}

pub async fn gc(State(state): State<SharedState>) -> Result<Json<Value>, AppError> {
    let cleared = state.queue.clear_synced_actions().await?;
    Ok(Json(json!({ "cleared": cleared })))
}
