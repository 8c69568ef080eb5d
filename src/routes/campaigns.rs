use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde_json::Value;

use super::{ListParams, merged_list, outcome_response};
use crate::error::AppError;
use crate::merge::MergedPage;
use crate::offline::OperationOutcome;
use crate::state::SharedState;

pub async fn list(
    State(state): State<SharedState>,
    Query(params): Query<ListParams>,
) -> Result<Json<MergedPage<Value>>, AppError> {
    merged_list(&state, &state.campaigns_view, "campaigns", params).await
}

pub async fn create(
    State(state): State<SharedState>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<OperationOutcome>), AppError> {
    if !payload.is_object() {
        return Err(AppError::BadRequest("Campaign payload must be an object".to_string()));
    }
    if let Some(flag) = payload.get("sendImmediately") {
        if !flag.is_boolean() {
            return Err(AppError::BadRequest("sendImmediately must be a boolean".to_string()));
        }
    }

    let outcome = state.operations.create_campaign(payload).await?;
    Ok(outcome_response(outcome))
}

pub async fn send(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<OperationOutcome>), AppError> {
    if id.trim().is_empty() {
        return Err(AppError::BadRequest("Campaign id is required".to_string()));
    }

    let outcome = state.operations.send_campaign(&id).await?;
    Ok(outcome_response(outcome))
}
