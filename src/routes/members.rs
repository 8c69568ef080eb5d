use axum::Json;
use axum::extract::{Query, State};
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
    merged_list(&state, &state.members_view, "members", params).await
}

pub async fn create(
    State(state): State<SharedState>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<OperationOutcome>), AppError> {
    if !payload.is_object() {
        return Err(AppError::BadRequest("Member payload must be an object".to_string()));
    }

    let outcome = state.operations.create_member(payload).await?;
    Ok(outcome_response(outcome))
}
