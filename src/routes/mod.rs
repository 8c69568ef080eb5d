pub mod campaigns;
pub mod members;
pub mod queue;
pub mod sync;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;
use crate::merge::{MergedPage, QueuedItemsView, merge_server_page};
use crate::offline::OperationOutcome;
use crate::remote::ServerPage;
use crate::state::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        // Sync
        .route("/api/v1/sync/status", get(sync::status))
        .route("/api/v1/sync/events", get(sync::events))
        .route("/api/v1/sync/drain", post(sync::drain))
        .route("/api/v1/sync/abort", post(sync::abort))
        .route("/api/v1/sync/refresh", post(sync::refresh))
        .route("/api/v1/connectivity", put(sync::set_connectivity))
        .route("/api/v1/capabilities", get(sync::capabilities))
        // Queue
        .route("/api/v1/queue", get(queue::list))
        .route("/api/v1/queue/count", get(queue::count))
        .route("/api/v1/queue/gc", post(queue::gc))
        .route("/api/v1/queue/{id}", get(queue::get).delete(queue::delete))
        .route("/api/v1/queue/{id}/receipt", get(queue::receipt))
        // Members
        .route("/api/v1/members", get(members::list).post(members::create))
        // Campaigns
        .route("/api/v1/campaigns", get(campaigns::list).post(campaigns::create))
        .route("/api/v1/campaigns/{id}/send", post(campaigns::send))
}

#[derive(Deserialize)]
pub struct ListParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Queued items for `view` merged with one page of the upstream collection.
/// While offline, or when the upstream list call fails, the upstream page is
/// left empty.
async fn merged_list(
    state: &SharedState,
    view: &QueuedItemsView<Value>,
    collection: &str,
    params: ListParams,
) -> Result<Json<MergedPage<Value>>, AppError> {
    let page = params.page.unwrap_or(1).max(1);
    let per_page = params.per_page.unwrap_or(20).clamp(1, 100);

    let queued = view.reload().await?;

    let server = if state.connectivity.is_online() {
        match state.api.list(collection, page, per_page).await {
            Ok(server) => server,
            Err(e) => {
                tracing::warn!("Listing {collection} upstream failed, showing queued items only: {e}");
                ServerPage::default()
            }
        }
    } else {
        ServerPage::default()
    };

    Ok(Json(merge_server_page(queued, server, page)))
}

/// 202 for a queued mutation, 200 when it reached the upstream.
fn outcome_response(outcome: OperationOutcome) -> (StatusCode, Json<OperationOutcome>) {
    let status = if outcome.is_queued() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    (status, Json(outcome))
}
