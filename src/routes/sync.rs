use std::convert::Infallible;

use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::Stream;
use futures_util::stream;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;

use crate::error::AppError;
use crate::status::SyncStatus;
use crate::state::SharedState;
use crate::sync::DrainOutcome;

#[derive(Deserialize)]
pub struct ConnectivityRequest {
    /// `true`/`false` pins the state; `null` hands control back to the probe.
    pub online: Option<bool>,
}

pub async fn status(State(state): State<SharedState>) -> Result<Json<SyncStatus>, AppError> {
    let status = state.status.refresh().await?;
    Ok(Json(status))
}

/// Server-sent stream of coordinator events, one SSE event per sync event.
pub async fn events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.coordinator.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => match Event::default().event(event.name()).json_data(&event) {
                    Ok(sse) => return Some((Ok(sse), rx)),
                    Err(e) => tracing::warn!("Failed to encode sync event: {e}"),
                },
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!("Event stream subscriber lagged by {missed} events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn drain(State(state): State<SharedState>) -> Result<Json<DrainOutcome>, AppError> {
    let outcome = state.coordinator.drain().await?;
    Ok(Json(outcome))
}

pub async fn abort(State(state): State<SharedState>) -> Json<Value> {
    let running = state.coordinator.abort();
    Json(json!({ "aborted": running }))
}

pub async fn refresh(State(state): State<SharedState>) -> Result<Json<SyncStatus>, AppError> {
    state.members_view.refresh();
    state.campaigns_view.refresh();
    let status = state.status.refresh().await?;
    Ok(Json(status))
}

/// Action types this agent can replay, and the handler for each.
pub async fn capabilities(State(state): State<SharedState>) -> Json<Value> {
    let mut capabilities: Vec<Value> = state
        .coordinator
        .registry()
        .list()
        .into_iter()
        .map(|c| json!({ "actionType": c.action_type(), "name": c.name() }))
        .collect();
    capabilities.sort_by_key(|c| c["actionType"].as_str().map(str::to_string));
    Json(json!({ "capabilities": capabilities }))
}

pub async fn set_connectivity(
    State(state): State<SharedState>,
    Json(req): Json<ConnectivityRequest>,
) -> Json<Value> {
    state.connectivity.set_override(req.online);

    if req.online.is_none() {
        let reachable = state.api.health().await;
        state.connectivity.report_probe(reachable);
    }

    Json(json!({
        "online": state.connectivity.is_online(),
        "pinned": state.connectivity.is_pinned(),
    }))
}
