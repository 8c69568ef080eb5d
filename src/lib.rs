pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod merge;
pub mod models;
pub mod offline;
pub mod queue;
pub mod remote;
pub mod routes;
pub mod state;
pub mod status;
pub mod sync;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderName, HeaderValue};
use sqlx::SqlitePool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::connectivity::Connectivity;
use crate::merge::{QueuedItemsView, placeholder};
use crate::models::ActionType;
use crate::offline::OfflineOperations;
use crate::queue::QueueManager;
use crate::remote::{CapabilityRegistry, ClubApiClient};
use crate::state::{AppState, SharedState};
use crate::status::StatusTracker;
use crate::sync::SyncCoordinator;

pub fn build_state(
    pool: SqlitePool,
    config: Config,
    api: Arc<ClubApiClient>,
    registry: CapabilityRegistry,
    connectivity: Connectivity,
) -> SharedState {
    let queue = QueueManager::new(pool);

    let coordinator = Arc::new(SyncCoordinator::new(
        queue.clone(),
        Arc::new(registry),
        connectivity.clone(),
        config.sync.clone(),
    ));

    let status = Arc::new(StatusTracker::new(queue.clone(), connectivity.clone()));
    let members_view = Arc::new(QueuedItemsView::new(
        queue.clone(),
        ActionType::CreateMember,
        placeholder,
    ));
    let campaigns_view = Arc::new(QueuedItemsView::new(
        queue.clone(),
        ActionType::CreateCampaign,
        placeholder,
    ));

    Arc::new(AppState {
        config,
        queue,
        connectivity,
        operations: OfflineOperations::new(coordinator.clone()),
        coordinator,
        status,
        api,
        members_view,
        campaigns_view,
    })
}

/// Start the sync coordinator, status tracker, queued views and the
/// connectivity probe. Each task exits once `shutdown` flips to true.
pub fn spawn_background(state: &SharedState, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    let coordinator = state.coordinator.clone();
    handles.push(tokio::spawn(coordinator.run(shutdown.clone())));

    let status = state.status.clone();
    let events = state.coordinator.subscribe();
    let poll = state.config.sync.status_poll_interval;
    let rx = shutdown.clone();
    handles.push(tokio::spawn(async move { status.run(events, poll, rx).await }));

    for view in [state.members_view.clone(), state.campaigns_view.clone()] {
        let events = state.coordinator.subscribe();
        let rx = shutdown.clone();
        handles.push(tokio::spawn(async move { view.run(events, rx).await }));
    }

    handles.push(tokio::spawn(connectivity::run_probe(
        state.connectivity.clone(),
        state.api.clone(),
        state.config.sync.probe_interval,
        shutdown,
    )));

    handles
}

pub fn build_app(state: SharedState) -> Router {
    Router::new()
        .merge(routes::api_routes())
        .route("/health", axum::routing::get(health))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
