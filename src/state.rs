use std::sync::Arc;

use serde_json::Value;

use crate::config::Config;
use crate::connectivity::Connectivity;
use crate::merge::QueuedItemsView;
use crate::offline::OfflineOperations;
use crate::queue::QueueManager;
use crate::remote::ClubApiClient;
use crate::status::StatusTracker;
use crate::sync::SyncCoordinator;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Config,
    pub queue: QueueManager,
    pub connectivity: Connectivity,
    pub coordinator: Arc<SyncCoordinator>,
    pub operations: OfflineOperations,
    pub status: Arc<StatusTracker>,
    pub api: Arc<ClubApiClient>,
    pub members_view: Arc<QueuedItemsView<Value>>,
    pub campaigns_view: Arc<QueuedItemsView<Value>>,
}
