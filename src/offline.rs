//! Offline-aware mutations: call straight through when online, queue when not.

use std::sync::Arc;

use serde::Serialize;
use serde::ser::SerializeStruct;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::models::ActionType;
use crate::queue::QueueError;
use crate::remote::{DispatchContext, RemoteError, RemoteOutcome};
use crate::sync::SyncCoordinator;

/// Result of a mutation. `Queued` is provisional until the action syncs.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    Completed { data: Value },
    Queued { id: Uuid },
}

impl OperationOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, OperationOutcome::Queued { .. })
    }
}

impl Serialize for OperationOutcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("OperationOutcome", 2)?;
        match self {
            OperationOutcome::Completed { data } => {
                s.serialize_field("data", data)?;
                s.serialize_field("queued", &false)?;
            }
            OperationOutcome::Queued { id } => {
                s.serialize_field("id", id)?;
                s.serialize_field("queued", &true)?;
            }
        }
        s.end()
    }
}

#[derive(Debug)]
pub enum OperationError {
    Remote(RemoteError),
    Queue(QueueError),
}

impl std::fmt::Display for OperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationError::Remote(err) => write!(f, "Upstream call failed: {err}"),
            OperationError::Queue(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for OperationError {}

impl From<RemoteError> for OperationError {
    fn from(err: RemoteError) -> Self {
        OperationError::Remote(err)
    }
}

impl From<QueueError> for OperationError {
    fn from(err: QueueError) -> Self {
        OperationError::Queue(err)
    }
}

#[derive(Clone)]
pub struct OfflineOperations {
    coordinator: Arc<SyncCoordinator>,
}

impl OfflineOperations {
    pub fn new(coordinator: Arc<SyncCoordinator>) -> Self {
        Self { coordinator }
    }

    pub async fn execute(
        &self,
        action_type: ActionType,
        payload: Value,
    ) -> Result<OperationOutcome, OperationError> {
        if !self.coordinator.connectivity().is_online() {
            let id = self
                .coordinator
                .queue()
                .enqueue(action_type, payload, None)
                .await?;
            tracing::info!("Offline: queued {action_type} action {id}");
            self.coordinator.kick();
            return Ok(OperationOutcome::Queued { id });
        }

        let capability = self
            .coordinator
            .registry()
            .get(action_type)
            .ok_or_else(|| RemoteError::unsupported(action_type))?;

        let RemoteOutcome {
            data, follow_ups, ..
        } = capability
            .execute(&DispatchContext::default(), &payload)
            .await?;

        if !follow_ups.is_empty() {
            for follow_up in follow_ups {
                let id = self
                    .coordinator
                    .queue()
                    .enqueue(follow_up.action_type, follow_up.payload, None)
                    .await?;
                tracing::info!("Queued follow-up {} action {id}", follow_up.action_type);
            }
            self.coordinator.kick();
        }

        Ok(OperationOutcome::Completed { data })
    }

    pub async fn create_member(&self, payload: Value) -> Result<OperationOutcome, OperationError> {
        self.execute(ActionType::CreateMember, payload).await
    }

    pub async fn create_campaign(&self, payload: Value) -> Result<OperationOutcome, OperationError> {
        self.execute(ActionType::CreateCampaign, payload).await
    }

    pub async fn send_campaign(&self, campaign_id: &str) -> Result<OperationOutcome, OperationError> {
        self.execute(ActionType::SendCampaign, json!({ "campaignId": campaign_id }))
            .await
    }
}
