pub mod campaigns;
pub mod client;
pub mod members;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::models::ActionType;

pub use client::{ClubApiClient, ServerPage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// The request never produced a response.
    Network,
    /// Upstream reported the resource already exists (HTTP 409).
    Conflict,
    /// Upstream rejected the payload (HTTP 400/422).
    Validation,
    Server,
    /// No capability is registered for the action type.
    Unsupported,
}

#[derive(Debug, Clone)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Network, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Conflict, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Validation, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Server, message)
    }

    pub fn unsupported(action_type: ActionType) -> Self {
        Self::new(
            RemoteErrorKind::Unsupported,
            format!("No capability registered for {action_type}"),
        )
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::network(format!("Upstream request failed: {err}"))
    }
}

/// Per-call context handed to a capability.
#[derive(Debug, Clone, Default)]
pub struct DispatchContext {
    /// Set when replaying a queued action; forwarded so the upstream can dedupe.
    pub idempotency_key: Option<Uuid>,
}

impl DispatchContext {
    pub fn replay(queued_id: Uuid) -> Self {
        Self {
            idempotency_key: Some(queued_id),
        }
    }
}

/// A secondary operation to queue independently of the action that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct FollowUp {
    pub action_type: ActionType,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct RemoteOutcome {
    pub data: Value,
    /// Upstream id of the created or affected resource, when it returned one.
    pub resource_id: Option<String>,
    pub follow_ups: Vec<FollowUp>,
}

impl RemoteOutcome {
    pub fn new(data: Value) -> Self {
        let resource_id = data.get("id").and_then(resource_id_of);
        Self {
            data,
            resource_id,
            follow_ups: Vec::new(),
        }
    }

    pub fn with_follow_up(mut self, action_type: ActionType, payload: Value) -> Self {
        self.follow_ups.push(FollowUp {
            action_type,
            payload,
        });
        self
    }
}

/// Upstream ids arrive as strings or integers depending on the resource.
pub fn resource_id_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
pub trait RemoteCapability: Send + Sync {
    fn action_type(&self) -> ActionType;
    fn name(&self) -> &str;
    async fn execute(
        &self,
        ctx: &DispatchContext,
        payload: &Value,
    ) -> Result<RemoteOutcome, RemoteError>;
}

/// Action type -> handler. New mutation kinds register here; the sync
/// coordinator never branches on type.
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<ActionType, Arc<dyn RemoteCapability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            capabilities: HashMap::new(),
        }
    }

    /// Registry wired to the upstream club API for every known action type.
    pub fn standard(client: Arc<ClubApiClient>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(members::CreateMember::new(client.clone())));
        registry.register(Arc::new(campaigns::CreateCampaign::new(client.clone())));
        registry.register(Arc::new(campaigns::SendCampaign::new(client)));
        registry
    }

    pub fn register(&mut self, capability: Arc<dyn RemoteCapability>) {
        self.capabilities.insert(capability.action_type(), capability);
    }

    pub fn get(&self, action_type: ActionType) -> Option<&Arc<dyn RemoteCapability>> {
        self.capabilities.get(&action_type)
    }

    pub fn list(&self) -> Vec<&Arc<dyn RemoteCapability>> {
        self.capabilities.values().collect()
    }
}
