use serde::Serialize;
use uuid::Uuid;

use crate::models::ActionType;

/// In-process notifications emitted by the sync coordinator. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SyncEvent {
    SyncStart {
        queued_count: u64,
    },
    SyncComplete {
        queued_count: u64,
    },
    SyncError {
        error: String,
    },
    /// Progress signal: the action has been handed to its capability.
    ActionSynced {
        action_id: Uuid,
        action_type: ActionType,
        queued_count: u64,
    },
    ActionFailed {
        action_id: Uuid,
        action_type: ActionType,
        error: String,
    },
}

impl SyncEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::SyncStart { .. } => "sync-start",
            SyncEvent::SyncComplete { .. } => "sync-complete",
            SyncEvent::SyncError { .. } => "sync-error",
            SyncEvent::ActionSynced { .. } => "action-synced",
            SyncEvent::ActionFailed { .. } => "action-failed",
        }
    }

    pub fn action_type(&self) -> Option<ActionType> {
        match self {
            SyncEvent::ActionSynced { action_type, .. }
            | SyncEvent::ActionFailed { action_type, .. } => Some(*action_type),
            _ => None,
        }
    }
}
