//! UI-facing sync status: connectivity, queue depth and whether a drain is
//! running, folded into one value on a watch channel.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::connectivity::Connectivity;
use crate::queue::{QueueError, QueueManager};
use crate::sync::SyncEvent;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_online: bool,
    pub queued_count: u64,
    pub is_syncing: bool,
}

/// What a status update needs beyond the event itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEffect {
    None,
    RefreshCount,
}

/// Fold one coordinator event into `status`.
pub fn apply(status: &mut SyncStatus, event: &SyncEvent) -> StatusEffect {
    match event {
        SyncEvent::SyncStart { .. } => {
            status.is_syncing = true;
            StatusEffect::None
        }
        SyncEvent::SyncComplete { queued_count } => {
            status.is_syncing = false;
            status.queued_count = *queued_count;
            StatusEffect::None
        }
        SyncEvent::SyncError { .. } => {
            status.is_syncing = false;
            StatusEffect::RefreshCount
        }
        SyncEvent::ActionSynced { queued_count, .. } => {
            status.queued_count = *queued_count;
            StatusEffect::None
        }
        SyncEvent::ActionFailed { .. } => StatusEffect::RefreshCount,
    }
}

pub struct StatusTracker {
    queue: QueueManager,
    connectivity: Connectivity,
    tx: watch::Sender<SyncStatus>,
}

impl StatusTracker {
    pub fn new(queue: QueueManager, connectivity: Connectivity) -> Self {
        let initial = SyncStatus {
            is_online: connectivity.is_online(),
            ..SyncStatus::default()
        };
        let (tx, _) = watch::channel(initial);
        Self {
            queue,
            connectivity,
            tx,
        }
    }

    pub fn current(&self) -> SyncStatus {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }

    /// Re-read connectivity and the pending count, keeping `is_syncing`.
    pub async fn refresh(&self) -> Result<SyncStatus, QueueError> {
        let queued_count = self.queue.get_pending_actions_count().await?;
        let is_online = self.connectivity.is_online();
        self.update(|status| {
            status.is_online = is_online;
            status.queued_count = queued_count;
        });
        Ok(self.current())
    }

    fn update(&self, f: impl FnOnce(&mut SyncStatus)) {
        self.tx.send_if_modified(|status| {
            let before = *status;
            f(status);
            *status != before
        });
    }

    async fn refresh_logged(&self) {
        if let Err(e) = self.refresh().await {
            tracing::warn!("Failed to refresh sync status: {e}");
        }
    }

    /// Keep the status current until `shutdown` flips.
    pub async fn run(
        &self,
        mut events: broadcast::Receiver<SyncEvent>,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut online = self.connectivity.subscribe();
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let is_online = *online.borrow_and_update();
                    self.update(|status| status.is_online = is_online);
                }
                _ = ticker.tick() => self.refresh_logged().await,
                event = events.recv() => match event {
                    Ok(event) => {
                        let mut effect = StatusEffect::None;
                        self.update(|status| effect = apply(status, &event));
                        if effect == StatusEffect::RefreshCount {
                            self.refresh_logged().await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::debug!("Status tracker missed {missed} sync events");
                        self.refresh_logged().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        tracing::debug!("Status tracker stopped");
    }
}
