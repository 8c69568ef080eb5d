//! Sync coordinator: replays queued actions against their remote capability
//! once the agent is online.
//!
//! One drain runs at a time. A drain walks the due `pending` actions in
//! creation order and, per action:
//!
//! - moves it to `syncing` and dispatches it to the capability for its type,
//! - on success queues any follow-ups, records a receipt and removes it,
//! - on a duplicate signature after an earlier attempt removes it,
//! - on exhausted retries parks it as `failed`,
//! - otherwise returns it to `pending` with an exponential backoff deadline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Notify, broadcast, watch};

use crate::config::SyncSettings;
use crate::connectivity::Connectivity;
use crate::models::{ActionStatus, QueuedAction};
use crate::queue::{QueueError, QueueManager};
use crate::remote::{CapabilityRegistry, DispatchContext, RemoteError, RemoteOutcome};

use super::classify::DUPLICATE_RESOLVED;
use super::events::SyncEvent;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub attempted: usize,
    pub synced: usize,
    pub duplicates: usize,
    pub deferred: usize,
    pub failed: usize,
    pub follow_ups: usize,
    /// The drain stopped early because of an abort or lost connectivity.
    pub interrupted: bool,
    pub remaining: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum DrainOutcome {
    AlreadyRunning,
    Offline,
    Empty,
    Completed(DrainReport),
}

enum ActionOutcome {
    Synced { follow_ups: usize },
    Duplicate,
    Deferred,
    Failed,
    /// Removed by someone else before it could be attempted.
    Vanished,
}

/// Releases the single-flight flag however the drain exits.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncCoordinator {
    queue: QueueManager,
    registry: Arc<CapabilityRegistry>,
    connectivity: Connectivity,
    settings: SyncSettings,
    events: broadcast::Sender<SyncEvent>,
    draining: AtomicBool,
    aborted: AtomicBool,
    wake: Notify,
}

impl SyncCoordinator {
    pub fn new(
        queue: QueueManager,
        registry: Arc<CapabilityRegistry>,
        connectivity: Connectivity,
        settings: SyncSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            queue,
            registry,
            connectivity,
            settings,
            events,
            draining: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Ask the running drain to stop before its next action. An in-flight
    /// remote call is allowed to finish. Returns whether a drain was running.
    pub fn abort(&self) -> bool {
        self.aborted.store(true, Ordering::Release);
        let running = self.is_draining();
        if running {
            tracing::info!("Abort requested for running drain");
        }
        running
    }

    /// Start a drain in the background without waiting for it.
    pub fn kick(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.drain().await {
                // Either the running drain loaded its batch before this kick,
                // or this drain may have scheduled retries the run loop has
                // not seen. Have the loop look again.
                Ok(DrainOutcome::AlreadyRunning | DrainOutcome::Completed(_)) => {
                    this.wake.notify_one()
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Background drain failed: {e}"),
            }
        });
    }

    fn emit(&self, event: SyncEvent) {
        tracing::debug!("sync event: {}", event.name());
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Attempt every due pending action once.
    pub async fn drain(&self) -> Result<DrainOutcome, QueueError> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Drain already in progress");
            return Ok(DrainOutcome::AlreadyRunning);
        }
        let _guard = DrainGuard(&self.draining);

        if !self.connectivity.is_online() {
            return Ok(DrainOutcome::Offline);
        }

        self.aborted.store(false, Ordering::Release);

        // Anything still `syncing` belongs to an earlier drain that errored
        // out; only one drain runs at a time.
        let result = match self.queue.recover_interrupted().await {
            Ok(_) => self.drain_pending().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::error!("Drain aborted: {e}");
                self.emit(SyncEvent::SyncError {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn drain_pending(&self) -> Result<DrainOutcome, QueueError> {
        let pending = self.queue.due_actions(Utc::now()).await?;
        if pending.is_empty() {
            return Ok(DrainOutcome::Empty);
        }

        tracing::info!("Draining {} queued actions", pending.len());
        self.emit(SyncEvent::SyncStart {
            queued_count: pending.len() as u64,
        });

        let mut report = DrainReport::default();

        for action in pending {
            if !self.connectivity.is_online() {
                tracing::info!("Went offline mid-drain, stopping");
                report.interrupted = true;
                break;
            }
            if self.aborted.load(Ordering::Acquire) {
                tracing::info!("Drain aborted");
                report.interrupted = true;
                break;
            }

            match self.sync_action(action).await? {
                ActionOutcome::Synced { follow_ups } => {
                    report.synced += 1;
                    report.follow_ups += follow_ups;
                }
                ActionOutcome::Duplicate => report.duplicates += 1,
                ActionOutcome::Deferred => report.deferred += 1,
                ActionOutcome::Failed => report.failed += 1,
                ActionOutcome::Vanished => continue,
            }
            report.attempted += 1;

            if !self.settings.inter_action_delay.is_zero() {
                tokio::time::sleep(self.settings.inter_action_delay).await;
            }
        }

        report.remaining = self.queue.get_pending_actions_count().await?;
        self.emit(SyncEvent::SyncComplete {
            queued_count: report.remaining,
        });

        tracing::info!(
            "Drain finished: {} synced, {} duplicates, {} deferred, {} failed, {} remaining",
            report.synced,
            report.duplicates,
            report.deferred,
            report.failed,
            report.remaining
        );

        Ok(DrainOutcome::Completed(report))
    }

    async fn sync_action(&self, action: QueuedAction) -> Result<ActionOutcome, QueueError> {
        let previous_attempts = action.metadata.retry_count;

        let action = match self
            .queue
            .update_queued_action_status(action.id, ActionStatus::Syncing, None)
            .await
        {
            Ok(action) => action,
            Err(QueueError::NotFound(id)) => {
                tracing::debug!("Action {id} removed before it could sync");
                return Ok(ActionOutcome::Vanished);
            }
            Err(e) => return Err(e),
        };
        match self.attempt(&action, previous_attempts).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.release(&action, &e).await;
                Err(e)
            }
        }
    }

    /// Put an action whose attempt hit a storage error back to `pending`,
    /// keeping its retry count.
    async fn release(&self, action: &QueuedAction, cause: &QueueError) {
        let message = format!("sync interrupted: {cause}");
        match self
            .queue
            .update_queued_action_status(action.id, ActionStatus::Pending, Some(&message))
            .await
        {
            Ok(_) | Err(QueueError::NotFound(_)) => {}
            Err(e) => {
                // The next drain resets it from the in-flight marker.
                tracing::warn!("Failed to release action {}: {e}", action.id);
                return;
            }
        }
        if let Err(e) = self.queue.clear_in_flight(action.id).await {
            tracing::warn!("Failed to clear in-flight marker for {}: {e}", action.id);
        }
    }

    async fn attempt(
        &self,
        action: &QueuedAction,
        previous_attempts: u32,
    ) -> Result<ActionOutcome, QueueError> {
        self.queue.mark_in_flight(action.id).await?;

        let queued_count = self.queue.get_pending_actions_count().await?;
        self.emit(SyncEvent::ActionSynced {
            action_id: action.id,
            action_type: action.action_type,
            queued_count,
        });

        tracing::debug!(
            "Syncing {} action {} (attempt {})",
            action.action_type,
            action.id,
            action.metadata.retry_count
        );

        let result = match self.registry.get(action.action_type) {
            Some(capability) => {
                capability
                    .execute(&DispatchContext::replay(action.id), &action.payload)
                    .await
            }
            None => Err(RemoteError::unsupported(action.action_type)),
        };

        let resolved = match result {
            Ok(remote) => self.complete(action, remote).await,
            Err(err) => self.fail(action, previous_attempts, err).await,
        };
        let outcome = match resolved {
            Ok(outcome) => outcome,
            Err(QueueError::NotFound(id)) => {
                tracing::debug!("Action {id} discarded while it was syncing");
                ActionOutcome::Vanished
            }
            Err(e) => return Err(e),
        };

        self.queue.clear_in_flight(action.id).await?;
        Ok(outcome)
    }

    async fn complete(
        &self,
        action: &QueuedAction,
        remote: RemoteOutcome,
    ) -> Result<ActionOutcome, QueueError> {
        let follow_ups = remote.follow_ups.len();
        for follow_up in remote.follow_ups {
            let id = self
                .queue
                .enqueue(follow_up.action_type, follow_up.payload, None)
                .await?;
            tracing::info!(
                "Queued follow-up {} action {id} for {}",
                follow_up.action_type,
                action.id
            );
        }

        if let Some(resource_id) = remote.resource_id.as_deref() {
            self.queue
                .record_receipt(action.id, action.action_type, resource_id)
                .await?;
        }

        self.queue.remove_queued_action(action.id).await?;
        tracing::info!("Synced {} action {}", action.action_type, action.id);

        Ok(ActionOutcome::Synced { follow_ups })
    }

    async fn fail(
        &self,
        action: &QueuedAction,
        previous_attempts: u32,
        err: RemoteError,
    ) -> Result<ActionOutcome, QueueError> {
        // A duplicate on the very first attempt is a genuine conflict; after
        // an earlier attempt it means that attempt landed upstream.
        if previous_attempts >= 1 && self.settings.duplicates.is_duplicate(&err) {
            tracing::info!(
                "{} action {} already applied upstream ({err}), dropping it",
                action.action_type,
                action.id
            );
            self.queue.remove_queued_action(action.id).await?;
            self.emit(SyncEvent::ActionFailed {
                action_id: action.id,
                action_type: action.action_type,
                error: DUPLICATE_RESOLVED.to_string(),
            });
            return Ok(ActionOutcome::Duplicate);
        }

        let attempts = action.metadata.retry_count;

        if attempts >= self.settings.max_retries {
            tracing::warn!(
                "{} action {} failed after {attempts} attempts: {err}",
                action.action_type,
                action.id
            );
            self.queue
                .update_queued_action_status(
                    action.id,
                    ActionStatus::Failed,
                    Some(&err.message),
                )
                .await?;
            self.emit(SyncEvent::ActionFailed {
                action_id: action.id,
                action_type: action.action_type,
                error: err.message,
            });
            return Ok(ActionOutcome::Failed);
        }

        let delay = self.settings.backoff_delay(attempts);
        let next_attempt_at = Utc::now()
            + chrono::Duration::milliseconds(delay.as_millis().min(i64::MAX as u128) as i64);

        tracing::debug!(
            "{} action {} failed (attempt {attempts}), retrying in {delay:?}: {err}",
            action.action_type,
            action.id
        );
        self.queue
            .schedule_retry(action.id, &err.message, next_attempt_at)
            .await?;

        Ok(ActionOutcome::Deferred)
    }

    /// Drive drains until `shutdown` flips: on start, on every offline to
    /// online transition, on the fallback interval, when kicked, and when the
    /// earliest backoff deadline passes.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if let Err(e) = self.queue.recover_interrupted().await {
            tracing::error!("Failed to recover interrupted actions: {e}");
        }

        let mut online = self.connectivity.subscribe();
        let mut ticker = tokio::time::interval(self.settings.sync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut retry_at: Option<DateTime<Utc>> = None;

        tracing::info!("Sync coordinator started");

        loop {
            let retry_wait = async {
                match retry_at {
                    Some(at) => {
                        let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                        tokio::time::sleep(wait).await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if !*online.borrow_and_update() {
                        continue;
                    }
                }
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
                _ = retry_wait => {}
            }

            match self.drain().await {
                Ok(DrainOutcome::Completed(report)) if report.follow_ups > 0 => {
                    self.wake.notify_one();
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Drain failed, will retry on next trigger: {e}"),
            }

            retry_at = match self.queue.next_retry_at().await {
                Ok(at) => at,
                Err(e) => {
                    tracing::warn!("Failed to read next retry time: {e}");
                    None
                }
            };
        }

        tracing::info!("Sync coordinator stopped");
    }
}
