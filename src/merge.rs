//! Presenting queued actions alongside server data.
//!
//! Queued items are shown as provisional list entries, newest first, ahead of
//! the server's items on the first page only. Items are never matched by id;
//! receipts carry the queued-id to server-id mapping.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Notify, broadcast, watch};
use uuid::Uuid;

use crate::models::{ActionStatus, ActionType, QueuedAction};
use crate::queue::{QueueError, QueueManager};
use crate::remote::ServerPage;
use crate::sync::SyncEvent;

/// Queue bookkeeping attached to a provisional list item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueInfo {
    pub queued_id: Uuid,
    pub queued_at: DateTime<Utc>,
    pub status: ActionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<&QueuedAction> for QueueInfo {
    fn from(action: &QueuedAction) -> Self {
        Self {
            queued_id: action.id,
            queued_at: action.metadata.timestamp,
            status: action.metadata.status,
            last_error: action.metadata.last_error.clone(),
        }
    }
}

/// A list entry: a server item, or a queued action shaped like one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItem<T> {
    #[serde(flatten)]
    pub item: T,
    pub is_queued: bool,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueInfo>,
}

impl<T> ListItem<T> {
    pub fn server(item: T) -> Self {
        Self {
            item,
            is_queued: false,
            queue: None,
        }
    }

    pub fn queued(item: T, action: &QueuedAction) -> Self {
        Self {
            item,
            is_queued: true,
            queue: Some(QueueInfo::from(action)),
        }
    }
}

/// Default transform: show the payload as the item.
pub fn placeholder(action: &QueuedAction) -> Value {
    action.payload.clone()
}

/// Queued actions of `action_type`, transformed and sorted newest first.
pub async fn load_queued_items<T, F>(
    queue: &QueueManager,
    action_type: ActionType,
    transform: F,
) -> Result<Vec<ListItem<T>>, QueueError>
where
    F: Fn(&QueuedAction) -> T,
{
    let mut actions = queue.get_queued_actions_by_type(action_type).await?;
    actions.sort_by(|a, b| {
        b.metadata
            .timestamp
            .cmp(&a.metadata.timestamp)
            .then_with(|| b.id.cmp(&a.id))
    });

    Ok(actions
        .iter()
        .map(|action| ListItem::queued(transform(action), action))
        .collect())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedPage<T> {
    pub items: Vec<ListItem<T>>,
    pub page: i64,
    /// Server-side total; queued items are not counted.
    pub total: i64,
    pub queued_count: usize,
}

/// Prepend `queued` to the server items when `page` is the first page.
pub fn merge_page<T>(
    queued: Vec<ListItem<T>>,
    server: Vec<T>,
    page: i64,
    total: i64,
) -> MergedPage<T> {
    let queued = if page <= 1 { queued } else { Vec::new() };
    let queued_count = queued.len();

    let mut items = queued;
    items.extend(server.into_iter().map(ListItem::server));

    MergedPage {
        items,
        page,
        total,
        queued_count,
    }
}

/// [`merge_page`] for a raw upstream page.
pub fn merge_server_page(
    queued: Vec<ListItem<Value>>,
    server: ServerPage,
    page: i64,
) -> MergedPage<Value> {
    merge_page(queued, server.items, page, server.total)
}

/// Live list of queued items for one action type.
///
/// Refreshes whenever the coordinator reports progress for that type, when a
/// drain completes, and when [`QueuedItemsView::refresh`] is called.
pub struct QueuedItemsView<T> {
    queue: QueueManager,
    action_type: ActionType,
    transform: Arc<dyn Fn(&QueuedAction) -> T + Send + Sync>,
    tx: watch::Sender<Vec<ListItem<T>>>,
    refresh: Notify,
}

impl<T> QueuedItemsView<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(
        queue: QueueManager,
        action_type: ActionType,
        transform: impl Fn(&QueuedAction) -> T + Send + Sync + 'static,
    ) -> Self {
        let (tx, _) = watch::channel(Vec::new());
        Self {
            queue,
            action_type,
            transform: Arc::new(transform),
            tx,
            refresh: Notify::new(),
        }
    }

    pub fn action_type(&self) -> ActionType {
        self.action_type
    }

    pub fn items(&self) -> Vec<ListItem<T>> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<ListItem<T>>> {
        self.tx.subscribe()
    }

    /// Request a reload from the running view loop.
    pub fn refresh(&self) {
        self.refresh.notify_one();
    }

    pub async fn reload(&self) -> Result<Vec<ListItem<T>>, QueueError> {
        let items =
            load_queued_items(&self.queue, self.action_type, |a| (self.transform)(a)).await?;
        self.tx.send_replace(items.clone());
        Ok(items)
    }

    fn is_relevant(&self, event: &SyncEvent) -> bool {
        match event {
            SyncEvent::SyncComplete { .. } | SyncEvent::SyncError { .. } => true,
            _ => event.action_type() == Some(self.action_type),
        }
    }

    async fn reload_logged(&self) {
        if let Err(e) = self.reload().await {
            tracing::warn!("Failed to reload queued {} items: {e}", self.action_type);
        }
    }

    pub async fn run(
        &self,
        mut events: broadcast::Receiver<SyncEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        self.reload_logged().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = self.refresh.notified() => self.reload_logged().await,
                event = events.recv() => match event {
                    Ok(event) if self.is_relevant(&event) => self.reload_logged().await,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => self.reload_logged().await,
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }
}
