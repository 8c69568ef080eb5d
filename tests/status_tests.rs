mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{Value, json};
use tokio::sync::watch;
use uuid::Uuid;

use cellarsync::merge::{ListItem, QueuedItemsView, load_queued_items, merge_page, placeholder};
use cellarsync::models::{ActionStatus, ActionType};
use cellarsync::queue::MetadataOverrides;
use cellarsync::status::{StatusEffect, StatusTracker, SyncStatus, apply};
use cellarsync::sync::SyncEvent;

use common::{FakeCapability, Harness};

// ── Status folding ──────────────────────────────────────────────

#[test]
fn start_and_complete_toggle_syncing() {
    let mut status = SyncStatus {
        is_online: true,
        queued_count: 3,
        is_syncing: false,
    };

    apply(&mut status, &SyncEvent::SyncStart { queued_count: 3 });
    assert!(status.is_syncing);

    apply(&mut status, &SyncEvent::SyncComplete { queued_count: 1 });
    assert!(!status.is_syncing);
    assert_eq!(status.queued_count, 1);
}

#[test]
fn progress_updates_count_and_failures_request_refresh() {
    let mut status = SyncStatus::default();

    let effect = apply(
        &mut status,
        &SyncEvent::ActionSynced {
            action_id: Uuid::now_v7(),
            action_type: ActionType::CreateMember,
            queued_count: 4,
        },
    );
    assert_eq!(effect, StatusEffect::None);
    assert_eq!(status.queued_count, 4);

    let effect = apply(
        &mut status,
        &SyncEvent::ActionFailed {
            action_id: Uuid::now_v7(),
            action_type: ActionType::CreateMember,
            error: "boom".into(),
        },
    );
    assert_eq!(effect, StatusEffect::RefreshCount);
}

#[test]
fn sync_error_clears_syncing() {
    let mut status = SyncStatus {
        is_syncing: true,
        ..SyncStatus::default()
    };
    apply(
        &mut status,
        &SyncEvent::SyncError {
            error: "disk full".into(),
        },
    );
    assert!(!status.is_syncing);
}

#[test]
fn status_serializes_in_camel_case() {
    let status = SyncStatus {
        is_online: false,
        queued_count: 2,
        is_syncing: false,
    };
    assert_eq!(
        serde_json::to_value(status).unwrap(),
        json!({ "isOnline": false, "queuedCount": 2, "isSyncing": false })
    );
}

// ── Status tracker ──────────────────────────────────────────────

#[tokio::test]
async fn refresh_reads_queue_depth_and_connectivity() {
    let harness = Harness::new(vec![], false).await;
    harness.enqueue(ActionType::CreateMember, json!({})).await;
    harness.enqueue(ActionType::CreateCampaign, json!({})).await;

    let tracker = StatusTracker::new(harness.queue.clone(), harness.connectivity.clone());
    let status = tracker.refresh().await.unwrap();

    assert_eq!(
        status,
        SyncStatus {
            is_online: false,
            queued_count: 2,
            is_syncing: false,
        }
    );
    assert_eq!(tracker.current(), status);
}

#[tokio::test]
async fn tracker_follows_connectivity_and_drains() {
    let members = Arc::new(FakeCapability::succeeding(ActionType::CreateMember));
    let harness = Harness::new(vec![members], false).await;
    harness.enqueue(ActionType::CreateMember, json!({})).await;

    let tracker = Arc::new(StatusTracker::new(
        harness.queue.clone(),
        harness.connectivity.clone(),
    ));
    let updates = tracker.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let events = harness.coordinator.subscribe();
    let run = {
        let tracker = tracker.clone();
        tokio::spawn(async move {
            tracker
                .run(events, Duration::from_millis(50), shutdown_rx)
                .await
        })
    };

    common::eventually("queued count to show", || {
        let tracker = tracker.clone();
        async move { tracker.current().queued_count == 1 }
    })
    .await;

    harness.connectivity.set_override(Some(true));
    common::eventually("online flag", || {
        let tracker = tracker.clone();
        async move { tracker.current().is_online }
    })
    .await;

    harness.coordinator.drain().await.unwrap();
    common::eventually("queue to empty", || {
        let tracker = tracker.clone();
        async move {
            let status = tracker.current();
            status.queued_count == 0 && !status.is_syncing
        }
    })
    .await;
    assert!(updates.has_changed().unwrap());

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("tracker did not stop")
        .unwrap();
}

// ── Merge layer ─────────────────────────────────────────────────

#[tokio::test]
async fn queued_items_are_newest_first_with_queue_info() {
    let harness = Harness::new(vec![], false).await;
    let now = Utc::now();

    let older = harness
        .queue
        .enqueue(
            ActionType::CreateMember,
            json!({ "name": "Older" }),
            Some(MetadataOverrides {
                timestamp: Some(now - ChronoDuration::minutes(5)),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
    let newer = harness
        .enqueue(ActionType::CreateMember, json!({ "name": "Newer" }))
        .await;
    harness
        .enqueue(ActionType::CreateCampaign, json!({ "name": "Ignored" }))
        .await;

    let items = load_queued_items(&harness.queue, ActionType::CreateMember, placeholder)
        .await
        .unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].item["name"], "Newer");
    assert_eq!(items[1].item["name"], "Older");
    assert!(items.iter().all(|i| i.is_queued));

    let info = items[0].queue.as_ref().unwrap();
    assert_eq!(info.queued_id, newer);
    assert_eq!(info.status, ActionStatus::Pending);
    assert_eq!(items[1].queue.as_ref().unwrap().queued_id, older);
}

#[tokio::test]
async fn queued_item_serializes_flat() {
    let harness = Harness::new(vec![], false).await;
    let id = harness
        .enqueue(ActionType::CreateMember, json!({ "name": "Ada" }))
        .await;

    let items = load_queued_items(&harness.queue, ActionType::CreateMember, placeholder)
        .await
        .unwrap();
    let value = serde_json::to_value(&items[0]).unwrap();

    assert_eq!(value["name"], "Ada");
    assert_eq!(value["isQueued"], true);
    assert_eq!(value["queuedId"], id.to_string());
    assert_eq!(value["status"], "pending");
    assert!(value["queuedAt"].is_string());
    assert!(value.get("lastError").is_none());

    let server = serde_json::to_value(ListItem::server(json!({ "id": "m-1" }))).unwrap();
    assert_eq!(server, json!({ "id": "m-1", "isQueued": false }));
}

#[test]
fn queued_items_only_lead_the_first_page() {
    let queued = || {
        vec![ListItem {
            item: json!({ "name": "Queued" }),
            is_queued: true,
            queue: None,
        }]
    };
    let server = || vec![json!({ "id": "m-1" }), json!({ "id": "m-2" })];

    let first = merge_page(queued(), server(), 1, 42);
    assert_eq!(first.items.len(), 3);
    assert!(first.items[0].is_queued);
    assert_eq!(first.items[1].item["id"], "m-1");
    assert_eq!(first.queued_count, 1);
    assert_eq!(first.total, 42);

    let second = merge_page(queued(), server(), 2, 42);
    assert_eq!(second.items.len(), 2);
    assert!(second.items.iter().all(|i| !i.is_queued));
    assert_eq!(second.queued_count, 0);
}

#[tokio::test]
async fn view_reloads_on_refresh_and_sync_events() {
    let members = Arc::new(FakeCapability::succeeding(ActionType::CreateMember));
    let harness = Harness::new(vec![members], false).await;

    let view: Arc<QueuedItemsView<Value>> = Arc::new(QueuedItemsView::new(
        harness.queue.clone(),
        ActionType::CreateMember,
        placeholder,
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let events = harness.coordinator.subscribe();
    {
        let view = view.clone();
        tokio::spawn(async move { view.run(events, shutdown_rx).await });
    }

    harness
        .enqueue(ActionType::CreateMember, json!({ "name": "Ada" }))
        .await;
    view.refresh();
    common::eventually("queued item to appear", || {
        let view = view.clone();
        async move { view.items().len() == 1 }
    })
    .await;

    harness.connectivity.set_override(Some(true));
    harness.coordinator.drain().await.unwrap();
    common::eventually("synced item to disappear", || {
        let view = view.clone();
        async move { view.items().is_empty() }
    })
    .await;

    shutdown_tx.send(true).unwrap();
}
