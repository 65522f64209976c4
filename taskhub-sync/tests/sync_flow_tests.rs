use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskhub_core::models::{resequence, Priority};
use taskhub_core::protocol::SyncMessage;
use taskhub_sync::{BroadcastHub, SnapshotStore, SyncBroadcaster, SyncConfig, TaskEngine, TaskEvent};
use tokio::time::sleep;
use uuid::Uuid;

fn unique_db_url() -> String {
    format!("file:{}?mode=memory&cache=shared", Uuid::new_v4())
}

async fn store_at(url: &str) -> Arc<SnapshotStore> {
    Arc::new(SnapshotStore::open(url).await.unwrap())
}

fn quiet_config() -> SyncConfig {
    SyncConfig {
        poll_interval: Duration::from_secs(60),
        ..SyncConfig::default()
    }
}

/// Two contexts on the same device: same storage, same hub. A mutation in
/// one context reaches the other through the broadcast channel.
#[tokio::test]
async fn broadcast_converges_two_contexts() {
    let url = unique_db_url();
    let hub = BroadcastHub::new();

    let a = TaskEngine::new(store_at(&url).await, hub.clone(), quiet_config(), "alice")
        .await
        .unwrap();
    let b = TaskEngine::new(store_at(&url).await, hub, quiet_config(), "bob")
        .await
        .unwrap();

    let applied = Arc::new(Mutex::new(0usize));
    let counter = applied.clone();
    let _sub = b.events().subscribe(move |event| {
        if matches!(event, TaskEvent::SyncApplied { .. }) {
            *counter.lock().unwrap() += 1;
        }
    });

    let task = a
        .add_task("Buy milk", "", None, None, Priority::Low)
        .await
        .unwrap()
        .unwrap();
    sleep(Duration::from_millis(100)).await;

    let b_tasks = b.tasks().unwrap();
    assert_eq!(b_tasks.len(), 1);
    assert_eq!(b_tasks[0].id, task.id);
    assert_eq!(b_tasks[0].created_by, "alice");
    assert_eq!(*applied.lock().unwrap(), 1);

    // and back the other way
    b.edit_task(task.id, "Buy oat milk", None).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(a.tasks().unwrap()[0].title, "Buy oat milk");

    a.shutdown();
    b.shutdown();
}

/// With no broadcast channel between contexts, the storage poll still
/// converges them through the shared store.
#[tokio::test]
async fn storage_poll_converges_without_broadcast() {
    let url = unique_db_url();

    let a = TaskEngine::new(store_at(&url).await, BroadcastHub::new(), quiet_config(), "alice")
        .await
        .unwrap();
    let b = TaskEngine::new(
        store_at(&url).await,
        BroadcastHub::new(),
        SyncConfig {
            poll_interval: Duration::from_millis(50),
            ..SyncConfig::default()
        },
        "bob",
    )
    .await
    .unwrap();

    a.add_task("Buy milk", "", None, None, Priority::Low)
        .await
        .unwrap();
    sleep(Duration::from_millis(300)).await;

    assert_eq!(b.tasks().unwrap().len(), 1);

    a.shutdown();
    b.shutdown();
}

/// An explicit refresh (focus / visibility / online transition in the
/// embedding shell) picks up changes without waiting for the timer.
#[tokio::test]
async fn explicit_refresh_reconciles_from_storage() {
    let url = unique_db_url();

    let a = TaskEngine::new(store_at(&url).await, BroadcastHub::new(), quiet_config(), "alice")
        .await
        .unwrap();
    let b = TaskEngine::new(store_at(&url).await, BroadcastHub::new(), quiet_config(), "bob")
        .await
        .unwrap();

    a.add_task("Buy milk", "", None, None, Priority::Low)
        .await
        .unwrap();
    assert!(b.tasks().unwrap().is_empty());

    b.refresh().await.unwrap();
    assert_eq!(b.tasks().unwrap().len(), 1);

    a.shutdown();
    b.shutdown();
}

/// The documented lost-update hazard: two contexts race with whole-snapshot
/// saves; the later wall-clock timestamp wins in its entirety, silently
/// resurrecting a concurrently deleted task.
#[tokio::test]
async fn later_snapshot_wins_whole_collection() {
    let url = unique_db_url();
    let hub = BroadcastHub::new();

    let engine = TaskEngine::new(store_at(&url).await, hub.clone(), quiet_config(), "carol")
        .await
        .unwrap();
    for title in ["one", "two", "three"] {
        engine
            .add_task(title, "", None, None, Priority::Medium)
            .await
            .unwrap();
    }
    let original = engine.tasks().unwrap();
    assert_eq!(original.len(), 3);

    let peer = SyncBroadcaster::connect(hub, "task-sync-channel");

    // context A deleted "two" and saved at T=100
    let mut deleted_view = original.clone();
    deleted_view.retain(|t| t.title != "two");
    resequence(&mut deleted_view);
    peer.send(&SyncMessage::new(deleted_view, 100)).unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.tasks().unwrap().len(), 2);

    // context B edited "three" on its stale 3-task view and saved at T=101
    let mut stale_edit = original.clone();
    if let Some(t) = stale_edit.iter_mut().find(|t| t.title == "three") {
        t.title = "three (edited)".to_string();
    }
    peer.send(&SyncMessage::new(stale_edit, 101)).unwrap();
    sleep(Duration::from_millis(100)).await;

    // B's snapshot wins wholesale: the edit landed and "two" is back
    let final_tasks = engine.tasks().unwrap();
    assert_eq!(final_tasks.len(), 3);
    assert!(final_tasks.iter().any(|t| t.title == "two"));
    assert!(final_tasks.iter().any(|t| t.title == "three (edited)"));

    engine.shutdown();
    peer.close();
}

/// Duplicate delivery of the current snapshot changes nothing and emits
/// nothing.
#[tokio::test]
async fn duplicate_delivery_is_ignored() {
    let url = unique_db_url();
    let hub = BroadcastHub::new();
    let store = store_at(&url).await;

    let engine = TaskEngine::new(store.clone(), hub.clone(), quiet_config(), "carol")
        .await
        .unwrap();
    engine
        .add_task("Buy milk", "", None, None, Priority::Low)
        .await
        .unwrap();

    let applied = Arc::new(Mutex::new(0usize));
    let counter = applied.clone();
    let _sub = engine.events().subscribe(move |event| {
        if matches!(event, TaskEvent::SyncApplied { .. }) {
            *counter.lock().unwrap() += 1;
        }
    });

    let current = engine.tasks().unwrap();
    let timestamp = store.last_modified().await.unwrap().unwrap();
    let peer = SyncBroadcaster::connect(hub, "task-sync-channel");
    peer.send(&SyncMessage::new(current.clone(), timestamp)).unwrap();
    peer.send(&SyncMessage::new(current, timestamp)).unwrap();
    sleep(Duration::from_millis(100)).await;

    assert_eq!(*applied.lock().unwrap(), 0);
    assert_eq!(engine.tasks().unwrap().len(), 1);

    engine.shutdown();
    peer.close();
}

/// Engine state survives a restart of the context through the store.
#[tokio::test]
async fn restarted_context_loads_persisted_snapshot() {
    let url = unique_db_url();
    let store = store_at(&url).await;

    let engine = TaskEngine::new(store.clone(), BroadcastHub::new(), quiet_config(), "dave")
        .await
        .unwrap();
    let task = engine
        .add_task("Buy milk", "", None, None, Priority::Low)
        .await
        .unwrap()
        .unwrap();
    engine.toggle_status(task.id).await.unwrap();
    engine.shutdown();

    let restarted = TaskEngine::new(store, BroadcastHub::new(), quiet_config(), "dave")
        .await
        .unwrap();
    let tasks = restarted.tasks().unwrap();
    assert_eq!(tasks.len(), 1);
    assert!(tasks[0].completed);
    assert!(tasks[0].completed_at.is_some());
    restarted.shutdown();
}
