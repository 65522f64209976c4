//! Two task engines on one device, syncing through the broadcast hub.
//! Run with RUST_LOG=debug to watch the snapshot traffic.

use std::sync::Arc;
use std::time::Duration;

use taskhub_core::models::{Bucket, Priority};
use taskhub_sync::{BroadcastHub, SnapshotStore, SyncConfig, TaskEngine, TaskEvent};
use tokio::time::sleep;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,taskhub_sync=debug,taskhub_core=debug".to_string()),
        )
        .init();

    let db_url = format!("file:{}?mode=memory&cache=shared", Uuid::new_v4());
    let hub = BroadcastHub::new();

    let alice = TaskEngine::new(
        Arc::new(SnapshotStore::open(&db_url).await?),
        hub.clone(),
        SyncConfig::default(),
        "alice",
    )
    .await?;
    let bob = TaskEngine::new(
        Arc::new(SnapshotStore::open(&db_url).await?),
        hub,
        SyncConfig::default(),
        "bob",
    )
    .await?;

    let _sub = bob.events().subscribe(|event| {
        if let TaskEvent::SyncApplied { count } = event {
            println!("[bob] adopted a snapshot with {count} task(s)");
        }
    });

    let milk = alice
        .add_task("Buy milk", "semi-skimmed", None, None, Priority::Low)
        .await?
        .ok_or("title was empty")?;
    alice
        .add_task("Walk dog", "every morning", None, None, Priority::High)
        .await?;
    alice.toggle_status(milk.id).await?;
    sleep(Duration::from_millis(200)).await;

    println!("bob's pending tasks:");
    for task in bob.tasks_in(Bucket::Pending)? {
        println!("  {}. {} [{}]", task.sequence, task.title, task.priority);
    }
    println!("bob's completed tasks:");
    for task in bob.tasks_in(Bucket::Completed)? {
        println!("  {}. {} [{}]", task.sequence, task.title, task.priority);
    }

    alice.shutdown();
    bob.shutdown();
    Ok(())
}
