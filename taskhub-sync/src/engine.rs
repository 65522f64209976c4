use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use taskhub_core::models::{
    bucket_tasks, completed_history, resequence, Bucket, DeletedTask, Priority, Task,
};
use taskhub_core::protocol::{tasks_json, SyncMessage};
use taskhub_core::reconcile::{advance, should_adopt};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::broadcast::{BroadcastHub, Subscription, SyncBroadcaster};
use crate::errors::{SyncClientError, SyncResult};
use crate::events::EventDispatcher;
use crate::storage::SnapshotStore;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Logical channel name shared by all contexts on the device.
    pub channel: String,
    /// Cadence of the storage refresh loop.
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            channel: "task-sync-channel".to_string(),
            poll_interval: Duration::from_millis(500),
        }
    }
}

struct EngineState {
    tasks: Vec<Task>,
    /// Watermark of the last adopted snapshot (wall-clock millis).
    last_adopted: i64,
}

/// Business-logic surface over the task collection. Owns the in-memory
/// copy, persists every mutation through the snapshot store, announces it
/// on the sync channel, and reconciles snapshots arriving from other
/// contexts (broadcast or storage poll) by whole-collection replacement.
pub struct TaskEngine {
    store: Arc<SnapshotStore>,
    broadcaster: Arc<SyncBroadcaster>,
    events: Arc<EventDispatcher>,
    state: Arc<Mutex<EngineState>>,
    user: String,
    client_id: Uuid,
    stopped: Arc<AtomicBool>,
    stop_signal: Arc<Notify>,
    _subscription: Subscription,
}

impl TaskEngine {
    pub async fn new(
        store: Arc<SnapshotStore>,
        hub: Arc<BroadcastHub>,
        config: SyncConfig,
        user: &str,
    ) -> SyncResult<Self> {
        Self::with_events(store, hub, config, user, Arc::new(EventDispatcher::new())).await
    }

    /// Like [`TaskEngine::new`], but with a caller-supplied dispatcher so
    /// subscribers registered before construction observe the startup
    /// `SyncStatus` event.
    pub async fn with_events(
        store: Arc<SnapshotStore>,
        hub: Arc<BroadcastHub>,
        config: SyncConfig,
        user: &str,
        events: Arc<EventDispatcher>,
    ) -> SyncResult<Self> {
        let client_id = Uuid::new_v4();
        let tasks = store.load().await?;
        let last_adopted = store.last_modified().await?.unwrap_or(0);
        tracing::info!(
            client = %client_id,
            count = tasks.len(),
            last_adopted,
            "task engine starting"
        );

        let state = Arc::new(Mutex::new(EngineState {
            tasks,
            last_adopted,
        }));
        let broadcaster = SyncBroadcaster::connect(hub, &config.channel);
        events.emit_sync_status(broadcaster.is_attached());

        let subscription = {
            let state = state.clone();
            let events = events.clone();
            broadcaster.subscribe(move |payload| match SyncMessage::decode(payload) {
                Ok(incoming) => {
                    Self::apply_snapshot(&state, &events, incoming, "channel", client_id);
                }
                Err(e) => {
                    // parse failure leaves current state untouched
                    tracing::warn!(client = %client_id, "discarding unparseable sync payload: {}", e);
                }
            })
        };

        let engine = Self {
            store,
            broadcaster,
            events,
            state,
            user: user.to_string(),
            client_id,
            stopped: Arc::new(AtomicBool::new(false)),
            stop_signal: Arc::new(Notify::new()),
            _subscription: subscription,
        };
        engine.spawn_poll_loop(config.poll_interval);
        Ok(engine)
    }

    pub fn events(&self) -> Arc<EventDispatcher> {
        self.events.clone()
    }

    /// Whether the sync channel was established (full sync) or the engine
    /// is running degraded (local persistence only).
    pub fn sync_enabled(&self) -> bool {
        self.broadcaster.is_attached()
    }

    /// Add a task. A whitespace-only title is silently ignored.
    pub async fn add_task(
        &self,
        title: &str,
        description: &str,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
        priority: Priority,
    ) -> SyncResult<Option<Task>> {
        let title = title.trim();
        if title.is_empty() {
            tracing::debug!(client = %self.client_id, "ignoring add with empty title");
            return Ok(None);
        }

        let task = {
            let mut state = self.lock_state()?;
            let now = Utc::now();
            let mut id = now.timestamp_millis();
            let max_id = state.tasks.iter().map(|t| t.id).max().unwrap_or(0);
            if id <= max_id {
                id = max_id + 1;
            }
            let pending_count = state.tasks.iter().filter(|t| !t.completed).count();
            let task = Task {
                id,
                sequence: pending_count as u32 + 1,
                title: title.to_string(),
                description: description.to_string(),
                start_date,
                end_date,
                completed: false,
                created_at: now,
                created_by: self.user.clone(),
                completed_at: None,
                priority,
            };
            // most-recent-first raw order; buckets are derived by filtering
            state.tasks.insert(0, task.clone());
            task
        };

        tracing::info!(client = %self.client_id, id = task.id, "task added");
        self.events.emit_task_added(task.id, &task.title);
        self.commit().await;
        Ok(Some(task))
    }

    /// Edit title and/or description. An unknown id is a no-op; an empty
    /// title leaves the title unchanged; `None` description means leave
    /// unchanged, `Some("")` means clear.
    pub async fn edit_task(
        &self,
        id: i64,
        new_title: &str,
        new_description: Option<&str>,
    ) -> SyncResult<bool> {
        let edited = {
            let mut state = self.lock_state()?;
            match state.tasks.iter_mut().find(|t| t.id == id) {
                Some(task) => {
                    let title = new_title.trim();
                    if !title.is_empty() {
                        task.title = title.to_string();
                    }
                    if let Some(description) = new_description {
                        task.description = description.to_string();
                    }
                    true
                }
                None => false,
            }
        };
        if !edited {
            tracing::debug!(client = %self.client_id, id, "edit of unknown task ignored");
            return Ok(false);
        }

        self.events.emit_task_updated(id);
        self.commit().await;
        Ok(true)
    }

    /// Remove a task, renumber both buckets, and record the deletion in the
    /// history store.
    pub async fn delete_task(&self, id: i64) -> SyncResult<bool> {
        let removed = {
            let mut state = self.lock_state()?;
            let Some(position) = state.tasks.iter().position(|t| t.id == id) else {
                return Ok(false);
            };
            let task = state.tasks.remove(position);
            resequence(&mut state.tasks);
            task
        };

        let record = DeletedTask {
            task: removed.clone(),
            deleted_at: Utc::now(),
            deleted_by: self.user.clone(),
        };
        if let Err(e) = self.store.append_deleted(&record).await {
            tracing::error!(client = %self.client_id, id, "failed to record deletion: {}", e);
            self.events
                .emit_sync_error(&format!("Failed to record deletion history: {e}"));
        }

        tracing::info!(client = %self.client_id, id, "task deleted");
        self.events.emit_task_deleted(id, &removed.title);
        self.commit().await;
        Ok(true)
    }

    /// Flip a task between the pending and completed buckets, stamping or
    /// clearing `completed_at` and renumbering both buckets.
    pub async fn toggle_status(&self, id: i64) -> SyncResult<bool> {
        let toggled = {
            let mut state = self.lock_state()?;
            let Some(task) = state.tasks.iter_mut().find(|t| t.id == id) else {
                return Ok(false);
            };
            task.completed = !task.completed;
            task.completed_at = task.completed.then(Utc::now);
            let snapshot = (task.completed, task.title.clone());
            resequence(&mut state.tasks);
            snapshot
        };

        let (completed, title) = toggled;
        if completed {
            self.events.emit_task_completed(id, &title);
        } else {
            self.events.emit_task_reopened(id, &title);
        }
        self.commit().await;
        Ok(true)
    }

    pub fn tasks(&self) -> SyncResult<Vec<Task>> {
        Ok(self.lock_state()?.tasks.clone())
    }

    /// Tasks in the requested bucket. Bucket selection is an explicit
    /// argument; nothing here inspects presentation state.
    pub fn tasks_in(&self, bucket: Bucket) -> SyncResult<Vec<Task>> {
        let state = self.lock_state()?;
        Ok(bucket_tasks(&state.tasks, bucket)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Tasks completed at least once and not reopened since.
    pub fn completed_history(&self) -> SyncResult<Vec<Task>> {
        let state = self.lock_state()?;
        Ok(completed_history(&state.tasks)
            .into_iter()
            .cloned()
            .collect())
    }

    pub async fn deleted_tasks(&self) -> SyncResult<Vec<DeletedTask>> {
        self.store.deleted_tasks().await
    }

    /// Reload from the store and reconcile. The embedding shell calls this
    /// on focus, visibility, and network-online transitions; the background
    /// loop calls it on a fixed timer.
    pub async fn refresh(&self) -> SyncResult<()> {
        Self::poll_store(&self.store, &self.state, &self.events, self.client_id).await
    }

    /// Stop the poll loop and detach from the sync channel.
    pub fn shutdown(&self) {
        tracing::info!(client = %self.client_id, "task engine shutting down");
        self.stopped.store(true, Ordering::Relaxed);
        self.stop_signal.notify_waiters();
        self.broadcaster.close();
    }

    /// Persist the current collection and announce it. Failures are handled
    /// here: the optimistic in-memory state is kept and the shell is told
    /// through a transient event.
    async fn commit(&self) {
        let tasks = match self.lock_state() {
            Ok(state) => state.tasks.clone(),
            Err(e) => {
                tracing::error!(client = %self.client_id, "commit skipped: {}", e);
                return;
            }
        };

        match self.store.save(&tasks).await {
            Ok(timestamp) => {
                if let Ok(mut state) = self.lock_state() {
                    state.last_adopted = advance(state.last_adopted, timestamp);
                }
                let message = SyncMessage::new(tasks, timestamp);
                if let Err(e) = self.broadcaster.send(&message) {
                    tracing::warn!(client = %self.client_id, "failed to broadcast snapshot: {}", e);
                }
            }
            Err(e) => {
                tracing::error!(client = %self.client_id, "failed to persist snapshot: {}", e);
                self.events
                    .emit_sync_error(&format!("Failed to save tasks: {e}"));
            }
        }
    }

    /// Reconcile an incoming snapshot against the in-memory one. Adoption
    /// replaces the whole collection; the losing snapshot's concurrent
    /// edits are discarded (last write by wall clock wins).
    fn apply_snapshot(
        state: &Mutex<EngineState>,
        events: &EventDispatcher,
        incoming: SyncMessage,
        origin: &str,
        client_id: Uuid,
    ) {
        let mut state = match state.lock() {
            Ok(state) => state,
            Err(_) => {
                tracing::error!(client = %client_id, "failed to lock state for reconciliation");
                return;
            }
        };
        let current_json = match tasks_json(&state.tasks) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(client = %client_id, "failed to serialize current state: {}", e);
                return;
            }
        };

        if should_adopt(state.last_adopted, &current_json, &incoming) {
            tracing::info!(
                client = %client_id,
                origin,
                timestamp = incoming.timestamp,
                count = incoming.tasks.len(),
                "adopting incoming snapshot"
            );
            state.last_adopted = advance(state.last_adopted, incoming.timestamp);
            state.tasks = incoming.tasks;
            let count = state.tasks.len();
            drop(state);
            events.emit_sync_applied(count);
        } else {
            tracing::debug!(
                client = %client_id,
                origin,
                timestamp = incoming.timestamp,
                "keeping current snapshot"
            );
        }
    }

    async fn poll_store(
        store: &SnapshotStore,
        state: &Mutex<EngineState>,
        events: &EventDispatcher,
        client_id: Uuid,
    ) -> SyncResult<()> {
        let Some(modified) = store.last_modified().await? else {
            return Ok(());
        };
        let tasks = store.load().await?;
        Self::apply_snapshot(
            state,
            events,
            SyncMessage::new(tasks, modified),
            "storage",
            client_id,
        );
        Ok(())
    }

    fn spawn_poll_loop(&self, interval: Duration) {
        let store = self.store.clone();
        let state = self.state.clone();
        let events = self.events.clone();
        let stopped = self.stopped.clone();
        let stop_signal = self.stop_signal.clone();
        let client_id = self.client_id;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_signal.notified() => break,
                    _ = tokio::time::sleep(interval) => {
                        if stopped.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Err(e) = Self::poll_store(&store, &state, &events, client_id).await {
                            tracing::warn!(client = %client_id, "storage poll failed: {}", e);
                        }
                    }
                }
            }
            tracing::debug!(client = %client_id, "storage poll loop stopped");
        });
    }

    fn lock_state(&self) -> SyncResult<MutexGuard<'_, EngineState>> {
        self.state
            .lock()
            .map_err(|_| SyncClientError::Lock("task state".to_string()))
    }
}
