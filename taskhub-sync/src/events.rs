//! Notification boundary between the engine and whatever shell embeds it.
//! Failures never propagate past here as errors; the shell sees transient
//! events and decides how (or whether) to surface them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    TaskAdded { id: i64, title: String },
    TaskUpdated { id: i64 },
    TaskDeleted { id: i64, title: String },
    TaskCompleted { id: i64, title: String },
    TaskReopened { id: i64, title: String },
    /// An incoming snapshot replaced the in-memory collection.
    SyncApplied { count: usize },
    SyncError { message: String },
    /// One-shot startup signal: full sync available or degraded.
    SyncStatus { enabled: bool },
}

type Callback = Box<dyn Fn(&TaskEvent) + Send + Sync>;
type CallbackList = Arc<Mutex<Vec<(u64, Callback)>>>;

pub struct EventSubscription {
    id: u64,
    callbacks: Weak<Mutex<Vec<(u64, Callback)>>>,
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(callbacks) = self.callbacks.upgrade() {
            if let Ok(mut callbacks) = callbacks.lock() {
                callbacks.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

pub struct EventDispatcher {
    callbacks: CallbackList,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            callbacks: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> EventSubscription
    where
        F: Fn(&TaskEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.push((id, Box::new(callback)));
        }
        EventSubscription {
            id,
            callbacks: Arc::downgrade(&self.callbacks),
        }
    }

    pub fn emit_task_added(&self, id: i64, title: &str) {
        self.emit(&TaskEvent::TaskAdded {
            id,
            title: title.to_string(),
        });
    }

    pub fn emit_task_updated(&self, id: i64) {
        self.emit(&TaskEvent::TaskUpdated { id });
    }

    pub fn emit_task_deleted(&self, id: i64, title: &str) {
        self.emit(&TaskEvent::TaskDeleted {
            id,
            title: title.to_string(),
        });
    }

    pub fn emit_task_completed(&self, id: i64, title: &str) {
        self.emit(&TaskEvent::TaskCompleted {
            id,
            title: title.to_string(),
        });
    }

    pub fn emit_task_reopened(&self, id: i64, title: &str) {
        self.emit(&TaskEvent::TaskReopened {
            id,
            title: title.to_string(),
        });
    }

    pub fn emit_sync_applied(&self, count: usize) {
        self.emit(&TaskEvent::SyncApplied { count });
    }

    pub fn emit_sync_error(&self, message: &str) {
        self.emit(&TaskEvent::SyncError {
            message: message.to_string(),
        });
    }

    pub fn emit_sync_status(&self, enabled: bool) {
        self.emit(&TaskEvent::SyncStatus { enabled });
    }

    fn emit(&self, event: &TaskEvent) {
        let callbacks = match self.callbacks.lock() {
            Ok(callbacks) => callbacks,
            Err(_) => {
                tracing::error!("failed to lock callback list for event emission");
                return;
            }
        };
        for (_, callback) in callbacks.iter() {
            callback(event);
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
