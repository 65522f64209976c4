//! Same-device snapshot propagation. A `BroadcastHub` is the named-channel
//! bus shared by every execution context on one device; each context holds
//! its own `SyncBroadcaster` attached to a channel name. Messages sent while
//! no channel is established are queued in memory and flushed once
//! establishment succeeds. Self-originated loopback is not filtered here;
//! the reconciliation policy discards stale and duplicate snapshots.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use backoff::{future::retry, ExponentialBackoff};
use taskhub_core::protocol::SyncMessage;
use tokio::sync::{broadcast, Notify};

use crate::errors::{SyncClientError, SyncResult};

const CHANNEL_CAPACITY: usize = 64;

type Callback = Box<dyn Fn(&str) + Send + Sync>;
type CallbackList = Arc<Mutex<Vec<(u64, Callback)>>>;

/// Registry of named channels, scoped to one device/process. Explicitly
/// constructed and injected so tests can run independent buses; `close`
/// ends its lifetime and fails all further attachments.
pub struct BroadcastHub {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    closed: AtomicBool,
}

impl BroadcastHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            channels: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn attach(&self, name: &str) -> SyncResult<broadcast::Sender<String>> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(SyncClientError::Channel("hub is closed".to_string()));
        }
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| SyncClientError::Lock("hub channels".to_string()))?;
        let sender = channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Ok(sender.clone())
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        if let Ok(mut channels) = self.channels.lock() {
            channels.clear();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

struct ChannelState {
    sender: Option<broadcast::Sender<String>>,
    pending: Vec<String>,
}

/// Guard for a registered receive callback; dropping it unregisters.
pub struct Subscription {
    id: u64,
    callbacks: Weak<Mutex<Vec<(u64, Callback)>>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(callbacks) = self.callbacks.upgrade() {
            if let Ok(mut callbacks) = callbacks.lock() {
                callbacks.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

/// One context's endpoint on a named sync channel.
pub struct SyncBroadcaster {
    hub: Arc<BroadcastHub>,
    channel_name: String,
    state: Mutex<ChannelState>,
    callbacks: CallbackList,
    next_subscription_id: AtomicU64,
    closed: AtomicBool,
    shutdown: Notify,
}

impl SyncBroadcaster {
    /// Attach to the named channel. On failure the broadcaster starts in a
    /// degraded mode: sends queue in memory while a background task retries
    /// establishment with exponential backoff (1s initial, doubling, 30s
    /// cap).
    pub fn connect(hub: Arc<BroadcastHub>, channel_name: &str) -> Arc<Self> {
        let broadcaster = Arc::new(Self {
            hub,
            channel_name: channel_name.to_string(),
            state: Mutex::new(ChannelState {
                sender: None,
                pending: Vec::new(),
            }),
            callbacks: Arc::new(Mutex::new(Vec::new())),
            next_subscription_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
        });

        match broadcaster.hub.attach(channel_name) {
            Ok(sender) => {
                tracing::info!(channel = channel_name, "sync channel established");
                Arc::clone(&broadcaster).establish(sender);
            }
            Err(e) => {
                tracing::warn!(
                    channel = channel_name,
                    "sync channel unavailable, will retry: {}",
                    e
                );
                Arc::clone(&broadcaster).spawn_reattach();
            }
        }

        broadcaster
    }

    /// Publish a snapshot, or queue it if no channel is established yet.
    pub fn send(&self, message: &SyncMessage) -> SyncResult<()> {
        let payload = message.encode()?;
        let mut state = self
            .state
            .lock()
            .map_err(|_| SyncClientError::Lock("broadcaster state".to_string()))?;
        match &state.sender {
            Some(sender) => {
                if let Err(e) = sender.send(payload) {
                    tracing::debug!("no listeners on sync channel: {}", e);
                }
            }
            None => {
                tracing::debug!("sync channel not established, queueing message");
                state.pending.push(payload);
            }
        }
        Ok(())
    }

    /// Register a callback invoked with every received raw payload,
    /// including payloads this broadcaster sent itself.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.push((id, Box::new(callback)));
        }
        Subscription {
            id,
            callbacks: Arc::downgrade(&self.callbacks),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.sender.is_some())
            .unwrap_or(false)
    }

    /// Detach from the channel and stop background tasks. Queued messages
    /// are dropped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.shutdown.notify_waiters();
        if let Ok(mut state) = self.state.lock() {
            state.sender = None;
            state.pending.clear();
        }
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.clear();
        }
    }

    /// Wire up an established channel: flush the pending queue in order and
    /// start the receive pump. The pump subscribes before the flush so
    /// flushed messages loop back like any other send.
    fn establish(self: Arc<Self>, sender: broadcast::Sender<String>) {
        let mut rx = sender.subscribe();
        {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(_) => {
                    tracing::error!("failed to lock broadcaster state during establish");
                    return;
                }
            };
            let pending = std::mem::take(&mut state.pending);
            if !pending.is_empty() {
                tracing::info!(count = pending.len(), "flushing queued sync messages");
            }
            for payload in pending {
                let _ = sender.send(payload);
            }
            state.sender = Some(sender);
        }

        let me = self;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = me.shutdown.notified() => break,
                    received = rx.recv() => match received {
                        Ok(payload) => me.dispatch(&payload),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "sync channel lagged, messages dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                if me.closed.load(Ordering::Relaxed) {
                    break;
                }
            }
            tracing::debug!(channel = %me.channel_name, "sync channel pump stopped");
        });
    }

    fn spawn_reattach(self: Arc<Self>) {
        let me = self;
        tokio::spawn(async move {
            let policy = ExponentialBackoff {
                initial_interval: Duration::from_secs(1),
                multiplier: 2.0,
                randomization_factor: 0.0,
                max_interval: Duration::from_secs(30),
                max_elapsed_time: None,
                ..Default::default()
            };

            let operation = || async {
                if me.closed.load(Ordering::Relaxed) {
                    return Err(backoff::Error::permanent(SyncClientError::Channel(
                        "broadcaster closed".to_string(),
                    )));
                }
                me.hub
                    .attach(&me.channel_name)
                    .map_err(backoff::Error::transient)
            };

            match retry(policy, operation).await {
                Ok(sender) => {
                    tracing::info!(channel = %me.channel_name, "sync channel established after retry");
                    me.establish(sender);
                }
                Err(e) => {
                    tracing::warn!(channel = %me.channel_name, "giving up on sync channel: {}", e);
                }
            }
        });
    }

    fn dispatch(&self, payload: &str) {
        let callbacks = match self.callbacks.lock() {
            Ok(callbacks) => callbacks,
            Err(_) => {
                tracing::error!("failed to lock subscriber list for dispatch");
                return;
            }
        };
        for (_, callback) in callbacks.iter() {
            callback(payload);
        }
    }
}
