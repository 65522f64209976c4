pub mod broadcast;
pub mod engine;
pub mod errors;
pub mod events;
pub mod queries;
pub mod storage;

pub use broadcast::{BroadcastHub, Subscription, SyncBroadcaster};
pub use engine::{SyncConfig, TaskEngine};
pub use errors::{SyncClientError, SyncResult};
pub use events::{EventDispatcher, EventSubscription, TaskEvent};
pub use storage::SnapshotStore;
