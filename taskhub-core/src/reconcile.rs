//! Whole-snapshot reconciliation: decide whether an incoming snapshot
//! replaces the in-memory collection. Last write by wall clock wins; a
//! content comparison breaks ties when timestamps are equal or stale.
//! There is no per-task merge — whichever snapshot is adopted wins in its
//! entirety.

use crate::protocol::SyncMessage;

/// True when the incoming snapshot should replace the current one:
/// its timestamp is strictly newer than the last adopted one, or its
/// serialized content differs from the current serialized collection.
///
/// Duplicate delivery (equal timestamp, identical content) is a no-op.
pub fn should_adopt(last_adopted: i64, current_tasks_json: &str, incoming: &SyncMessage) -> bool {
    if incoming.timestamp > last_adopted {
        return true;
    }
    match crate::protocol::tasks_json(&incoming.tasks) {
        Ok(incoming_json) => incoming_json != current_tasks_json,
        // Unserializable incoming content never replaces known-good state.
        Err(_) => false,
    }
}

/// Watermark update after an adoption. Content-fallback adoptions of an
/// older-stamped snapshot must not move the watermark backwards.
pub fn advance(last_adopted: i64, incoming_timestamp: i64) -> i64 {
    last_adopted.max(incoming_timestamp)
}
