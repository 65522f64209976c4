use serde::{Deserialize, Serialize};

use crate::errors::TaskError;
use crate::models::Task;

/// The snapshot broadcast unit: the entire collection at one instant plus
/// the wall-clock millis recorded when it was saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub tasks: Vec<Task>,
    pub timestamp: i64,
}

impl SyncMessage {
    pub fn new(tasks: Vec<Task>, timestamp: i64) -> Self {
        Self { tasks, timestamp }
    }

    pub fn encode(&self) -> Result<String, TaskError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(payload: &str) -> Result<Self, TaskError> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// Canonical serialization of a collection, used both as the stored blob
/// and as the content-comparison form during reconciliation.
pub fn tasks_json(tasks: &[Task]) -> Result<String, TaskError> {
    Ok(serde_json::to_string(tasks)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;
    use chrono::Utc;

    #[test]
    fn sync_message_round_trips() {
        let msg = SyncMessage::new(
            vec![Task {
                id: 7,
                sequence: 1,
                title: "Buy milk".to_string(),
                description: String::new(),
                start_date: None,
                end_date: Some(Utc::now()),
                completed: false,
                created_at: Utc::now(),
                created_by: "alice".to_string(),
                completed_at: None,
                priority: Priority::Low,
            }],
            1_700_000_000_000,
        );

        let payload = msg.encode().unwrap();
        let decoded = SyncMessage::decode(&payload).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(SyncMessage::decode("{not json").is_err());
        assert!(SyncMessage::decode("{\"timestamp\": 1}").is_err());
    }
}
