/// SQL for the snapshot store. The whole collection lives as one blob in a
/// key-value table, matching the fixed-key storage layout the sync protocol
/// assumes (`tasks_v1` plus its companion last-modified stamp).
pub struct Queries;

impl Queries {
    pub const SCHEMA: &'static str = r#"
        CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
    "#;

    pub const GET_VALUE: &'static str = "SELECT value FROM kv WHERE key = ?1";

    pub const PUT_VALUE: &'static str = r#"
        INSERT INTO kv (key, value) VALUES (?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
    "#;
}

/// Storage key for the serialized task collection.
pub const TASKS_KEY: &str = "tasks_v1";
/// Storage key for the wall-clock millis recorded at the last save.
pub const LAST_MODIFIED_KEY: &str = "tasks_last_modified";
/// Storage key for the deleted-task history records.
pub const HISTORY_KEY: &str = "tasks_history_v1";
