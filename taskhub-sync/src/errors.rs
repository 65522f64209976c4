use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncClientError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Task error: {0}")]
    Task(#[from] taskhub_core::TaskError),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Failed to acquire lock: {0}")]
    Lock(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

pub type SyncResult<T> = Result<T, SyncClientError>;
