use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(i64),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}
