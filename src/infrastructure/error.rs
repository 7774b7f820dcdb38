use crate::domain::time::TimeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Operation already in flight for {0}")]
    Busy(String),
    #[error("Invalid timer state: {0}")]
    InvalidTimerState(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Assistant error: {0}")]
    Assistant(String),
    #[error("Notification error: {0}")]
    Notification(String),
}

impl From<TimeError> for InfraError {
    fn from(error: TimeError) -> Self {
        Self::Validation(error.to_string())
    }
}
