use crate::domain::gateway::GatewayError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommerceError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Gateway error: {0}")]
    GatewayError(#[from] GatewayError),
    #[error("Notification error: {0}")]
    NotificationError(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Storage error: {0}")]
    StorageError(Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for CommerceError {
    fn from(err: rocksdb::Error) -> Self {
        CommerceError::StorageError(Box::new(err))
    }
}

impl CommerceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CommerceError::ValidationError(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CommerceError::NotFound(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CommerceError>;
