/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors raised by the offline queue
#[derive(Debug)]
pub enum QueueError {
    /// The device store rejected a write (capacity exceeded)
    StorageFull { key: String, bytes: usize },
    /// A queued photo payload could not be turned back into bytes
    CorruptEncoding(String),
    DatabaseError(rusqlite::Error),
    SerializationError(serde_json::Error),
    ImageError(String),
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::StorageFull { key, bytes } => {
                write!(f, "Storage full: could not write {} bytes to '{}'", bytes, key)
            }
            QueueError::CorruptEncoding(msg) => write!(f, "Corrupt encoding: {}", msg),
            QueueError::DatabaseError(e) => write!(f, "Database error: {}", e),
            QueueError::SerializationError(e) => write!(f, "Serialization error: {}", e),
            QueueError::ImageError(msg) => write!(f, "Image error: {}", msg),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<rusqlite::Error> for QueueError {
    fn from(err: rusqlite::Error) -> Self {
        QueueError::DatabaseError(err)
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::SerializationError(err)
    }
}

impl QueueError {
    pub fn is_storage_full(&self) -> bool {
        matches!(self, QueueError::StorageFull { .. })
    }
}
