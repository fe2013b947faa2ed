use crate::services::submission::SyncItemError;
use backend_client::BackendError;
use offline_queue::QueueError;
use std::fmt;

/// Central error types for the field sync app
#[derive(Debug)]
pub enum AppError {
    /// Database error (rusqlite)
    Database(rusqlite::Error),
    /// Filesystem error
    Filesystem(std::io::Error),
    /// Offline queue error (includes a full device store)
    Queue(QueueError),
    /// Backend rejected or could not serve a request
    Backend(BackendError),
    /// Validation error (e.g. invalid inputs)
    Validation(String),
    /// Resource not found
    NotFound(String),
    /// Check-in position is too far from the work site and was not confirmed
    TooFarFromSite { distance_m: f64 },
    /// No GPS fix where one is required
    GeolocationUnavailable,
    /// Configuration could not be read
    Config(String),
    /// General error
    Other(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AppError::Database(e) => write!(f, "Database error: {}", e),
            AppError::Filesystem(e) => write!(f, "Filesystem error: {}", e),
            AppError::Queue(e) => write!(f, "Offline queue error: {}", e),
            AppError::Backend(e) => write!(f, "Backend error: {}", e),
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::TooFarFromSite { distance_m } => {
                write!(f, "Position is {:.0} m away from the work site", distance_m)
            }
            AppError::GeolocationUnavailable => write!(f, "GPS position unavailable"),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for AppError {}

// Conversions from other error types
impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Database(e)
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Filesystem(e)
    }
}

impl From<QueueError> for AppError {
    fn from(e: QueueError) -> Self {
        AppError::Queue(e)
    }
}

impl From<BackendError> for AppError {
    fn from(e: BackendError) -> Self {
        AppError::Backend(e)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Other(format!("JSON error: {}", e))
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(e: zip::result::ZipError) -> Self {
        AppError::Other(format!("Archive error: {}", e))
    }
}

impl From<SyncItemError> for AppError {
    fn from(e: SyncItemError) -> Self {
        match e {
            SyncItemError::Remote(e) => AppError::Backend(e),
            SyncItemError::StillOffline => {
                AppError::Backend(BackendError::Offline("Backend unreachable".to_string()))
            }
            SyncItemError::Timeout(_) => AppError::Backend(BackendError::TimeoutError),
            SyncItemError::InvalidRecord(msg) => AppError::Validation(msg),
            SyncItemError::CorruptEncoding(msg) => AppError::Other(msg),
        }
    }
}

/// User-friendly error messages for the UI
impl AppError {
    pub fn user_message(&self) -> String {
        match self {
            AppError::Queue(e) if e.is_storage_full() => {
                "Not enough space to save offline. Free up space and try again.".to_string()
            }
            AppError::Queue(_) => "Could not save the data offline.".to_string(),
            AppError::Database(_) => "A database error occurred. Please try again.".to_string(),
            AppError::Filesystem(_) => {
                "Error accessing files. Please check app permissions.".to_string()
            }
            AppError::Backend(e) if e.is_offline() => {
                "No connection to the server.".to_string()
            }
            AppError::Backend(_) => "The server rejected the request.".to_string(),
            AppError::Validation(msg) => msg.clone(),
            AppError::NotFound(msg) => format!("{} was not found.", msg),
            AppError::TooFarFromSite { distance_m } => format!(
                "You are {:.0} m away from the work site. Confirm to check in anyway.",
                distance_m
            ),
            AppError::GeolocationUnavailable => "Could not get your GPS location.".to_string(),
            AppError::Config(msg) => msg.clone(),
            AppError::Other(msg) => msg.clone(),
        }
    }

    pub fn is_storage_full(&self) -> bool {
        matches!(self, AppError::Queue(e) if e.is_storage_full())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_full_message() {
        let err = AppError::from(QueueError::StorageFull {
            key: "offline_photos".to_string(),
            bytes: 10,
        });
        assert!(err.is_storage_full());
        assert!(err.user_message().contains("space"));
    }

    #[test]
    fn test_offline_backend_message() {
        let err = AppError::from(BackendError::Offline("refused".to_string()));
        assert_eq!(err.user_message(), "No connection to the server.");
    }
}
