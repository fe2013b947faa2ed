//! Interfaces to the remote backend consumed by sync and field actions,
//! plus their implementation on top of [`BackendClient`].

use async_trait::async_trait;
use backend_client::{object_path, BackendClient, BackendError};
use serde_json::Value;

/// Folder inside the storage bucket that receives field photos
const PHOTO_FOLDER: &str = "field-photos";

/// Backend tables written by the app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteTable {
    WorkOrders,
    CheckIns,
    Photos,
    WorkReports,
}

impl RemoteTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteTable::WorkOrders => "work_orders",
            RemoteTable::CheckIns => "check_ins",
            RemoteTable::Photos => "photos",
            RemoteTable::WorkReports => "work_reports",
        }
    }
}

impl std::fmt::Display for RemoteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record CRUD on the backend
#[async_trait]
pub trait RemoteData: Send + Sync {
    async fn create(&self, table: RemoteTable, record: Value) -> Result<Value, BackendError>;

    async fn update(&self, table: RemoteTable, id: &str, patch: Value)
        -> Result<Value, BackendError>;

    /// Rows whose columns equal all given values
    async fn filter(
        &self,
        table: RemoteTable,
        conditions: &[(String, String)],
    ) -> Result<Vec<Value>, BackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { file_url: String },
    /// The storage could not be reached; the caller keeps the file
    Offline,
}

/// Binary file storage on the backend
#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        mime_type: &str,
    ) -> Result<UploadOutcome, BackendError>;
}

#[async_trait]
impl RemoteData for BackendClient {
    async fn create(&self, table: RemoteTable, record: Value) -> Result<Value, BackendError> {
        self.insert(table.as_str(), &record).await
    }

    async fn update(
        &self,
        table: RemoteTable,
        id: &str,
        patch: Value,
    ) -> Result<Value, BackendError> {
        BackendClient::update(self, table.as_str(), id, &patch).await
    }

    async fn filter(
        &self,
        table: RemoteTable,
        conditions: &[(String, String)],
    ) -> Result<Vec<Value>, BackendError> {
        self.select(table.as_str(), conditions).await
    }
}

#[async_trait]
impl FileStorage for BackendClient {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        mime_type: &str,
    ) -> Result<UploadOutcome, BackendError> {
        let path = object_path(PHOTO_FOLDER, file_name);
        match self.upload_object(&path, bytes, mime_type).await {
            Ok(file) => Ok(UploadOutcome::Uploaded {
                file_url: file.file_url,
            }),
            Err(e) if e.is_offline() => {
                log::warn!("Storage unreachable while uploading {}: {}", file_name, e);
                Ok(UploadOutcome::Offline)
            }
            Err(e) => Err(e),
        }
    }
}
