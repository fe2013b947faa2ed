//! Per-kind submission protocols shared by the sync pass and the direct
//! online path of the field actions. Every remote call is bounded by a
//! timeout. A multi-step protocol fails as a whole when any step fails.

use crate::services::remote::{FileStorage, RemoteData, RemoteTable, UploadOutcome};
use backend_client::BackendError;
use offline_queue::{
    CheckInPayload, CheckInRecord, DecodedPhoto, PhotoMetadata, QueueError, ReportPayload,
    WorkOrderStatus,
};
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;

/// Why a single queued item could not be submitted
#[derive(Debug)]
pub enum SyncItemError {
    /// Stored payload is not decodable
    CorruptEncoding(String),
    /// Backend rejected a step
    Remote(BackendError),
    /// Backend not reachable; the item is skipped, not failed
    StillOffline,
    /// A step did not complete within its deadline
    Timeout(&'static str),
    InvalidRecord(String),
}

impl std::fmt::Display for SyncItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncItemError::CorruptEncoding(msg) => write!(f, "Corrupt encoding: {}", msg),
            SyncItemError::Remote(e) => write!(f, "Remote failure: {}", e),
            SyncItemError::StillOffline => write!(f, "Still offline"),
            SyncItemError::Timeout(step) => write!(f, "Timed out during {}", step),
            SyncItemError::InvalidRecord(msg) => write!(f, "Invalid record: {}", msg),
        }
    }
}

impl std::error::Error for SyncItemError {}

impl SyncItemError {
    pub fn is_offline(&self) -> bool {
        matches!(self, SyncItemError::StillOffline)
    }
}

impl From<BackendError> for SyncItemError {
    fn from(e: BackendError) -> Self {
        if e.is_offline() {
            SyncItemError::StillOffline
        } else {
            SyncItemError::Remote(e)
        }
    }
}

impl From<QueueError> for SyncItemError {
    fn from(e: QueueError) -> Self {
        SyncItemError::CorruptEncoding(e.to_string())
    }
}

impl From<serde_json::Error> for SyncItemError {
    fn from(e: serde_json::Error) -> Self {
        SyncItemError::InvalidRecord(e.to_string())
    }
}

/// Deadlines for remote calls
#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    pub upload: Duration,
    pub record: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            upload: Duration::from_secs(30),
            record: Duration::from_secs(15),
        }
    }
}

async fn bounded<T, F>(deadline: Duration, step: &'static str, fut: F) -> Result<T, SyncItemError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result.map_err(SyncItemError::from),
        Err(_) => Err(SyncItemError::Timeout(step)),
    }
}

/// Record stored in the photos table for an uploaded file
pub fn photo_record(metadata: &PhotoMetadata, file_name: &str, file_url: &str) -> Value {
    json!({
        "work_order_id": metadata.work_order_id,
        "order_number": metadata.order_number,
        "technician_id": metadata.technician_id,
        "technician_name": metadata.technician_name,
        "category": metadata.category,
        "description": metadata.description,
        "file_name": file_name,
        "file_url": file_url,
        "latitude": metadata.location.map(|p| p.latitude),
        "longitude": metadata.location.map(|p| p.longitude),
    })
}

/// Uploads the photo file and returns its public URL
pub async fn upload_photo(
    storage: &dyn FileStorage,
    photo: DecodedPhoto,
    deadline: Duration,
) -> Result<String, SyncItemError> {
    let DecodedPhoto {
        bytes,
        file_name,
        mime_type,
    } = photo;

    let outcome = match tokio::time::timeout(deadline, storage.upload(bytes, &file_name, &mime_type))
        .await
    {
        Ok(result) => result?,
        Err(_) => return Err(SyncItemError::Timeout("photo upload")),
    };

    match outcome {
        UploadOutcome::Uploaded { file_url } => Ok(file_url),
        UploadOutcome::Offline => Err(SyncItemError::StillOffline),
    }
}

/// Creates the photo record when the photo belongs to a work order
pub async fn link_photo(
    remote: &dyn RemoteData,
    metadata: &PhotoMetadata,
    file_name: &str,
    file_url: &str,
    deadline: Duration,
) -> Result<(), SyncItemError> {
    if metadata.work_order_id.is_none() {
        return Ok(());
    }
    let record = photo_record(metadata, file_name, file_url);
    bounded(deadline, "photo record", remote.create(RemoteTable::Photos, record)).await?;
    Ok(())
}

/// Uploads a photo and links it to its work order.
/// Returns the public URL of the uploaded file.
pub async fn submit_photo(
    remote: &dyn RemoteData,
    storage: &dyn FileStorage,
    photo: DecodedPhoto,
    metadata: &PhotoMetadata,
    deadlines: Deadlines,
) -> Result<String, SyncItemError> {
    let file_name = photo.file_name.clone();
    let file_url = upload_photo(storage, photo, deadlines.upload).await?;
    link_photo(remote, metadata, &file_name, &file_url, deadlines.record).await?;
    Ok(file_url)
}

async fn create_check_record(
    remote: &dyn RemoteData,
    record: &CheckInRecord,
    deadlines: Deadlines,
) -> Result<(), SyncItemError> {
    let value = serde_json::to_value(record)?;
    bounded(
        deadlines.record,
        "check-in record",
        remote.create(RemoteTable::CheckIns, value),
    )
    .await?;
    Ok(())
}

async fn update_order_status(
    remote: &dyn RemoteData,
    order_id: &str,
    status: Option<WorkOrderStatus>,
    deadlines: Deadlines,
) -> Result<(), SyncItemError> {
    let status = status.ok_or_else(|| {
        SyncItemError::InvalidRecord(format!("No target status for order {}", order_id))
    })?;
    bounded(
        deadlines.record,
        "work order status",
        remote.update(
            RemoteTable::WorkOrders,
            order_id,
            json!({ "status": status.as_str() }),
        ),
    )
    .await?;
    Ok(())
}

/// Creates the check-in record, then moves the order to its new status
pub async fn submit_check_in(
    remote: &dyn RemoteData,
    payload: &CheckInPayload,
    deadlines: Deadlines,
) -> Result<(), SyncItemError> {
    create_check_record(remote, &payload.check_in, deadlines).await?;

    if payload.update_order_status {
        update_order_status(remote, &payload.order_id, payload.new_status, deadlines).await?;
    }
    Ok(())
}

/// Creates the report, updates the order status and records the check-out
pub async fn submit_report(
    remote: &dyn RemoteData,
    payload: &ReportPayload,
    deadlines: Deadlines,
) -> Result<(), SyncItemError> {
    let report = serde_json::to_value(&payload.report)?;
    bounded(
        deadlines.record,
        "work report",
        remote.create(RemoteTable::WorkReports, report),
    )
    .await?;

    if payload.update_order_status {
        update_order_status(remote, &payload.order_id, payload.new_status, deadlines).await?;
    }

    if let Some(check_out) = &payload.check_out {
        create_check_record(remote, check_out, deadlines).await?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable in-memory backend used by the service tests

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Create(RemoteTable, Value),
        Update(RemoteTable, String, Value),
        Filter(RemoteTable, Vec<(String, String)>),
        Upload(String),
    }

    /// Scripted result for the next matching call
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub enum Fault {
        /// Let the call succeed, used to fail a later call in the sequence
        Pass,
        Reject,
        Offline,
        Hang,
    }

    #[derive(Default)]
    pub struct MockBackend {
        pub calls: Mutex<Vec<Call>>,
        /// Faults consumed per table, in call order
        faults: Mutex<Vec<(RemoteTable, VecDeque<Fault>)>>,
        upload_faults: Mutex<VecDeque<Fault>>,
        upload_offline: Mutex<bool>,
        create_hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
        pub rows: Mutex<Vec<Value>>,
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_next(&self, table: RemoteTable, fault: Fault) {
            let mut faults = self.faults.lock().unwrap();
            match faults.iter_mut().find(|(t, _)| *t == table) {
                Some((_, queue)) => queue.push_back(fault),
                None => faults.push((table, VecDeque::from([fault]))),
            }
        }

        /// Runs `hook` while the next `create` call is in flight
        pub fn on_next_create<F: FnOnce() + Send + 'static>(&self, hook: F) {
            *self.create_hook.lock().unwrap() = Some(Box::new(hook));
        }

        pub fn fail_next_upload(&self, fault: Fault) {
            self.upload_faults.lock().unwrap().push_back(fault);
        }

        pub fn set_upload_offline(&self, offline: bool) {
            *self.upload_offline.lock().unwrap() = offline;
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn creates(&self, table: RemoteTable) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, Call::Create(t, _) if *t == table))
                .count()
        }

        pub fn uploads(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, Call::Upload(_)))
                .count()
        }

        fn take_fault(&self, table: RemoteTable) -> Option<Fault> {
            let mut faults = self.faults.lock().unwrap();
            faults
                .iter_mut()
                .find(|(t, _)| *t == table)
                .and_then(|(_, queue)| queue.pop_front())
        }

        async fn apply(fault: Option<Fault>) -> Result<(), BackendError> {
            match fault {
                None | Some(Fault::Pass) => Ok(()),
                Some(Fault::Reject) => Err(BackendError::ServerError {
                    status: 500,
                    message: "rejected".to_string(),
                }),
                Some(Fault::Offline) => Err(BackendError::Offline("unreachable".to_string())),
                Some(Fault::Hang) => std::future::pending().await,
            }
        }
    }

    #[async_trait::async_trait]
    impl RemoteData for MockBackend {
        async fn create(&self, table: RemoteTable, record: Value) -> Result<Value, BackendError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Create(table, record.clone()));
            let hook = self.create_hook.lock().unwrap().take();
            if let Some(hook) = hook {
                hook();
            }
            Self::apply(self.take_fault(table)).await?;
            Ok(record)
        }

        async fn update(
            &self,
            table: RemoteTable,
            id: &str,
            patch: Value,
        ) -> Result<Value, BackendError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Update(table, id.to_string(), patch.clone()));
            Self::apply(self.take_fault(table)).await?;
            Ok(patch)
        }

        async fn filter(
            &self,
            table: RemoteTable,
            conditions: &[(String, String)],
        ) -> Result<Vec<Value>, BackendError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Filter(table, conditions.to_vec()));
            Self::apply(self.take_fault(table)).await?;
            Ok(self.rows.lock().unwrap().clone())
        }
    }

    #[async_trait::async_trait]
    impl FileStorage for MockBackend {
        async fn upload(
            &self,
            _bytes: Vec<u8>,
            file_name: &str,
            _mime_type: &str,
        ) -> Result<UploadOutcome, BackendError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Upload(file_name.to_string()));
            if *self.upload_offline.lock().unwrap() {
                return Ok(UploadOutcome::Offline);
            }
            let fault = self.upload_faults.lock().unwrap().pop_front();
            Self::apply(fault).await?;
            Ok(UploadOutcome::Uploaded {
                file_url: format!("https://files.example.com/{}", file_name),
            })
        }
    }
}
