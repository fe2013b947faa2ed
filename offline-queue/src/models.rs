use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three independent queues kept on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    Photos,
    CheckIns,
    Reports,
}

impl QueueKind {
    pub const ALL: [QueueKind; 3] = [QueueKind::Photos, QueueKind::CheckIns, QueueKind::Reports];

    /// Namespace under which the queue array is persisted
    pub fn storage_key(&self) -> &'static str {
        match self {
            QueueKind::Photos => "offline_photos",
            QueueKind::CheckIns => "offline_checkins",
            QueueKind::Reports => "offline_reports",
        }
    }

    /// Prefix of generated item ids
    pub fn id_prefix(&self) -> &'static str {
        match self {
            QueueKind::Photos => "photo",
            QueueKind::CheckIns => "checkin",
            QueueKind::Reports => "report",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Photos => "photos",
            QueueKind::CheckIns => "check_ins",
            QueueKind::Reports => "reports",
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work order lifecycle as stored by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Cancelled,
}

impl WorkOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkOrderStatus::Pending => "pending",
            WorkOrderStatus::Assigned => "assigned",
            WorkOrderStatus::InProgress => "in_progress",
            WorkOrderStatus::Completed => "completed",
            WorkOrderStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// What a photo documents within the job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoCategory {
    Before,
    #[default]
    During,
    After,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoMetadata {
    pub work_order_id: Option<String>,
    pub order_number: Option<String>,
    pub technician_id: String,
    pub technician_name: String,
    #[serde(default)]
    pub category: PhotoCategory,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

/// A photo captured while offline, kept as storage-safe text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPhoto {
    pub id: String,
    pub encoded_payload: String,
    pub file_name: String,
    pub mime_type: String,
    /// SHA-256 of the original bytes (lowercase hex)
    #[serde(default)]
    pub checksum: Option<String>,
    pub metadata: PhotoMetadata,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Arrival,
    Departure,
}

/// Arrival or departure event as created on the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckInRecord {
    pub technician_id: String,
    pub technician_name: String,
    pub work_order_id: String,
    pub order_number: String,
    pub kind: CheckKind,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: f64,
    /// Computed at capture time, never at sync time
    #[serde(default)]
    pub distance_from_site_m: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckInPayload {
    pub check_in: CheckInRecord,
    pub order_id: String,
    #[serde(default)]
    pub update_order_status: bool,
    #[serde(default)]
    pub new_status: Option<WorkOrderStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCheckIn {
    pub id: String,
    pub data: CheckInPayload,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkReportRecord {
    pub work_order_id: String,
    pub order_number: String,
    pub technician_id: String,
    pub technician_name: String,
    pub work_description: String,
    #[serde(default)]
    pub materials_used: String,
    #[serde(default)]
    pub elapsed_minutes: u32,
    #[serde(default)]
    pub problems_found: String,
    #[serde(default)]
    pub recommendations: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPayload {
    pub report: WorkReportRecord,
    pub order_id: String,
    #[serde(default)]
    pub update_order_status: bool,
    #[serde(default)]
    pub new_status: Option<WorkOrderStatus>,
    /// Departure event created together with the report
    #[serde(default)]
    pub check_out: Option<CheckInRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingReport {
    pub id: String,
    pub data: ReportPayload,
    pub saved_at: DateTime<Utc>,
}

/// Aggregate pending counts shown as a badge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCounts {
    pub photos: usize,
    pub check_ins: usize,
    pub reports: usize,
    pub total: usize,
}

impl PendingCounts {
    pub fn new(photos: usize, check_ins: usize, reports: usize) -> Self {
        Self {
            photos,
            check_ins,
            reports,
            total: photos + check_ins + reports,
        }
    }

    pub fn get(&self, kind: QueueKind) -> usize {
        match kind {
            QueueKind::Photos => self.photos,
            QueueKind::CheckIns => self.check_ins,
            QueueKind::Reports => self.reports,
        }
    }
}

/// Implemented by every queued item type
pub trait PendingItem: Serialize + serde::de::DeserializeOwned + Clone {
    const KIND: QueueKind;

    fn id(&self) -> &str;
}

impl PendingItem for PendingPhoto {
    const KIND: QueueKind = QueueKind::Photos;

    fn id(&self) -> &str {
        &self.id
    }
}

impl PendingItem for PendingCheckIn {
    const KIND: QueueKind = QueueKind::CheckIns;

    fn id(&self) -> &str {
        &self.id
    }
}

impl PendingItem for PendingReport {
    const KIND: QueueKind = QueueKind::Reports;

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_total() {
        let counts = PendingCounts::new(2, 1, 0);
        assert_eq!(counts.total, 3);
        assert_eq!(counts.get(QueueKind::Photos), 2);
        assert_eq!(counts.get(QueueKind::Reports), 0);
    }

    #[test]
    fn test_storage_keys_are_distinct() {
        let keys: std::collections::HashSet<_> =
            QueueKind::ALL.iter().map(|k| k.storage_key()).collect();
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn test_report_without_checkout_deserializes() {
        let json = r#"{
            "report": {
                "work_order_id": "wo-1",
                "order_number": "OT-001",
                "technician_id": "t-1",
                "technician_name": "Ana",
                "work_description": "Replaced filter"
            },
            "order_id": "wo-1"
        }"#;
        let payload: ReportPayload = serde_json::from_str(json).unwrap();
        assert!(payload.check_out.is_none());
        assert!(!payload.update_order_status);
        assert_eq!(payload.report.elapsed_minutes, 0);
    }

    #[test]
    fn test_photo_category_defaults_to_during() {
        let json = r#"{
            "work_order_id": null,
            "order_number": null,
            "technician_id": "t-1",
            "technician_name": "Ana"
        }"#;
        let metadata: PhotoMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.category, PhotoCategory::During);
        assert_eq!(PhotoCategory::default(), PhotoCategory::During);
    }
}
