//! Typed, kind-specific facade over the [`QueueStore`]
//!
//! All mutations of the queues go through this type. Each enqueue and remove
//! is a single read-modify-write under the store lock, and the pending
//! counts are republished after every mutation. Mutations match stored
//! entries by their `id` field only, so an entry that no longer parses is
//! kept until it is removed by id or its queue is cleared.

use crate::codec;
use crate::error::QueueResult;
use crate::models::{
    CheckInPayload, PendingCheckIn, PendingCounts, PendingItem, PendingPhoto, PendingReport,
    PhotoMetadata, QueueKind, ReportPayload,
};
use crate::store::QueueStore;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;

pub struct OfflineQueue {
    store: Arc<QueueStore>,
    counts_tx: watch::Sender<PendingCounts>,
}

impl OfflineQueue {
    pub fn new(store: Arc<QueueStore>) -> Self {
        let (counts_tx, _rx) = watch::channel(PendingCounts::default());
        let queue = Self { store, counts_tx };
        queue.refresh_counts();
        queue
    }

    pub fn store(&self) -> &Arc<QueueStore> {
        &self.store
    }

    /// Queues a captured photo. Returns the generated item id.
    pub fn enqueue_photo(
        &self,
        bytes: &[u8],
        file_name: &str,
        mime_type: &str,
        metadata: PhotoMetadata,
    ) -> QueueResult<String> {
        let photo = PendingPhoto {
            id: generate_id(QueueKind::Photos),
            encoded_payload: codec::encode(bytes),
            file_name: file_name.to_string(),
            mime_type: mime_type.to_string(),
            checksum: Some(codec::checksum(bytes)),
            metadata,
            saved_at: Utc::now(),
        };
        self.push(photo)
    }

    pub fn enqueue_check_in(&self, data: CheckInPayload) -> QueueResult<String> {
        self.push(PendingCheckIn {
            id: generate_id(QueueKind::CheckIns),
            data,
            saved_at: Utc::now(),
        })
    }

    pub fn enqueue_report(&self, data: ReportPayload) -> QueueResult<String> {
        self.push(PendingReport {
            id: generate_id(QueueKind::Reports),
            data,
            saved_at: Utc::now(),
        })
    }

    /// Items of one kind, oldest first
    pub fn list<T: PendingItem>(&self) -> Vec<T> {
        self.store.read(T::KIND)
    }

    pub fn photos(&self) -> Vec<PendingPhoto> {
        self.list()
    }

    pub fn check_ins(&self) -> Vec<PendingCheckIn> {
        self.list()
    }

    pub fn reports(&self) -> Vec<PendingReport> {
        self.list()
    }

    /// Removes an item by id. Removing an unknown id is a no-op.
    pub fn remove<T: PendingItem>(&self, id: &str) -> QueueResult<bool> {
        let removed = self.store.modify(T::KIND, |entries| {
            let before = entries.len();
            entries.retain(|entry| entry_id(entry) != Some(id));
            before != entries.len()
        })?;

        if removed {
            log::info!("Removed {} from {} queue", id, T::KIND);
        } else {
            log::debug!("{} not present in {} queue", id, T::KIND);
        }
        self.refresh_counts();
        Ok(removed)
    }

    pub fn remove_photo(&self, id: &str) -> QueueResult<bool> {
        self.remove::<PendingPhoto>(id)
    }

    pub fn remove_check_in(&self, id: &str) -> QueueResult<bool> {
        self.remove::<PendingCheckIn>(id)
    }

    pub fn remove_report(&self, id: &str) -> QueueResult<bool> {
        self.remove::<PendingReport>(id)
    }

    /// Reads all three queues
    pub fn counts(&self) -> PendingCounts {
        PendingCounts::new(
            self.photos().len(),
            self.check_ins().len(),
            self.reports().len(),
        )
    }

    pub fn has_pending(&self) -> bool {
        self.counts().total > 0
    }

    /// Receives fresh counts after every enqueue and remove
    pub fn subscribe_counts(&self) -> watch::Receiver<PendingCounts> {
        self.counts_tx.subscribe()
    }

    /// Drops every item of one kind. Returns how many were discarded.
    pub fn clear(&self, kind: QueueKind) -> QueueResult<usize> {
        let discarded = self.store.modify(kind, |entries| {
            let len = entries.len();
            entries.clear();
            len
        })?;
        log::warn!("Cleared {} items from {} queue", discarded, kind);
        self.refresh_counts();
        Ok(discarded)
    }

    /// Appends previously exported items, skipping ids already queued
    pub fn restore<T: PendingItem>(&self, items: Vec<T>) -> QueueResult<usize> {
        let incoming = items
            .iter()
            .map(|item| -> QueueResult<(String, Value)> {
                Ok((item.id().to_string(), serde_json::to_value(item)?))
            })
            .collect::<QueueResult<Vec<_>>>()?;

        let restored = self.store.modify(T::KIND, |entries| {
            let mut restored = 0;
            for (id, entry) in incoming {
                if entries.iter().any(|e| entry_id(e) == Some(id.as_str())) {
                    continue;
                }
                entries.push(entry);
                restored += 1;
            }
            entries.sort_by_key(entry_saved_at);
            restored
        })?;
        self.refresh_counts();
        Ok(restored)
    }

    fn push<T: PendingItem>(&self, item: T) -> QueueResult<String> {
        let id = item.id().to_string();
        let entry = serde_json::to_value(&item)?;
        let result = self.store.modify(T::KIND, move |entries| entries.push(entry));

        match result {
            Ok(()) => {
                log::info!("Saved {} to {} queue", id, T::KIND);
                self.refresh_counts();
                Ok(id)
            }
            Err(e) => {
                log::error!("Failed to save {} to {} queue: {}", id, T::KIND, e);
                Err(e)
            }
        }
    }

    fn refresh_counts(&self) {
        self.counts_tx.send_replace(self.counts());
    }
}

fn entry_id(entry: &Value) -> Option<&str> {
    entry.get("id").and_then(Value::as_str)
}

/// Entries without a readable timestamp sort first
fn entry_saved_at(entry: &Value) -> Option<DateTime<Utc>> {
    entry
        .get("saved_at")
        .and_then(Value::as_str)
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc))
}

fn generate_id(kind: QueueKind) -> String {
    format!("{}_{}", kind.id_prefix(), ulid::Ulid::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CheckInRecord, CheckKind, PhotoCategory, WorkReportRecord};

    fn queue() -> OfflineQueue {
        OfflineQueue::new(Arc::new(QueueStore::open_in_memory().unwrap()))
    }

    fn metadata() -> PhotoMetadata {
        PhotoMetadata {
            work_order_id: Some("wo-1".to_string()),
            order_number: Some("OT-001".to_string()),
            technician_id: "t-1".to_string(),
            technician_name: "Ana".to_string(),
            category: PhotoCategory::During,
            description: "Panel".to_string(),
            location: None,
        }
    }

    fn check_in() -> CheckInPayload {
        CheckInPayload {
            check_in: CheckInRecord {
                technician_id: "t-1".to_string(),
                technician_name: "Ana".to_string(),
                work_order_id: "wo-1".to_string(),
                order_number: "OT-001".to_string(),
                kind: CheckKind::Arrival,
                latitude: 19.43,
                longitude: -99.13,
                accuracy_m: 12.0,
                distance_from_site_m: Some(40.0),
            },
            order_id: "wo-1".to_string(),
            update_order_status: false,
            new_status: None,
        }
    }

    fn report() -> ReportPayload {
        ReportPayload {
            report: WorkReportRecord {
                work_order_id: "wo-1".to_string(),
                order_number: "OT-001".to_string(),
                technician_id: "t-1".to_string(),
                technician_name: "Ana".to_string(),
                work_description: "Done".to_string(),
                materials_used: String::new(),
                elapsed_minutes: 30,
                problems_found: String::new(),
                recommendations: String::new(),
            },
            order_id: "wo-1".to_string(),
            update_order_status: false,
            new_status: None,
            check_out: None,
        }
    }

    fn assert_consistent(queue: &OfflineQueue) {
        let counts = queue.counts();
        assert_eq!(
            counts.total,
            counts.photos + counts.check_ins + counts.reports
        );
        assert_eq!(
            counts.total,
            queue.photos().len() + queue.check_ins().len() + queue.reports().len()
        );
    }

    #[test]
    fn test_enqueue_assigns_unique_ids_in_order() {
        let queue = queue();
        let a = queue.enqueue_check_in(check_in()).unwrap();
        let b = queue.enqueue_check_in(check_in()).unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("checkin_"));

        let ids: Vec<String> = queue.check_ins().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn test_enqueued_photo_decodes_to_original_bytes() {
        let queue = queue();
        let bytes: Vec<u8> = (0..2048u32).map(|i| (i * 7 % 256) as u8).collect();
        let id = queue
            .enqueue_photo(&bytes, "a.jpg", "image/jpeg", metadata())
            .unwrap();

        let photos = queue.photos();
        assert_eq!(photos.len(), 1);
        assert_eq!(photos[0].id, id);
        let decoded = codec::decode(&photos[0]).unwrap();
        assert_eq!(decoded.bytes, bytes);
    }

    #[test]
    fn test_remove_unknown_id_is_noop() {
        let queue = queue();
        queue.enqueue_report(report()).unwrap();
        assert!(!queue.remove_report("report_missing").unwrap());
        assert_eq!(queue.reports().len(), 1);
    }

    #[test]
    fn test_remove_only_targets_one_item() {
        let queue = queue();
        let a = queue.enqueue_report(report()).unwrap();
        let b = queue.enqueue_report(report()).unwrap();
        assert!(queue.remove_report(&a).unwrap());

        let remaining: Vec<String> = queue.reports().into_iter().map(|r| r.id).collect();
        assert_eq!(remaining, vec![b]);
    }

    #[test]
    fn test_counts_stay_consistent() {
        let queue = queue();
        assert_consistent(&queue);
        queue
            .enqueue_photo(b"x", "a.jpg", "image/jpeg", metadata())
            .unwrap();
        queue
            .enqueue_photo(b"y", "b.jpg", "image/jpeg", metadata())
            .unwrap();
        let c = queue.enqueue_check_in(check_in()).unwrap();
        assert_eq!(queue.counts(), PendingCounts::new(2, 1, 0));
        assert_consistent(&queue);

        queue.remove_check_in(&c).unwrap();
        queue.enqueue_report(report()).unwrap();
        assert_eq!(queue.counts(), PendingCounts::new(2, 0, 1));
        assert_consistent(&queue);
    }

    #[test]
    fn test_storage_full_leaves_no_partial_item() {
        let store = QueueStore::open_in_memory().unwrap().with_quota(16);
        let queue = OfflineQueue::new(Arc::new(store));

        let err = queue.enqueue_check_in(check_in()).unwrap_err();
        assert!(err.is_storage_full());
        assert!(queue.check_ins().is_empty());
        assert_eq!(queue.counts().total, 0);
    }

    #[test]
    fn test_counts_are_published() {
        let queue = queue();
        let rx = queue.subscribe_counts();
        assert_eq!(rx.borrow().total, 0);

        let id = queue.enqueue_check_in(check_in()).unwrap();
        assert_eq!(rx.borrow().check_ins, 1);

        queue.remove_check_in(&id).unwrap();
        assert_eq!(rx.borrow().total, 0);
    }

    #[test]
    fn test_clear_and_restore() {
        let queue = queue();
        queue.enqueue_check_in(check_in()).unwrap();
        queue.enqueue_check_in(check_in()).unwrap();
        let exported = queue.check_ins();

        assert_eq!(queue.clear(QueueKind::CheckIns).unwrap(), 2);
        assert!(queue.check_ins().is_empty());

        assert_eq!(queue.restore(exported.clone()).unwrap(), 2);
        assert_eq!(queue.restore(exported.clone()).unwrap(), 0);
        assert_eq!(queue.check_ins(), exported);
    }

    #[test]
    fn test_unreadable_entries_survive_other_mutations() {
        let queue = queue();
        let kept = queue.enqueue_check_in(check_in()).unwrap();

        let mut entries: Vec<Value> = queue.store().read(QueueKind::CheckIns);
        let mut newer = entries[0].clone();
        newer["id"] = Value::from("checkin_newer");
        newer["data"]["new_status"] = Value::from("on_hold");
        entries.push(newer);
        queue.store().write(QueueKind::CheckIns, &entries).unwrap();
        assert_eq!(queue.check_ins().len(), 1);

        assert!(!queue.remove_check_in("checkin_absent").unwrap());
        queue.enqueue_check_in(check_in()).unwrap();
        assert!(queue.remove_check_in(&kept).unwrap());

        let raw: Vec<Value> = queue.store().read(QueueKind::CheckIns);
        assert_eq!(raw.len(), 2);
        assert!(raw.iter().any(|e| entry_id(e) == Some("checkin_newer")));
        assert_eq!(queue.check_ins().len(), 1);
    }

    #[test]
    fn test_restore_keeps_oldest_first() {
        let queue = queue();
        let first = queue.enqueue_report(report()).unwrap();
        let second = queue.enqueue_report(report()).unwrap();
        let mut exported = queue.reports();
        exported[0].saved_at = exported[1].saved_at - chrono::Duration::seconds(60);

        queue.remove_report(&first).unwrap();
        assert_eq!(queue.restore(exported).unwrap(), 1);

        let ids: Vec<String> = queue.reports().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first, second]);
    }
}
