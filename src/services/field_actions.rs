//! Technician actions that go straight to the backend when online and are
//! queued for later sync otherwise.

use crate::config::SyncConfig;
use crate::error::AppError;
use crate::services::connectivity::ConnectivityMonitor;
use crate::services::geolocation::{acquire_position, distance_m, GeolocationProvider, Position};
use crate::services::remote::{FileStorage, RemoteData, RemoteTable};
use crate::services::submission::{self, Deadlines, SyncItemError};
use chrono::{DateTime, Utc};
use offline_queue::{
    prepare_photo, CheckInPayload, CheckInRecord, CheckKind, DecodedPhoto, GeoPoint,
    OfflineQueue, PhotoMetadata, ReportPayload, WorkOrderStatus, WorkReportRecord,
};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct Technician {
    pub id: String,
    pub name: String,
}

/// The work order an action refers to
#[derive(Debug, Clone, PartialEq)]
pub struct WorkSite {
    pub order_id: String,
    pub order_number: String,
    /// Nominal position of the site, if known
    pub location: Option<GeoPoint>,
}

/// Report form as filled in by the technician
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportForm {
    pub work_description: String,
    pub materials_used: String,
    pub elapsed_minutes: u32,
    pub problems_found: String,
    pub recommendations: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Submitted,
    /// Stored offline under this id
    Queued { id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PhotoDelivery {
    Uploaded { file_url: String },
    Queued { id: String },
}

pub struct FieldActions {
    queue: Arc<OfflineQueue>,
    remote: Arc<dyn RemoteData>,
    storage: Arc<dyn FileStorage>,
    geolocation: Arc<dyn GeolocationProvider>,
    connectivity: ConnectivityMonitor,
    config: SyncConfig,
}

impl FieldActions {
    pub fn new(
        queue: Arc<OfflineQueue>,
        remote: Arc<dyn RemoteData>,
        storage: Arc<dyn FileStorage>,
        geolocation: Arc<dyn GeolocationProvider>,
        connectivity: ConnectivityMonitor,
        config: SyncConfig,
    ) -> Self {
        Self {
            queue,
            remote,
            storage,
            geolocation,
            connectivity,
            config,
        }
    }

    fn deadlines(&self) -> Deadlines {
        Deadlines {
            upload: self.config.upload_timeout(),
            record: self.config.record_timeout(),
        }
    }

    /// Uploads a captured photo, or queues it when the backend is unreachable.
    /// Large photos are downscaled first. A missing location is filled in
    /// from GPS when a fix is available within a few seconds.
    pub async fn record_photo(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        mime_type: Option<&str>,
        mut metadata: PhotoMetadata,
    ) -> Result<PhotoDelivery, AppError> {
        if bytes.is_empty() {
            return Err(AppError::Validation("Photo is empty".to_string()));
        }

        let photo = prepare_photo(bytes, file_name, mime_type);

        if metadata.location.is_none() {
            metadata.location =
                acquire_position(self.geolocation.as_ref(), self.config.photo_gps_timeout())
                    .await
                    .map(|p| p.point());
        }

        if !self.connectivity.is_online() {
            return self.queue_photo(&photo.bytes, &photo.file_name, &photo.mime_type, metadata);
        }

        let attempts = self.config.upload_attempts.max(1);
        let mut attempt = 1;
        let file_url = loop {
            let decoded = DecodedPhoto {
                bytes: photo.bytes.clone(),
                file_name: photo.file_name.clone(),
                mime_type: photo.mime_type.clone(),
            };
            match submission::upload_photo(self.storage.as_ref(), decoded, self.config.upload_timeout())
                .await
            {
                Ok(url) => break url,
                Err(e) if e.is_offline() => {
                    log::info!("Storage offline, queueing {}", photo.file_name);
                    return self.queue_photo(
                        &photo.bytes,
                        &photo.file_name,
                        &photo.mime_type,
                        metadata,
                    );
                }
                Err(e) if attempt < attempts => {
                    log::warn!(
                        "Photo upload failed (attempt {}/{}): {}",
                        attempt,
                        attempts,
                        e
                    );
                    tokio::time::sleep(self.config.upload_retry_pause() * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    log::error!("Photo upload failed after {} attempts: {}", attempts, e);
                    return Err(e.into());
                }
            }
        };

        submission::link_photo(
            self.remote.as_ref(),
            &metadata,
            &photo.file_name,
            &file_url,
            self.config.record_timeout(),
        )
        .await?;

        log::info!("Photo {} uploaded", photo.file_name);
        Ok(PhotoDelivery::Uploaded { file_url })
    }

    fn queue_photo(
        &self,
        bytes: &[u8],
        file_name: &str,
        mime_type: &str,
        metadata: PhotoMetadata,
    ) -> Result<PhotoDelivery, AppError> {
        let id = self
            .queue
            .enqueue_photo(bytes, file_name, mime_type, metadata)?;
        log::info!("Photo {} saved offline as {}", file_name, id);
        Ok(PhotoDelivery::Queued { id })
    }

    /// Arrival check-in that moves the order to `in_progress`.
    /// Requires a GPS fix. Positions too far from the site need `confirm_far`.
    pub async fn start_work(
        &self,
        technician: &Technician,
        site: &WorkSite,
        confirm_far: bool,
    ) -> Result<Delivery, AppError> {
        let position =
            acquire_position(self.geolocation.as_ref(), self.config.check_in_gps_timeout())
                .await
                .ok_or(AppError::GeolocationUnavailable)?;

        let record = check_record(technician, site, CheckKind::Arrival, Some(position));
        if let Some(distance) = record.distance_from_site_m {
            if distance > self.config.max_site_distance_m && !confirm_far {
                log::warn!(
                    "Check-in for {} is {:.0} m from the site",
                    site.order_number,
                    distance
                );
                return Err(AppError::TooFarFromSite {
                    distance_m: distance,
                });
            }
        }

        let payload = CheckInPayload {
            check_in: record,
            order_id: site.order_id.clone(),
            update_order_status: true,
            new_status: Some(WorkOrderStatus::InProgress),
        };

        if self.connectivity.is_online() {
            match submission::submit_check_in(self.remote.as_ref(), &payload, self.deadlines()).await
            {
                Ok(()) => return Ok(Delivery::Submitted),
                Err(SyncItemError::StillOffline) => {
                    log::info!("Backend unreachable, queueing check-in")
                }
                Err(e) => return Err(e.into()),
            }
        }

        let id = self.queue.enqueue_check_in(payload)?;
        log::info!("Check-in for {} saved offline as {}", site.order_number, id);
        Ok(Delivery::Queued { id })
    }

    /// Submits the work report together with the departure record and
    /// completes the order. The check-out position is best effort.
    pub async fn submit_report(
        &self,
        technician: &Technician,
        site: &WorkSite,
        form: ReportForm,
    ) -> Result<Delivery, AppError> {
        if form.work_description.trim().is_empty() {
            return Err(AppError::Validation(
                "Please describe the work performed".to_string(),
            ));
        }

        let position =
            acquire_position(self.geolocation.as_ref(), self.config.report_gps_timeout()).await;

        let payload = ReportPayload {
            report: WorkReportRecord {
                work_order_id: site.order_id.clone(),
                order_number: site.order_number.clone(),
                technician_id: technician.id.clone(),
                technician_name: technician.name.clone(),
                work_description: form.work_description.trim().to_string(),
                materials_used: form.materials_used,
                elapsed_minutes: form.elapsed_minutes,
                problems_found: form.problems_found,
                recommendations: form.recommendations,
            },
            order_id: site.order_id.clone(),
            update_order_status: true,
            new_status: Some(WorkOrderStatus::Completed),
            check_out: Some(check_record(
                technician,
                site,
                CheckKind::Departure,
                position,
            )),
        };

        if self.connectivity.is_online() {
            match submission::submit_report(self.remote.as_ref(), &payload, self.deadlines()).await {
                Ok(()) => return Ok(Delivery::Submitted),
                Err(SyncItemError::StillOffline) => {
                    log::info!("Backend unreachable, queueing report")
                }
                Err(e) => return Err(e.into()),
            }
        }

        let id = self.queue.enqueue_report(payload)?;
        log::info!("Report for {} saved offline as {}", site.order_number, id);
        Ok(Delivery::Queued { id })
    }

    /// Minutes since the technician's latest arrival at the order, used to
    /// prefill the report form. `None` when offline or no arrival exists.
    pub async fn elapsed_minutes_since_arrival(
        &self,
        technician_id: &str,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>, AppError> {
        if !self.connectivity.is_online() {
            return Ok(None);
        }

        let conditions = vec![
            ("work_order_id".to_string(), order_id.to_string()),
            ("technician_id".to_string(), technician_id.to_string()),
            ("kind".to_string(), "arrival".to_string()),
        ];
        let rows = match tokio::time::timeout(
            self.config.record_timeout(),
            self.remote.filter(RemoteTable::CheckIns, &conditions),
        )
        .await
        {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) if e.is_offline() => return Ok(None),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                log::warn!("Arrival lookup for {} timed out", order_id);
                return Ok(None);
            }
        };

        let arrival = rows
            .iter()
            .filter_map(|row| row.get("created_at").and_then(|v| v.as_str()))
            .filter_map(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .max();

        Ok(arrival.map(|at| elapsed_minutes(at, now)))
    }
}

/// Whole minutes between `from` and `to`, rounded, never negative
pub fn elapsed_minutes(from: DateTime<Utc>, to: DateTime<Utc>) -> u32 {
    let seconds = (to - from).num_seconds().max(0);
    u32::try_from((seconds + 30) / 60).unwrap_or(u32::MAX)
}

fn check_record(
    technician: &Technician,
    site: &WorkSite,
    kind: CheckKind,
    position: Option<Position>,
) -> CheckInRecord {
    let distance_from_site_m = match (site.location, position) {
        (Some(site), Some(position)) => Some(distance_m(site, position.point())),
        _ => None,
    };
    let position = position.unwrap_or(Position {
        latitude: 0.0,
        longitude: 0.0,
        accuracy_m: 0.0,
    });

    CheckInRecord {
        technician_id: technician.id.clone(),
        technician_name: technician.name.clone(),
        work_order_id: site.order_id.clone(),
        order_number: site.order_number.clone(),
        kind,
        latitude: position.latitude,
        longitude: position.longitude,
        accuracy_m: position.accuracy_m,
        distance_from_site_m,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::geolocation::{FixedPosition, NoGeolocation};
    use crate::services::submission::testing::{Call, Fault, MockBackend};
    use chrono::TimeZone;
    use offline_queue::{PhotoCategory, QueueError, QueueStore};
    use serde_json::json;

    const SITE: GeoPoint = GeoPoint {
        latitude: 19.4326,
        longitude: -99.1332,
    };

    struct Harness {
        queue: Arc<OfflineQueue>,
        backend: Arc<MockBackend>,
        actions: FieldActions,
    }

    fn harness(online: bool, geolocation: Arc<dyn GeolocationProvider>) -> Harness {
        harness_with_store(online, geolocation, QueueStore::open_in_memory().unwrap())
    }

    fn harness_with_store(
        online: bool,
        geolocation: Arc<dyn GeolocationProvider>,
        store: QueueStore,
    ) -> Harness {
        let queue = Arc::new(OfflineQueue::new(Arc::new(store)));
        let backend = Arc::new(MockBackend::new());
        let config = SyncConfig {
            upload_retry_pause_ms: 1,
            ..SyncConfig::default()
        };
        let actions = FieldActions::new(
            queue.clone(),
            backend.clone(),
            backend.clone(),
            geolocation,
            ConnectivityMonitor::new(online),
            config,
        );
        Harness {
            queue,
            backend,
            actions,
        }
    }

    fn at(latitude: f64, longitude: f64) -> Arc<dyn GeolocationProvider> {
        Arc::new(FixedPosition(Position {
            latitude,
            longitude,
            accuracy_m: 12.0,
        }))
    }

    fn technician() -> Technician {
        Technician {
            id: "tech-1".to_string(),
            name: "Ana Ruiz".to_string(),
        }
    }

    fn site() -> WorkSite {
        WorkSite {
            order_id: "wo-1".to_string(),
            order_number: "OT-001".to_string(),
            location: Some(SITE),
        }
    }

    fn metadata() -> PhotoMetadata {
        PhotoMetadata {
            work_order_id: Some("wo-1".to_string()),
            order_number: Some("OT-001".to_string()),
            technician_id: "tech-1".to_string(),
            technician_name: "Ana Ruiz".to_string(),
            category: PhotoCategory::During,
            description: String::new(),
            location: None,
        }
    }

    fn form() -> ReportForm {
        ReportForm {
            work_description: "  Replaced the thermostat ".to_string(),
            elapsed_minutes: 50,
            ..ReportForm::default()
        }
    }

    #[tokio::test]
    async fn test_photo_offline_is_queued_with_location() {
        let h = harness(false, at(19.43, -99.13));

        let result = h
            .actions
            .record_photo(vec![1, 2, 3], "IMG_1.jpg", None, metadata())
            .await
            .unwrap();

        assert!(matches!(result, PhotoDelivery::Queued { .. }));
        let queued = h.queue.photos();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].mime_type, "image/jpeg");
        assert!(queued[0].metadata.location.is_some());
        assert!(h.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_photo_online_uploads_and_links() {
        let h = harness(true, Arc::new(NoGeolocation));

        let result = h
            .actions
            .record_photo(vec![9; 16], "site.png", Some("image/png"), metadata())
            .await
            .unwrap();

        assert_eq!(
            result,
            PhotoDelivery::Uploaded {
                file_url: "https://files.example.com/site.png".to_string()
            }
        );
        assert_eq!(h.backend.creates(RemoteTable::Photos), 1);
        assert!(h.queue.photos().is_empty());
    }

    #[tokio::test]
    async fn test_photo_upload_retries_then_succeeds() {
        let h = harness(true, Arc::new(NoGeolocation));
        h.backend.fail_next_upload(Fault::Reject);
        h.backend.fail_next_upload(Fault::Reject);

        let result = h
            .actions
            .record_photo(vec![1], "a.jpg", None, metadata())
            .await
            .unwrap();

        assert!(matches!(result, PhotoDelivery::Uploaded { .. }));
        assert_eq!(h.backend.uploads(), 3);
    }

    #[tokio::test]
    async fn test_photo_upload_gives_up_after_attempts() {
        let h = harness(true, Arc::new(NoGeolocation));
        for _ in 0..3 {
            h.backend.fail_next_upload(Fault::Reject);
        }

        let result = h
            .actions
            .record_photo(vec![1], "a.jpg", None, metadata())
            .await;

        assert!(matches!(result, Err(AppError::Backend(_))));
        assert_eq!(h.backend.uploads(), 3);
        assert!(h.queue.photos().is_empty());
    }

    #[tokio::test]
    async fn test_photo_storage_offline_is_queued() {
        let h = harness(true, Arc::new(NoGeolocation));
        h.backend.set_upload_offline(true);

        let result = h
            .actions
            .record_photo(vec![1], "a.jpg", None, metadata())
            .await
            .unwrap();

        assert!(matches!(result, PhotoDelivery::Queued { .. }));
        assert_eq!(h.queue.photos().len(), 1);
    }

    #[tokio::test]
    async fn test_photo_storage_full_surfaces_error() {
        let store = QueueStore::open_in_memory().unwrap().with_quota(16);
        let h = harness_with_store(false, Arc::new(NoGeolocation), store);

        let result = h
            .actions
            .record_photo(vec![7; 64], "a.jpg", None, metadata())
            .await;

        match result {
            Err(AppError::Queue(QueueError::StorageFull { .. })) => {}
            other => panic!("expected StorageFull, got {:?}", other),
        }
        assert!(h.queue.photos().is_empty());
    }

    #[tokio::test]
    async fn test_start_work_online_sets_in_progress() {
        let h = harness(true, at(19.4327, -99.1333));

        let result = h
            .actions
            .start_work(&technician(), &site(), false)
            .await
            .unwrap();

        assert_eq!(result, Delivery::Submitted);
        let calls = h.backend.calls();
        assert!(matches!(&calls[0], Call::Create(RemoteTable::CheckIns, v) if v["distance_from_site_m"].as_f64().unwrap() < 50.0));
        assert_eq!(
            calls[1],
            Call::Update(
                RemoteTable::WorkOrders,
                "wo-1".to_string(),
                json!({"status": "in_progress"})
            )
        );
    }

    #[tokio::test]
    async fn test_start_work_far_from_site_needs_confirmation() {
        let h = harness(false, at(19.4400, -99.1332));

        let result = h.actions.start_work(&technician(), &site(), false).await;
        match result {
            Err(AppError::TooFarFromSite { distance_m }) => assert!(distance_m > 500.0),
            other => panic!("expected TooFarFromSite, got {:?}", other),
        }
        assert!(h.queue.check_ins().is_empty());

        let result = h
            .actions
            .start_work(&technician(), &site(), true)
            .await
            .unwrap();
        assert!(matches!(result, Delivery::Queued { .. }));

        let queued = h.queue.check_ins();
        assert_eq!(queued[0].data.new_status, Some(WorkOrderStatus::InProgress));
        assert!(queued[0].data.update_order_status);
    }

    #[tokio::test]
    async fn test_start_work_requires_gps() {
        let h = harness(true, Arc::new(NoGeolocation));
        let result = h.actions.start_work(&technician(), &site(), false).await;
        assert!(matches!(result, Err(AppError::GeolocationUnavailable)));
        assert!(h.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_start_work_backend_offline_is_queued() {
        let h = harness(true, at(19.4326, -99.1332));
        h.backend.fail_next(RemoteTable::CheckIns, Fault::Offline);

        let result = h
            .actions
            .start_work(&technician(), &site(), false)
            .await
            .unwrap();
        assert!(matches!(result, Delivery::Queued { .. }));
        assert_eq!(h.queue.counts().check_ins, 1);
    }

    #[tokio::test]
    async fn test_report_requires_description() {
        let h = harness(true, Arc::new(NoGeolocation));
        let result = h
            .actions
            .submit_report(&technician(), &site(), ReportForm::default())
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_report_offline_embeds_check_out_without_gps() {
        let h = harness(false, Arc::new(NoGeolocation));

        let result = h
            .actions
            .submit_report(&technician(), &site(), form())
            .await
            .unwrap();
        assert!(matches!(result, Delivery::Queued { .. }));

        let queued = h.queue.reports();
        let data = &queued[0].data;
        assert_eq!(data.report.work_description, "Replaced the thermostat");
        assert_eq!(data.new_status, Some(WorkOrderStatus::Completed));
        let check_out = data.check_out.as_ref().unwrap();
        assert_eq!(check_out.kind, CheckKind::Departure);
        assert_eq!(check_out.latitude, 0.0);
        assert_eq!(check_out.distance_from_site_m, None);
    }

    #[tokio::test]
    async fn test_report_online_runs_all_steps() {
        let h = harness(true, at(19.4326, -99.1332));

        let result = h
            .actions
            .submit_report(&technician(), &site(), form())
            .await
            .unwrap();

        assert_eq!(result, Delivery::Submitted);
        assert_eq!(h.backend.creates(RemoteTable::WorkReports), 1);
        assert_eq!(h.backend.creates(RemoteTable::CheckIns), 1);
        assert!(h.queue.reports().is_empty());
    }

    #[tokio::test]
    async fn test_report_rejected_online_is_not_queued() {
        let h = harness(true, Arc::new(NoGeolocation));
        h.backend.fail_next(RemoteTable::WorkReports, Fault::Reject);

        let result = h.actions.submit_report(&technician(), &site(), form()).await;

        assert!(matches!(result, Err(AppError::Backend(_))));
        assert!(h.queue.reports().is_empty());
    }

    #[tokio::test]
    async fn test_elapsed_minutes_from_latest_arrival() {
        let h = harness(true, Arc::new(NoGeolocation));
        *h.backend.rows.lock().unwrap() = vec![
            json!({"created_at": "2026-03-01T08:00:00Z"}),
            json!({"created_at": "2026-03-01T09:15:00+00:00"}),
            json!({"created_at": "garbage"}),
        ];
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 20).unwrap();

        let minutes = h
            .actions
            .elapsed_minutes_since_arrival("tech-1", "wo-1", now)
            .await
            .unwrap();

        assert_eq!(minutes, Some(45));
        assert!(matches!(
            &h.backend.calls()[0],
            Call::Filter(RemoteTable::CheckIns, conditions) if conditions.len() == 3
        ));
    }

    #[tokio::test]
    async fn test_elapsed_minutes_offline_is_none() {
        let h = harness(false, Arc::new(NoGeolocation));
        let minutes = h
            .actions
            .elapsed_minutes_since_arrival("tech-1", "wo-1", Utc::now())
            .await
            .unwrap();
        assert_eq!(minutes, None);
    }

    #[test]
    fn test_elapsed_minutes_rounding() {
        let from = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        assert_eq!(elapsed_minutes(from, from + chrono::Duration::seconds(89)), 1);
        assert_eq!(elapsed_minutes(from, from + chrono::Duration::seconds(90)), 2);
        assert_eq!(elapsed_minutes(from + chrono::Duration::hours(1), from), 0);
    }
}
