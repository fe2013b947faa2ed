//! # Offline Queue
//!
//! Durable, device-local queues for field work captured without connectivity.
//!
//! This crate provides:
//! - A SQLite-backed key-value store holding one JSON array per queue kind
//! - A lossless text codec for photo payloads (base64 + SHA-256 check)
//! - A typed queue manager for photos, check-ins and work reports
//! - Photo preparation (MIME detection, recompression of large images)
//!
//! ## Separation of Concerns
//!
//! This crate does **not** talk to the network. Draining the queues against
//! a backend is the job of the application's sync orchestrator, which only
//! mutates the queues through [`OfflineQueue::remove`].
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use offline_queue::{OfflineQueue, QueueStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(QueueStore::new(rusqlite::Connection::open("queue.db")?)?);
//! let queue = OfflineQueue::new(store);
//!
//! let id = queue.enqueue_check_in(payload)?;
//! assert_eq!(queue.counts().check_ins, 1);
//! queue.remove_check_in(&id)?;
//! ```

pub mod codec;
pub mod compress;
pub mod error;
pub mod manager;
pub mod models;
pub mod schema;
pub mod store;

pub use codec::{decode, encode, DecodedPhoto};
pub use compress::{prepare_photo, PreparedPhoto};
pub use error::{QueueError, QueueResult};
pub use manager::OfflineQueue;
pub use models::{
    CheckInPayload, CheckInRecord, CheckKind, GeoPoint, PendingCheckIn, PendingCounts,
    PendingItem, PendingPhoto, PendingReport, PhotoCategory, PhotoMetadata, QueueKind,
    ReportPayload, WorkOrderStatus, WorkReportRecord,
};
pub use schema::init_queue_schema;
pub use store::QueueStore;
