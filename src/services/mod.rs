pub mod connectivity;
pub mod export_service;
pub mod field_actions;
pub mod geolocation;
pub mod remote;
pub mod retry_policy;
pub mod settings_service;
pub mod submission;
pub mod sync_orchestrator;

pub use connectivity::{ConnectivityMonitor, ConnectivitySubscription};
pub use geolocation::{GeolocationProvider, Position};
pub use remote::{FileStorage, RemoteData, RemoteTable, UploadOutcome};
pub use retry_policy::RetryPolicy;
pub use sync_orchestrator::{SyncOrchestrator, SyncOutcome, SyncTrigger};
