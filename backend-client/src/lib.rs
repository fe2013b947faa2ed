//! # Backend Client
//!
//! A small REST client for the hosted backend used by the field-service app.
//!
//! This crate provides:
//! - Row insert, update and equality-filtered select on REST tables
//! - Object uploads to a storage bucket, returning public URLs
//! - Password sign-in
//! - A health endpoint probe for connectivity checks
//!
//! ## Separation of Concerns
//!
//! This crate knows nothing about the offline queue. The application adapts
//! [`BackendClient`] to its own remote interfaces and decides what to retry.
//! Connection failures surface as [`BackendError::Offline`] so callers can
//! tell "not reachable" apart from a rejected request.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use backend_client::{BackendClient, BackendConfig};
//!
//! let config = BackendConfig::new(url, api_key, "photos".to_string());
//! let client = BackendClient::new(config)?;
//! let session = client.sign_in("tech@example.com", "secret").await?;
//! ```

pub mod models;
pub mod service;

pub use models::{BackendConfig, Session, UploadedFile};
pub use service::{object_path, BackendClient, BackendError};
