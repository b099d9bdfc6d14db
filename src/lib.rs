//! cloud-storage - A unified API over object storage backends
//!
//! This crate gives callers one vocabulary (driver, container, blob) for:
//! - A local filesystem driver with atomic writes and xattr-backed metadata
//! - A Google Cloud Storage driver with native V4 signed URLs
//! - HMAC-signed, expiring tokens for delegated uploads and downloads
//! - An HTTP service that redeems those tokens for the local driver

pub mod api;
pub mod blob;
pub mod config;
pub mod container;
pub mod drivers;
pub mod error;
pub mod helpers;
pub mod metadata;
pub mod models;
pub mod signature;
pub mod storage;
#[cfg(test)]
pub mod testutil;

pub use blob::Blob;
pub use container::Container;
pub use drivers::{Driver, GoogleConfig, GoogleStorageDriver, LocalConfig, LocalDriver};
pub use error::{CloudStorageError, Result};
pub use metadata::MetaData;
pub use models::{BlobSource, DriverName, FormPost, UploadOptions, UploadUrlOptions};
pub use signature::{Method, SignedPayload, Signer};
pub use storage::{DriverConfig, Storage};

use config::Config;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub storage: Storage,
}
