mod attributes;
mod google;
mod local;

pub use google::{GoogleConfig, GoogleStorageDriver};
pub use local::{LocalConfig, LocalDriver};

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use crate::error::{messages, CloudStorageError};
use crate::metadata::MetaData;
use crate::models::{
    BlobRecord, BlobSource, ContainerRecord, DriverName, FormPost, UploadOptions,
    UploadUrlOptions,
};
use crate::signature::SignedPayload;

/// Capability set every storage backend implements.
///
/// Drivers address containers and blobs by name and return plain records;
/// [`crate::Storage`] wraps those into entities that carry a handle back to
/// the driver. Backend-native failures must be translated into
/// [`CloudStorageError`] before they leave a driver.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Canonical backend name, also embedded in signed tokens.
    fn name(&self) -> DriverName;

    fn regions(&self) -> Vec<String> {
        Vec::new()
    }

    /// Lightweight round-trip that fails with `Credentials` when
    /// authentication is rejected.
    async fn validate_credentials(&self) -> Result<(), CloudStorageError>;

    /// Fails when the name is already taken.
    async fn create_container(
        &self,
        name: &str,
        acl: Option<&str>,
        meta_data: &MetaData,
    ) -> Result<ContainerRecord, CloudStorageError>;

    async fn get_container(&self, name: &str) -> Result<ContainerRecord, CloudStorageError>;

    async fn get_containers(&self) -> Result<Vec<ContainerRecord>, CloudStorageError>;

    /// Implementations call [`ensure_empty`] before touching the backend.
    async fn delete_container(&self, name: &str) -> Result<(), CloudStorageError>;

    /// Whether the container holds no blobs.
    async fn is_container_empty(&self, name: &str) -> Result<bool, CloudStorageError> {
        Ok(self.get_blobs(name).await?.is_empty())
    }

    fn container_cdn_url(&self, name: &str) -> Result<String, CloudStorageError>;

    /// Returns `false` when the backend has no CDN concept.
    async fn enable_container_cdn(&self, name: &str) -> Result<bool, CloudStorageError>;

    async fn disable_container_cdn(&self, name: &str) -> Result<bool, CloudStorageError>;

    /// Store `source` and return the blob as the backend now reports it.
    async fn upload_blob(
        &self,
        container: &str,
        source: BlobSource,
        options: UploadOptions,
    ) -> Result<BlobRecord, CloudStorageError>;

    async fn get_blob(
        &self,
        container: &str,
        blob_name: &str,
    ) -> Result<BlobRecord, CloudStorageError>;

    async fn get_blobs(&self, container: &str) -> Result<Vec<BlobRecord>, CloudStorageError>;

    /// Stream the blob's content into `writer` in bounded chunks.
    async fn download_blob(
        &self,
        blob: &BlobRecord,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, CloudStorageError>;

    async fn delete_blob(&self, blob: &BlobRecord) -> Result<(), CloudStorageError>;

    fn blob_cdn_url(&self, blob: &BlobRecord) -> Result<String, CloudStorageError>;

    async fn generate_container_upload_url(
        &self,
        container: &str,
        blob_name: &str,
        expires: i64,
        options: UploadUrlOptions,
    ) -> Result<FormPost, CloudStorageError>;

    async fn generate_blob_download_url(
        &self,
        blob: &BlobRecord,
        expires: i64,
        content_disposition: Option<&str>,
    ) -> Result<String, CloudStorageError>;

    /// Decode a token issued by this driver. Backends with native signing
    /// verify server-side and keep this default.
    async fn validate_signature(
        &self,
        _signature: &str,
    ) -> Result<SignedPayload, CloudStorageError> {
        Err(CloudStorageError::backend(format!(
            "Driver {} does not validate signatures locally.",
            self.name()
        )))
    }
}

/// Fail with `NotEmpty` unless the container holds no blobs.
pub async fn ensure_empty<D>(driver: &D, container: &str) -> Result<(), CloudStorageError>
where
    D: Driver + ?Sized,
{
    if driver.is_container_empty(container).await? {
        Ok(())
    } else {
        Err(CloudStorageError::NotEmpty(messages::container_not_empty(
            container,
        )))
    }
}
