use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::blob::Blob;
use crate::drivers::Driver;
use crate::error::CloudStorageError;
use crate::metadata::MetaData;
use crate::models::{BlobSource, ContainerRecord, FormPost, UploadOptions, UploadUrlOptions};

/// A named bucket of blobs within one driver's namespace.
#[derive(Clone)]
pub struct Container {
    record: ContainerRecord,
    driver: Arc<dyn Driver>,
}

impl Container {
    pub(crate) fn new(record: ContainerRecord, driver: Arc<dyn Driver>) -> Self {
        Self { record, driver }
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.record.created_at
    }

    pub fn meta_data(&self) -> &MetaData {
        &self.record.meta_data
    }

    pub fn acl(&self) -> Option<&str> {
        self.record.acl.as_deref()
    }

    pub fn record(&self) -> &ContainerRecord {
        &self.record
    }

    fn wrap(&self, record: crate::models::BlobRecord) -> Blob {
        Blob::new(record, Arc::clone(&self.driver))
    }

    /// Every blob currently in the container. Each call re-queries the backend.
    pub async fn blobs(&self) -> Result<Vec<Blob>, CloudStorageError> {
        Ok(self
            .driver
            .get_blobs(&self.record.name)
            .await?
            .into_iter()
            .map(|record| self.wrap(record))
            .collect())
    }

    pub async fn get_blob(&self, blob_name: &str) -> Result<Blob, CloudStorageError> {
        let record = self.driver.get_blob(&self.record.name, blob_name).await?;
        Ok(self.wrap(record))
    }

    /// Upload `source`, overwriting any blob with the same name.
    pub async fn upload_blob(
        &self,
        source: impl Into<BlobSource>,
        options: UploadOptions,
    ) -> Result<Blob, CloudStorageError> {
        let record = self
            .driver
            .upload_blob(&self.record.name, source.into(), options)
            .await?;
        Ok(self.wrap(record))
    }

    pub async fn contains(&self, blob_name: &str) -> Result<bool, CloudStorageError> {
        match self.driver.get_blob(&self.record.name, blob_name).await {
            Ok(_) => Ok(true),
            Err(CloudStorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Whether `blob` belongs to this container and still exists.
    pub async fn contains_blob(&self, blob: &Blob) -> Result<bool, CloudStorageError> {
        if blob.container_name() != self.record.name {
            return Ok(false);
        }
        self.contains(blob.name()).await
    }

    /// Descriptor for a delegated upload of `blob_name`, valid for `expires`
    /// seconds.
    pub async fn generate_upload_url(
        &self,
        blob_name: &str,
        expires: i64,
        options: UploadUrlOptions,
    ) -> Result<FormPost, CloudStorageError> {
        self.driver
            .generate_container_upload_url(&self.record.name, blob_name, expires, options)
            .await
    }

    pub fn cdn_url(&self) -> Result<String, CloudStorageError> {
        self.driver.container_cdn_url(&self.record.name)
    }

    pub async fn enable_cdn(&self) -> Result<bool, CloudStorageError> {
        self.driver.enable_container_cdn(&self.record.name).await
    }

    pub async fn disable_cdn(&self) -> Result<bool, CloudStorageError> {
        self.driver.disable_container_cdn(&self.record.name).await
    }

    /// Fails with `NotEmpty` while blobs remain.
    pub async fn delete(&self) -> Result<(), CloudStorageError> {
        self.driver.delete_container(&self.record.name).await
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.record.name)
            .field("driver", &self.driver.name())
            .finish()
    }
}

impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        self.record.name == other.record.name && self.driver.name() == other.driver.name()
    }
}

impl Eq for Container {}

impl Hash for Container {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.record.name.hash(state);
    }
}
