use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::io::AsyncWrite;

use crate::container::Container;
use crate::drivers::Driver;
use crate::error::CloudStorageError;
use crate::helpers::disposition_file_name;
use crate::metadata::MetaData;
use crate::models::BlobRecord;

/// One stored object.
///
/// A `Blob` is a snapshot of backend state plus a handle to the driver that
/// produced it. It never changes after construction; re-fetch through
/// [`Container::get_blob`] to observe newer state. Once deleted, operations
/// that reach the backend fail with `NotFound`.
#[derive(Clone)]
pub struct Blob {
    record: BlobRecord,
    driver: Arc<dyn Driver>,
}

impl Blob {
    pub(crate) fn new(record: BlobRecord, driver: Arc<dyn Driver>) -> Self {
        Self { record, driver }
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn container_name(&self) -> &str {
        &self.record.container
    }

    pub fn size(&self) -> u64 {
        self.record.size
    }

    pub fn checksum(&self) -> &str {
        &self.record.checksum
    }

    pub fn etag(&self) -> &str {
        &self.record.etag
    }

    pub fn content_type(&self) -> Option<&str> {
        self.record.content_type.as_deref()
    }

    pub fn content_disposition(&self) -> Option<&str> {
        self.record.content_disposition.as_deref()
    }

    pub fn cache_control(&self) -> Option<&str> {
        self.record.cache_control.as_deref()
    }

    pub fn acl(&self) -> Option<&str> {
        self.record.acl.as_deref()
    }

    pub fn meta_data(&self) -> &MetaData {
        &self.record.meta_data
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.record.created_at
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.record.modified_at
    }

    pub fn record(&self) -> &BlobRecord {
        &self.record
    }

    /// `container/name`.
    pub fn path(&self) -> String {
        format!("{}/{}", self.record.container, self.record.name)
    }

    /// Look up the owning container.
    pub async fn container(&self) -> Result<Container, CloudStorageError> {
        let record = self.driver.get_container(&self.record.container).await?;
        Ok(Container::new(record, Arc::clone(&self.driver)))
    }

    /// Stream the content into `writer`, returning the byte count.
    pub async fn download<W>(&self, writer: &mut W) -> Result<u64, CloudStorageError>
    where
        W: AsyncWrite + Send + Unpin,
    {
        self.driver.download_blob(&self.record, writer).await
    }

    /// Download into a file. When `destination` is an existing directory the
    /// file is named after the blob. Returns the path written.
    pub async fn download_to_path(
        &self,
        destination: impl AsRef<Path>,
    ) -> Result<PathBuf, CloudStorageError> {
        let mut path = destination.as_ref().to_path_buf();
        if tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
        {
            path.push(self.file_name());
        }

        let mut file = tokio::fs::File::create(&path).await?;
        if let Err(e) = self.download(&mut file).await {
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }
        Ok(path)
    }

    /// File name used when downloading into a directory: the disposition's
    /// `filename` if present, else the last segment of the blob name.
    fn file_name(&self) -> String {
        self.record
            .content_disposition
            .as_deref()
            .and_then(disposition_file_name)
            .unwrap_or_else(|| {
                self.record
                    .name
                    .rsplit('/')
                    .next()
                    .unwrap_or(&self.record.name)
                    .to_string()
            })
    }

    pub async fn delete(&self) -> Result<(), CloudStorageError> {
        self.driver.delete_blob(&self.record).await
    }

    pub fn cdn_url(&self) -> Result<String, CloudStorageError> {
        self.driver.blob_cdn_url(&self.record)
    }

    /// Mint a retrieval credential valid for `expires` seconds.
    pub async fn generate_download_url(
        &self,
        expires: i64,
        content_disposition: Option<&str>,
    ) -> Result<String, CloudStorageError> {
        self.driver
            .generate_blob_download_url(&self.record, expires, content_disposition)
            .await
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("container", &self.record.container)
            .field("name", &self.record.name)
            .field("size", &self.record.size)
            .field("driver", &self.driver.name())
            .finish()
    }
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        self.record.container == other.record.container && self.record.name == other.record.name
    }
}

impl Eq for Blob {}

impl Hash for Blob {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.record.container.hash(state);
        self.record.name.hash(state);
    }
}
