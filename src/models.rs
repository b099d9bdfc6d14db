use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::error::CloudStorageError;
use crate::metadata::MetaData;

/// Backend discriminant. Also embedded in signed payloads so tokens cannot be
/// replayed against a different backend sharing the same secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DriverName {
    Azure,
    Cloudfiles,
    Googlestorage,
    Local,
    Minio,
    S3,
}

impl DriverName {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverName::Azure => "AZURE",
            DriverName::Cloudfiles => "CLOUDFILES",
            DriverName::Googlestorage => "GOOGLESTORAGE",
            DriverName::Local => "LOCAL",
            DriverName::Minio => "MINIO",
            DriverName::S3 => "S3",
        }
    }
}

impl fmt::Display for DriverName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverName {
    type Err = CloudStorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "AZURE" => Ok(DriverName::Azure),
            "CLOUDFILES" => Ok(DriverName::Cloudfiles),
            "GOOGLESTORAGE" | "GOOGLE" | "GCS" => Ok(DriverName::Googlestorage),
            "LOCAL" => Ok(DriverName::Local),
            "MINIO" => Ok(DriverName::Minio),
            "S3" => Ok(DriverName::S3),
            _ => Err(CloudStorageError::backend(format!(
                "Driver '{s}' does not exist."
            ))),
        }
    }
}

/// Container state as reported by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub meta_data: MetaData,
    #[serde(default)]
    pub acl: Option<String>,
}

/// Blob state as reported by a backend. Identity is `(container, name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobRecord {
    pub container: String,
    pub name: String,
    pub size: u64,
    pub checksum: String,
    pub etag: String,
    pub content_type: Option<String>,
    #[serde(default)]
    pub content_disposition: Option<String>,
    #[serde(default)]
    pub cache_control: Option<String>,
    #[serde(default)]
    pub acl: Option<String>,
    #[serde(default)]
    pub meta_data: MetaData,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Content handed to an upload.
pub enum BlobSource {
    /// A file on the local filesystem.
    Path(PathBuf),
    /// An in-memory buffer, optionally carrying a file name.
    Bytes { data: Bytes, name: Option<String> },
    /// Any async byte stream, optionally carrying a file name.
    Reader {
        reader: Box<dyn AsyncRead + Send + Unpin>,
        name: Option<String>,
    },
}

impl BlobSource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        BlobSource::Path(path.into())
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        BlobSource::Bytes {
            data: data.into(),
            name: None,
        }
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        BlobSource::Reader {
            reader: Box::new(reader),
            name: None,
        }
    }

    /// Attach a file name used to derive the blob name and content type.
    pub fn with_name(self, file_name: impl Into<String>) -> Self {
        match self {
            BlobSource::Path(path) => BlobSource::Path(path),
            BlobSource::Bytes { data, .. } => BlobSource::Bytes {
                data,
                name: Some(file_name.into()),
            },
            BlobSource::Reader { reader, .. } => BlobSource::Reader {
                reader,
                name: Some(file_name.into()),
            },
        }
    }

    /// Base name of the source, if it has one.
    pub fn file_name(&self) -> Option<String> {
        let raw = match self {
            BlobSource::Path(path) => {
                return path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
            }
            BlobSource::Bytes { name, .. } | BlobSource::Reader { name, .. } => name.as_deref()?,
        };
        raw.rsplit(['/', '\\'])
            .next()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }

    /// Open the source as a stream.
    pub async fn into_reader(self) -> Result<Box<dyn AsyncRead + Send + Unpin>, CloudStorageError> {
        match self {
            BlobSource::Path(path) => {
                let file = tokio::fs::File::open(&path).await.map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        CloudStorageError::NotFound(format!(
                            "Source file '{}' not found.",
                            path.display()
                        ))
                    } else {
                        CloudStorageError::Io(e)
                    }
                })?;
                Ok(Box::new(file))
            }
            BlobSource::Bytes { data, .. } => Ok(Box::new(std::io::Cursor::new(data))),
            BlobSource::Reader { reader, .. } => Ok(reader),
        }
    }
}

impl fmt::Debug for BlobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            BlobSource::Bytes { data, name } => f
                .debug_struct("Bytes")
                .field("len", &data.len())
                .field("name", name)
                .finish(),
            BlobSource::Reader { name, .. } => {
                f.debug_struct("Reader").field("name", name).finish()
            }
        }
    }
}

impl From<PathBuf> for BlobSource {
    fn from(path: PathBuf) -> Self {
        BlobSource::Path(path)
    }
}

impl From<Bytes> for BlobSource {
    fn from(data: Bytes) -> Self {
        BlobSource::from_bytes(data)
    }
}

impl From<Vec<u8>> for BlobSource {
    fn from(data: Vec<u8>) -> Self {
        BlobSource::from_bytes(data)
    }
}

/// Options for `Container::upload_blob`.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Defaults to the source's base name.
    pub blob_name: Option<String>,
    pub acl: Option<String>,
    pub meta_data: MetaData,
    /// Guessed from the blob name when absent.
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,
}

/// Constraints baked into a delegated upload.
#[derive(Debug, Clone, Default)]
pub struct UploadUrlOptions {
    pub acl: Option<String>,
    pub meta_data: MetaData,
    pub content_disposition: Option<String>,
    /// Stored with the uploaded blob and served as `Cache-Control`.
    pub cache_control: Option<String>,
    /// Inclusive `(min, max)` size range in bytes.
    pub content_length: Option<(u64, u64)>,
    pub content_type: Option<String>,
}

/// Descriptor for a delegated multipart-form POST upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormPost {
    pub url: String,
    pub fields: BTreeMap<String, String>,
}
