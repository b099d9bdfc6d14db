use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures surfaced by every driver. Backend-native errors are translated
/// into these variants at the driver boundary.
#[derive(Debug, Error)]
pub enum CloudStorageError {
    /// Referenced container or blob does not exist.
    #[error("{0}")]
    NotFound(String),
    /// Container deletion attempted while it still holds blobs.
    #[error("{0}")]
    NotEmpty(String),
    /// Authentication was rejected or the credentials are unusable.
    #[error("Invalid credentials: {0}")]
    Credentials(String),
    /// Token MAC did not verify or the token could not be decoded.
    #[error("Bad signature: {0}")]
    Signature(String),
    #[error("The signature has expired.")]
    SignatureExpired,
    #[error("{message}")]
    Backend {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T, E = CloudStorageError> = std::result::Result<T, E>;

impl CloudStorageError {
    pub fn backend(message: impl Into<String>) -> Self {
        CloudStorageError::Backend {
            message: message.into(),
            source: None,
        }
    }

    pub fn backend_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CloudStorageError::Backend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudStorageError::NotFound(_))
    }
}

/// Standardized error messages shared by the drivers.
pub(crate) mod messages {
    pub fn blob_not_found(blob: &str, container: &str) -> String {
        format!("Blob '{blob}' not found in container '{container}'.")
    }

    pub fn container_not_found(container: &str) -> String {
        format!("Container '{container}' not found.")
    }

    pub fn container_exists(container: &str) -> String {
        format!("Container '{container}' already exists.")
    }

    pub fn container_not_empty(container: &str) -> String {
        format!("Container '{container}' is not empty.")
    }

    pub const CONTAINER_NAME_INVALID: &str = "Invalid container name.";
    pub const NO_SIGNING_SECRET: &str = "Driver has no signing secret configured.";
}
