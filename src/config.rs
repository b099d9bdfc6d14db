use std::path::PathBuf;

use thiserror::Error;

use crate::drivers::{GoogleConfig, LocalConfig};
use crate::storage::DriverConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub storage: StorageConfig,
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StorageBackend {
    Google,
    Local,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the local driver
    pub local_storage_path: String,
    /// Secret for signed tokens (local driver). Signing is disabled without it.
    pub secret: Option<String>,
    pub salt: Option<String>,
    /// Externally reachable base URL of this service, used in upload forms
    pub public_url: String,
    pub gcs_project: Option<String>,
    /// Path to a GCS service account JSON (optional, defaults to the metadata server)
    pub gcs_credentials_file: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            local_storage_path: "./files".to_string(),
            secret: None,
            salt: None,
            public_url: "http://localhost:8080".to_string(),
            gcs_project: None,
            gcs_credentials_file: None,
        }
    }
}

impl StorageConfig {
    /// Driver settings for [`crate::Storage::connect`].
    pub fn driver_config(&self) -> DriverConfig {
        match self.backend {
            StorageBackend::Local => {
                let mut local = LocalConfig::new(&self.local_storage_path)
                    .with_endpoint(self.public_url.clone());
                local.secret = self.secret.clone();
                local.salt = self.salt.clone();
                DriverConfig::Local(local)
            }
            StorageBackend::Google => DriverConfig::Google(GoogleConfig {
                project: self.gcs_project.clone(),
                credentials_file: self.gcs_credentials_file.as_ref().map(PathBuf::from),
                endpoint: None,
            }),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let max_upload_size = std::env::var("MAX_UPLOAD_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(50 * 1024 * 1024); // 50MB

        let backend = match std::env::var("STORAGE_DRIVER")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "local" => StorageBackend::Local,
            "google" | "gcs" | "googlestorage" => StorageBackend::Google,
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Unsupported STORAGE_DRIVER '{other}' (expected local or google)"
                )))
            }
        };

        let local_storage_path =
            std::env::var("LOCAL_STORAGE_PATH").unwrap_or_else(|_| "./files".to_string());

        let secret = std::env::var("STORAGE_SECRET").ok().filter(|s| !s.is_empty());
        let salt = std::env::var("STORAGE_SALT").ok().filter(|s| !s.is_empty());

        let public_url = std::env::var("PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://{}", bind_address.replace("0.0.0.0", "localhost")));

        let gcs_project = std::env::var("GCS_PROJECT").ok();
        let gcs_credentials_file = std::env::var("GCS_CREDENTIALS_FILE").ok();

        let config = Config {
            bind_address,
            storage: StorageConfig {
                backend,
                local_storage_path,
                secret,
                salt,
                public_url,
                gcs_project,
                gcs_credentials_file,
            },
            max_upload_size,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_address.is_empty() {
            return Err(ConfigError::ValidationError(
                "BIND_ADDRESS cannot be empty".to_string(),
            ));
        }

        if self.max_upload_size == 0 {
            return Err(ConfigError::ValidationError(
                "MAX_UPLOAD_SIZE must be greater than zero".to_string(),
            ));
        }

        match self.storage.backend {
            StorageBackend::Local => {
                if self.storage.local_storage_path.is_empty() {
                    return Err(ConfigError::ValidationError(
                        "LOCAL_STORAGE_PATH cannot be empty".to_string(),
                    ));
                }
                if self.storage.secret.is_none() {
                    tracing::warn!(
                        "STORAGE_SECRET is not set. Signed upload and download URLs are disabled."
                    );
                }
            }
            StorageBackend::Google => {
                if self.storage.gcs_project.is_none() && self.storage.gcs_credentials_file.is_none()
                {
                    return Err(ConfigError::ValidationError(
                        "GCS_PROJECT or GCS_CREDENTIALS_FILE is required when STORAGE_DRIVER=google"
                            .to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(storage: StorageConfig) -> Config {
        Config {
            bind_address: "127.0.0.1:0".to_string(),
            storage,
            max_upload_size: 1024,
        }
    }

    #[test]
    fn test_google_requires_project_or_credentials() {
        let storage = StorageConfig {
            backend: StorageBackend::Google,
            ..Default::default()
        };
        assert!(config(storage.clone()).validate().is_err());

        let storage = StorageConfig {
            gcs_project: Some("demo".to_string()),
            ..storage
        };
        assert!(config(storage).validate().is_ok());
    }

    #[test]
    fn test_local_driver_config() {
        let storage = StorageConfig {
            secret: Some("s3cr3t".to_string()),
            public_url: "https://files.example.com".to_string(),
            ..Default::default()
        };
        match storage.driver_config() {
            DriverConfig::Local(local) => {
                assert_eq!(local.key, PathBuf::from("./files"));
                assert_eq!(local.secret.as_deref(), Some("s3cr3t"));
                assert_eq!(local.endpoint, "https://files.example.com");
            }
            other => panic!("unexpected driver config: {other:?}"),
        }
    }

    #[test]
    fn test_zero_upload_size_is_rejected() {
        let mut config = config(StorageConfig::default());
        config.max_upload_size = 0;
        assert!(config.validate().is_err());
    }
}
