use std::fmt;
use std::sync::Arc;

use crate::container::Container;
use crate::drivers::{Driver, GoogleConfig, GoogleStorageDriver, LocalConfig, LocalDriver};
use crate::error::CloudStorageError;
use crate::metadata::MetaData;
use crate::models::DriverName;
use crate::signature::SignedPayload;

/// Connection settings for one of the in-tree drivers.
#[derive(Debug, Clone)]
pub enum DriverConfig {
    Local(LocalConfig),
    Google(GoogleConfig),
}

impl DriverConfig {
    pub fn driver_name(&self) -> DriverName {
        match self {
            DriverConfig::Local(_) => DriverName::Local,
            DriverConfig::Google(_) => DriverName::Googlestorage,
        }
    }
}

/// Entry point to a storage backend. Cheap to clone.
#[derive(Clone)]
pub struct Storage {
    driver: Arc<dyn Driver>,
}

impl Storage {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self { driver }
    }

    pub fn from_driver<D: Driver + 'static>(driver: D) -> Self {
        Self::new(Arc::new(driver))
    }

    /// Build the driver described by `config`.
    pub async fn connect(config: &DriverConfig) -> Result<Self, CloudStorageError> {
        let driver: Arc<dyn Driver> = match config {
            DriverConfig::Local(local) => Arc::new(LocalDriver::new(local.clone())?),
            DriverConfig::Google(google) => Arc::new(GoogleStorageDriver::new(google.clone()).await?),
        };
        tracing::debug!(driver = %driver.name(), "Storage driver connected");
        Ok(Self::new(driver))
    }

    /// Resolve a driver by name. Only drivers with an in-tree adapter can be
    /// built; the rest fail.
    pub async fn connect_named(
        name: &str,
        local: LocalConfig,
        google: GoogleConfig,
    ) -> Result<Self, CloudStorageError> {
        let config = match name.parse::<DriverName>()? {
            DriverName::Local => DriverConfig::Local(local),
            DriverName::Googlestorage => DriverConfig::Google(google),
            other => {
                return Err(CloudStorageError::backend(format!(
                    "Driver {other} has no adapter in this build."
                )))
            }
        };
        Self::connect(&config).await
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn name(&self) -> DriverName {
        self.driver.name()
    }

    pub fn regions(&self) -> Vec<String> {
        self.driver.regions()
    }

    pub async fn validate_credentials(&self) -> Result<(), CloudStorageError> {
        self.driver.validate_credentials().await
    }

    fn wrap(&self, record: crate::models::ContainerRecord) -> Container {
        Container::new(record, Arc::clone(&self.driver))
    }

    /// Fails when a container with that name already exists.
    pub async fn create_container(
        &self,
        name: &str,
        acl: Option<&str>,
        meta_data: Option<MetaData>,
    ) -> Result<Container, CloudStorageError> {
        let meta_data = meta_data.unwrap_or_default();
        let record = self.driver.create_container(name, acl, &meta_data).await?;
        Ok(self.wrap(record))
    }

    pub async fn get_container(&self, name: &str) -> Result<Container, CloudStorageError> {
        Ok(self.wrap(self.driver.get_container(name).await?))
    }

    pub async fn containers(&self) -> Result<Vec<Container>, CloudStorageError> {
        Ok(self
            .driver
            .get_containers()
            .await?
            .into_iter()
            .map(|record| self.wrap(record))
            .collect())
    }

    pub async fn contains(&self, name: &str) -> Result<bool, CloudStorageError> {
        match self.driver.get_container(name).await {
            Ok(_) => Ok(true),
            Err(CloudStorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn delete_container(&self, name: &str) -> Result<(), CloudStorageError> {
        self.driver.delete_container(name).await
    }

    pub async fn validate_signature(
        &self,
        signature: &str,
    ) -> Result<SignedPayload, CloudStorageError> {
        self.driver.validate_signature(signature).await
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("driver", &self.driver.name())
            .finish()
    }
}
