//! Shared test helpers for handler tests.

use std::sync::Arc;

use crate::config::{Config, StorageConfig};
use crate::drivers::{LocalConfig, LocalDriver};
use crate::storage::Storage;
use crate::AppState;

pub const TEST_SECRET: &str = "test-secret";

/// Create a test AppState backed by a local driver in a temporary directory.
pub fn test_state(temp_dir: &tempfile::TempDir) -> Arc<AppState> {
    let files_dir = temp_dir.path().join("files");

    let config = Config {
        bind_address: "127.0.0.1:0".to_string(),
        storage: StorageConfig {
            local_storage_path: files_dir.to_string_lossy().to_string(),
            secret: Some(TEST_SECRET.to_string()),
            public_url: "http://127.0.0.1".to_string(),
            ..Default::default()
        },
        max_upload_size: 10 * 1024 * 1024, // 10MB for tests
    };

    let driver = LocalDriver::new(
        LocalConfig::new(&files_dir)
            .with_secret(TEST_SECRET)
            .with_endpoint(config.storage.public_url.clone()),
    )
    .expect("Failed to create test driver");

    Arc::new(AppState {
        config,
        storage: Storage::from_driver(driver),
    })
}
