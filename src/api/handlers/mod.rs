mod admin;
mod download;
mod upload;

pub use admin::health;
pub use download::{download, DownloadParams};
pub use upload::upload;
