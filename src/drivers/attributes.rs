//! Blob attributes for the local driver.
//!
//! Attributes live in `user.`-prefixed extended attributes where the host
//! filesystem supports them, and in a JSON sidecar `.<file>.xattr` next to the
//! blob otherwise. Reading never fails: unreadable values count as absent.
//!
//! A sidecar older than its blob describes a previous upload and is ignored.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::metadata::MetaData;

const XATTR_PREFIX: &str = "user.";
const META_PREFIX: &str = "metadata.";
const SIDECAR_SUFFIX: &str = ".xattr";
const TEMP_SUFFIX: &str = ".tmp";

const CONTENT_TYPE: &str = "content-type";
const CONTENT_DISPOSITION: &str = "content-disposition";
const CACHE_CONTROL: &str = "cache-control";
const CHECKSUM: &str = "checksum";

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Attributes {
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,
    pub checksum: Option<String>,
    pub meta_data: MetaData,
}

impl Attributes {
    fn to_pairs(&self) -> BTreeMap<String, String> {
        let mut pairs = BTreeMap::new();
        let fixed = [
            (CONTENT_TYPE, &self.content_type),
            (CONTENT_DISPOSITION, &self.content_disposition),
            (CACHE_CONTROL, &self.cache_control),
            (CHECKSUM, &self.checksum),
        ];
        for (key, value) in fixed {
            if let Some(value) = value {
                pairs.insert(key.to_string(), value.clone());
            }
        }
        for (key, value) in self.meta_data.iter() {
            pairs.insert(format!("{META_PREFIX}{key}"), value.to_string());
        }
        pairs
    }

    fn apply(&mut self, key: &str, value: String) {
        if let Some(meta_key) = key.strip_prefix(META_PREFIX) {
            self.meta_data.set(meta_key, value);
            return;
        }
        match key {
            CONTENT_TYPE => self.content_type = Some(value),
            CONTENT_DISPOSITION => self.content_disposition = Some(value),
            CACHE_CONTROL => self.cache_control = Some(value),
            CHECKSUM => self.checksum = Some(value),
            _ => tracing::warn!(attribute = %key, "Unknown file attribute"),
        }
    }
}

/// Sidecar location for a blob file: `<dir>/.<file>.xattr`.
pub(crate) fn sidecar_path(blob_path: &Path) -> PathBuf {
    let file_name = blob_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    blob_path.with_file_name(format!(".{file_name}{SIDECAR_SUFFIX}"))
}

/// In-flight upload location for a blob file: `<dir>/.<file>.<uuid>.tmp`.
pub(crate) fn temp_path(blob_path: &Path) -> PathBuf {
    let file_name = blob_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    blob_path.with_file_name(format!(
        ".{file_name}.{}{TEMP_SUFFIX}",
        uuid::Uuid::new_v4().simple()
    ))
}

/// Whether a file name belongs to the driver's own bookkeeping.
pub(crate) fn is_internal_name(file_name: &str) -> bool {
    file_name.starts_with('.')
        && (file_name.ends_with(SIDECAR_SUFFIX) || file_name.ends_with(TEMP_SUFFIX))
}

/// Set attributes as extended attributes on `path`.
#[cfg(unix)]
pub(crate) async fn set_xattrs(path: &Path, attributes: &Attributes) -> std::io::Result<()> {
    let path = path.to_path_buf();
    let pairs = attributes.to_pairs();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut written = Vec::new();
        for (key, value) in pairs {
            let name = format!("{XATTR_PREFIX}{key}");
            if let Err(e) = xattr::set(&path, &name, value.as_bytes()) {
                // All or nothing: the sidecar takes over from here.
                for name in written {
                    let _ = xattr::remove(&path, name);
                }
                return Err(e);
            }
            written.push(name);
        }
        Ok(())
    })
    .await
    .map_err(std::io::Error::other)?
}

#[cfg(not(unix))]
pub(crate) async fn set_xattrs(_path: &Path, _attributes: &Attributes) -> std::io::Result<()> {
    Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
}

/// Write the sidecar content for `blob_path` to a temporary file without
/// touching the live sidecar. Returns the staged location.
pub(crate) async fn stage_sidecar(
    blob_path: &Path,
    attributes: &Attributes,
) -> std::io::Result<PathBuf> {
    let tmp = temp_path(&sidecar_path(blob_path));
    let json = serde_json::to_vec(&attributes.to_pairs()).map_err(std::io::Error::other)?;

    if let Err(e) = tokio::fs::write(&tmp, json).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(tmp)
}

/// Move a staged sidecar into place for `blob_path`.
pub(crate) async fn commit_sidecar(staged: &Path, blob_path: &Path) -> std::io::Result<()> {
    if let Err(e) = tokio::fs::rename(staged, sidecar_path(blob_path)).await {
        let _ = tokio::fs::remove_file(staged).await;
        return Err(e);
    }
    Ok(())
}

pub(crate) async fn remove_sidecar(blob_path: &Path) {
    let sidecar = sidecar_path(blob_path);
    match tokio::fs::remove_file(&sidecar).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %sidecar.display(), error = %e, "Failed to remove attribute sidecar"),
    }
}

/// Read every attribute stored for `blob_path`. Sidecar values win over
/// extended attributes unless the sidecar predates the blob content.
pub(crate) async fn read(blob_path: &Path) -> Attributes {
    let mut attributes = Attributes::default();

    for (key, value) in read_xattrs(blob_path).await {
        attributes.apply(&key, value);
    }

    let sidecar = sidecar_path(blob_path);
    if sidecar_is_stale(blob_path, &sidecar).await {
        tracing::debug!(path = %sidecar.display(), "Ignoring attribute sidecar older than its blob");
        return attributes;
    }

    match tokio::fs::read(&sidecar).await {
        Ok(raw) => match serde_json::from_slice::<BTreeMap<String, String>>(&raw) {
            Ok(pairs) => {
                for (key, value) in pairs {
                    attributes.apply(&key, value);
                }
            }
            Err(e) => {
                tracing::warn!(path = %sidecar.display(), error = %e, "Ignoring unreadable attribute sidecar");
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %sidecar.display(), error = %e, "Failed to read attribute sidecar");
        }
    }

    attributes
}

/// A sidecar is written after its blob's content, so one with an older
/// modification time belongs to content that has since been replaced.
async fn sidecar_is_stale(blob_path: &Path, sidecar: &Path) -> bool {
    match (modified(blob_path).await, modified(sidecar).await) {
        (Some(blob), Some(sidecar)) => sidecar < blob,
        _ => false,
    }
}

async fn modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.and_then(|m| m.modified()).ok()
}

#[cfg(unix)]
async fn read_xattrs(path: &Path) -> Vec<(String, String)> {
    let path = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<(String, String)>> {
        let mut pairs = Vec::new();
        for name in xattr::list(&path)? {
            let Some(key) = name.to_str().and_then(|n| n.strip_prefix(XATTR_PREFIX)) else {
                continue;
            };
            let Some(raw) = xattr::get(&path, &name)? else {
                continue;
            };
            match String::from_utf8(raw) {
                Ok(value) => pairs.push((key.to_string(), value)),
                Err(_) => tracing::warn!(attribute = %key, "Ignoring attribute that is not valid UTF-8"),
            }
        }
        Ok(pairs)
    })
    .await;

    match result {
        Ok(Ok(pairs)) => pairs,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Extended filesystem attributes not supported");
            Vec::new()
        }
        Err(e) => {
            tracing::warn!(error = %e, "Attribute reader task failed");
            Vec::new()
        }
    }
}

#[cfg(not(unix))]
async fn read_xattrs(_path: &Path) -> Vec<(String, String)> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_sidecar(blob_path: &Path, attributes: &Attributes) {
        let staged = stage_sidecar(blob_path, attributes).await.unwrap();
        commit_sidecar(&staged, blob_path).await.unwrap();
    }

    fn sample() -> Attributes {
        Attributes {
            content_type: Some("image/png".to_string()),
            content_disposition: Some("attachment; filename=\"a.png\"".to_string()),
            cache_control: Some("max-age=3600".to_string()),
            checksum: Some("abc".to_string()),
            meta_data: MetaData::from([("Owner-Id", "1")]),
        }
    }

    #[test]
    fn test_internal_names() {
        assert!(is_internal_name(".user.png.xattr"));
        assert!(is_internal_name(".user.png.0123.tmp"));
        assert!(!is_internal_name("user.png"));
        assert!(!is_internal_name(".profile"));
        assert!(!is_internal_name("notes.tmp"));
    }

    #[test]
    fn test_paths() {
        let blob = Path::new("/data/avatars/user.png");
        assert_eq!(sidecar_path(blob), Path::new("/data/avatars/.user.png.xattr"));

        let tmp = temp_path(blob);
        let tmp_name = tmp.file_name().unwrap().to_str().unwrap();
        assert_eq!(tmp.parent(), blob.parent());
        assert!(tmp_name.starts_with(".user.png."));
        assert!(is_internal_name(tmp_name));
    }

    #[test]
    fn test_pairs_layout() {
        let pairs = sample().to_pairs();
        assert_eq!(pairs.get("content-type").map(String::as_str), Some("image/png"));
        assert_eq!(pairs.get("checksum").map(String::as_str), Some("abc"));
        assert_eq!(pairs.get("cache-control").map(String::as_str), Some("max-age=3600"));
        assert_eq!(pairs.get("metadata.owner-id").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn test_sidecar_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join("user.png");
        std::fs::write(&blob, b"png").unwrap();

        write_sidecar(&blob, &sample()).await;
        assert!(sidecar_path(&blob).exists());

        let read_back = read(&blob).await;
        assert_eq!(read_back.content_type.as_deref(), Some("image/png"));
        assert_eq!(read_back.meta_data.get("OWNER-ID"), Some("1"));
        assert_eq!(read_back.cache_control.as_deref(), Some("max-age=3600"));

        remove_sidecar(&blob).await;
        assert!(!sidecar_path(&blob).exists());
    }

    #[tokio::test]
    async fn test_staged_sidecar_is_not_live_until_committed() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join("user.png");
        std::fs::write(&blob, b"png").unwrap();

        let staged = stage_sidecar(&blob, &sample()).await.unwrap();
        assert!(staged.exists());
        assert!(is_internal_name(staged.file_name().unwrap().to_str().unwrap()));
        assert!(!sidecar_path(&blob).exists());

        commit_sidecar(&staged, &blob).await.unwrap();
        assert!(!staged.exists());
        assert_eq!(read(&blob).await.checksum.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_sidecar_older_than_blob_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join("report.csv");
        std::fs::write(&blob, b"old").unwrap();
        write_sidecar(&blob, &sample()).await;

        let sidecar_time = std::fs::metadata(sidecar_path(&blob)).unwrap().modified().unwrap();
        let file = std::fs::OpenOptions::new().write(true).open(&blob).unwrap();
        file.set_modified(sidecar_time + std::time::Duration::from_secs(5))
            .unwrap();
        drop(file);

        let attributes = read(&blob).await;
        assert_eq!(attributes.checksum, None);
        assert_eq!(attributes.content_type, None);
    }

    #[tokio::test]
    async fn test_corrupt_sidecar_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join("data.bin");
        std::fs::write(&blob, b"data").unwrap();
        std::fs::write(sidecar_path(&blob), [0xff, 0xfe, 0x00]).unwrap();

        let attributes = read(&blob).await;
        assert_eq!(attributes.content_type, None);
        assert!(attributes.meta_data.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_xattr_write_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join("data.bin");
        std::fs::write(&blob, b"data").unwrap();

        let mut attributes = sample();
        attributes.meta_data.set("notes", "n".repeat(100 * 1024));

        assert!(set_xattrs(&blob, &attributes).await.is_err());
        assert!(read_xattrs(&blob).await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_utf8_xattr_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join("data.bin");
        std::fs::write(&blob, b"data").unwrap();

        // Filesystems without user xattrs have nothing to test here.
        if xattr::set(&blob, "user.content-type", &[0xff, 0xfe]).is_err() {
            return;
        }
        xattr::set(&blob, "user.checksum", b"abc").unwrap();

        let attributes = read(&blob).await;
        assert_eq!(attributes.content_type, None);
        assert_eq!(attributes.checksum.as_deref(), Some("abc"));
    }
}
