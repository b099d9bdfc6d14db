use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};

use super::attributes::{self, Attributes};
use super::{ensure_empty, Driver};
use crate::error::{messages, CloudStorageError};
use crate::helpers::{
    content_type_for, copy_in_chunks, file_checksum, validate_blob_name, validate_container_name,
};
use crate::metadata::MetaData;
use crate::models::{
    BlobRecord, BlobSource, ContainerRecord, DriverName, FormPost, UploadOptions,
    UploadUrlOptions,
};
use crate::signature::{Method, SignedPayload, Signer};

/// Configuration for [`LocalDriver`].
#[derive(Debug, Clone, Default)]
pub struct LocalConfig {
    /// Root directory; every container is a subdirectory of it.
    pub key: PathBuf,
    /// Secret for signed download and upload tokens.
    pub secret: Option<String>,
    /// Namespaces tokens issued under the same secret.
    pub salt: Option<String>,
    /// Base URL of the service that redeems signed tokens.
    pub endpoint: String,
}

impl LocalConfig {
    pub fn new(key: impl Into<PathBuf>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Local filesystem driver for development, testing and single-host deployments.
///
/// Containers map to directories under the root and blobs to files inside
/// them. Uploads are written to a temporary file in the target directory and
/// renamed into place, so readers only ever see complete content; with
/// concurrent uploads to one name the last completed rename wins.
///
/// ACLs are accepted for interface parity but are neither stored nor
/// enforced. There is no CDN.
pub struct LocalDriver {
    base_path: PathBuf,
    signer: Option<Signer>,
    endpoint: String,
}

impl std::fmt::Debug for LocalDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDriver")
            .field("base_path", &self.base_path)
            .field("signing", &self.signer.is_some())
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl LocalDriver {
    pub fn new(config: LocalConfig) -> Result<Self, CloudStorageError> {
        if let Err(e) = std::fs::create_dir_all(&config.key) {
            return Err(match e.kind() {
                std::io::ErrorKind::PermissionDenied => CloudStorageError::Credentials(format!(
                    "Permission denied: '{}'",
                    config.key.display()
                )),
                _ => CloudStorageError::Io(e),
            });
        }

        if !config.key.is_dir() {
            return Err(CloudStorageError::backend(format!(
                "The base path '{}' is not a directory.",
                config.key.display()
            )));
        }

        let signer = config
            .secret
            .as_deref()
            .map(|secret| Signer::new(DriverName::Local, secret, config.salt.as_deref()));

        Ok(Self {
            base_path: config.key,
            signer,
            endpoint: config.endpoint,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Validate a token against an explicit clock.
    pub fn validate_signature_at(
        &self,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<SignedPayload, CloudStorageError> {
        self.signer()?.validate_at(signature, now)
    }

    fn signer(&self) -> Result<&Signer, CloudStorageError> {
        self.signer
            .as_ref()
            .ok_or_else(|| CloudStorageError::backend(messages::NO_SIGNING_SECRET))
    }

    fn upload_url(&self) -> String {
        format!("{}/upload", self.endpoint.trim_end_matches('/'))
    }

    /// Directory of an existing container.
    async fn container_path(&self, name: &str) -> Result<PathBuf, CloudStorageError> {
        let not_found = || CloudStorageError::NotFound(messages::container_not_found(name));
        validate_container_name(name).map_err(|_| not_found())?;

        let path = self.base_path.join(name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(path),
            Ok(_) => Err(not_found()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found()),
            Err(e) => Err(e.into()),
        }
    }

    fn blob_path(&self, folder: &Path, blob_name: &str) -> Result<PathBuf, CloudStorageError> {
        validate_blob_name(blob_name)?;
        let file_name = blob_name.rsplit('/').next().unwrap_or(blob_name);
        if attributes::is_internal_name(file_name) {
            return Err(CloudStorageError::backend(format!(
                "Blob name '{blob_name}' is reserved."
            )));
        }
        Ok(blob_name
            .split('/')
            .fold(folder.to_path_buf(), |path, segment| path.join(segment)))
    }

    async fn make_container(&self, name: &str) -> Result<ContainerRecord, CloudStorageError> {
        let path = self.container_path(name).await?;
        let meta = tokio::fs::metadata(&path).await?;
        let created_at = meta.created().or_else(|_| meta.modified()).ok();

        Ok(ContainerRecord {
            name: name.to_string(),
            created_at: created_at.map(DateTime::<Utc>::from),
            meta_data: MetaData::new(),
            acl: None,
        })
    }

    async fn make_blob(
        &self,
        container: &str,
        blob_name: &str,
        path: &Path,
    ) -> Result<BlobRecord, CloudStorageError> {
        let not_found =
            || CloudStorageError::NotFound(messages::blob_not_found(blob_name, container));

        // Symlinks are not blobs; listing skips them too.
        let meta = match tokio::fs::symlink_metadata(path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Err(not_found()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };

        let attrs = attributes::read(path).await;
        let checksum = match attrs.checksum {
            Some(checksum) => checksum,
            None => file_checksum(path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    not_found()
                } else {
                    e.into()
                }
            })?,
        };

        let modified_at = meta.modified().ok().map(DateTime::<Utc>::from);
        let created_at = meta
            .created()
            .ok()
            .map(DateTime::<Utc>::from)
            .or(modified_at);

        Ok(BlobRecord {
            container: container.to_string(),
            name: blob_name.to_string(),
            size: meta.len(),
            etag: checksum.clone(),
            checksum,
            content_type: attrs.content_type,
            content_disposition: attrs.content_disposition,
            cache_control: attrs.cache_control,
            acl: None,
            meta_data: attrs.meta_data,
            created_at,
            modified_at,
        })
    }

    /// Container-relative names of every blob file, sorted. Bookkeeping files
    /// are skipped.
    async fn blob_names(&self, folder: &Path) -> Result<Vec<String>, CloudStorageError> {
        let mut names = Vec::new();
        let mut pending = vec![(folder.to_path_buf(), String::new())];

        while let Some((dir, prefix)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // Pruned by a concurrent delete.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let Ok(name) = entry.file_name().into_string() else {
                    tracing::warn!(path = %entry.path().display(), "Skipping file with non UTF-8 name");
                    continue;
                };
                let file_type = entry.file_type().await?;
                let relative = format!("{prefix}{name}");

                if file_type.is_dir() {
                    pending.push((entry.path(), format!("{relative}/")));
                } else if file_type.is_file() && !attributes::is_internal_name(&name) {
                    names.push(relative);
                }
            }
        }

        names.sort();
        Ok(names)
    }

    /// Whether anything besides bookkeeping files and directories lives under
    /// `folder`. Symlinks and undecodable names count, so they block deletion.
    async fn is_occupied(folder: &Path) -> Result<bool, CloudStorageError> {
        let mut pending = vec![folder.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let Ok(name) = entry.file_name().into_string() else {
                    return Ok(true);
                };
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if !(file_type.is_file() && attributes::is_internal_name(&name)) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Remove bookkeeping files and empty directories under `folder`, deepest
    /// first. Anything else is left where it is.
    async fn clear_bookkeeping(folder: &Path) -> Result<(), CloudStorageError> {
        let mut visited = Vec::new();
        let mut pending = vec![folder.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let internal = entry
                    .file_name()
                    .to_str()
                    .is_some_and(attributes::is_internal_name);

                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() && internal {
                    match tokio::fs::remove_file(entry.path()).await {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            visited.push(dir);
        }

        // Every directory is visited after its parent.
        for dir in visited.iter().rev().filter(|dir| dir.as_path() != folder) {
            // A directory that still has content stays and fails the final removal.
            let _ = tokio::fs::remove_dir(dir).await;
        }
        Ok(())
    }

    /// Remove directories left empty by a delete, stopping at the container.
    async fn prune_empty_dirs(folder: &Path, blob_path: &Path) {
        let mut current = blob_path.parent();
        while let Some(dir) = current {
            if dir == folder || !dir.starts_with(folder) {
                break;
            }
            if tokio::fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

/// Stream `reader` into a fresh file at `tmp`, returning the MD5 hex digest.
async fn write_temp(
    tmp: &Path,
    mut reader: Box<dyn AsyncRead + Send + Unpin>,
) -> std::io::Result<String> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(tmp)
        .await?;
    let mut context = md5::Context::new();
    copy_in_chunks(&mut reader, &mut file, |chunk| context.consume(chunk)).await?;
    file.sync_all().await?;
    Ok(format!("{:x}", context.compute()))
}

#[async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> DriverName {
        DriverName::Local
    }

    async fn validate_credentials(&self) -> Result<(), CloudStorageError> {
        let marker = self
            .base_path
            .join(format!(".credentials-{}.tmp", uuid::Uuid::new_v4().simple()));

        let result = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&marker)
            .await;

        match result {
            Ok(file) => {
                drop(file);
                tokio::fs::remove_file(&marker).await?;
                Ok(())
            }
            Err(e) => match e.kind() {
                std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::NotFound => {
                    Err(CloudStorageError::Credentials(format!(
                        "{e}: '{}'",
                        self.base_path.display()
                    )))
                }
                _ => Err(e.into()),
            },
        }
    }

    async fn create_container(
        &self,
        name: &str,
        acl: Option<&str>,
        meta_data: &MetaData,
    ) -> Result<ContainerRecord, CloudStorageError> {
        validate_container_name(name)?;

        if acl.is_some() {
            tracing::info!(option = "acl", "Option is not supported by the local driver");
        }
        if !meta_data.is_empty() {
            tracing::info!(option = "meta_data", "Option is not supported by the local driver");
        }

        let path = self.base_path.join(name);
        match tokio::fs::create_dir(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(CloudStorageError::backend(messages::container_exists(name)));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(container = %name, "Created container");
        self.make_container(name).await
    }

    async fn get_container(&self, name: &str) -> Result<ContainerRecord, CloudStorageError> {
        self.make_container(name).await
    }

    async fn get_containers(&self) -> Result<Vec<ContainerRecord>, CloudStorageError> {
        let mut entries = tokio::fs::read_dir(&self.base_path).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                if validate_container_name(&name).is_ok() {
                    names.push(name);
                }
            }
        }
        names.sort();

        let mut containers = Vec::with_capacity(names.len());
        for name in names {
            match self.make_container(&name).await {
                Ok(container) => containers.push(container),
                Err(CloudStorageError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(containers)
    }

    async fn delete_container(&self, name: &str) -> Result<(), CloudStorageError> {
        let path = self.container_path(name).await?;
        ensure_empty(self, name).await?;

        Self::clear_bookkeeping(&path).await?;
        match tokio::fs::remove_dir(&path).await {
            Ok(()) => {}
            // A blob landed after the emptiness check.
            Err(e) if e.kind() == std::io::ErrorKind::DirectoryNotEmpty => {
                return Err(CloudStorageError::NotEmpty(messages::container_not_empty(name)));
            }
            Err(e) => return Err(e.into()),
        }
        tracing::debug!(container = %name, "Deleted container");
        Ok(())
    }

    async fn is_container_empty(&self, name: &str) -> Result<bool, CloudStorageError> {
        let path = self.container_path(name).await?;
        Ok(!Self::is_occupied(&path).await?)
    }

    fn container_cdn_url(&self, name: &str) -> Result<String, CloudStorageError> {
        validate_container_name(name)?;
        Ok(self.base_path.join(name).to_string_lossy().to_string())
    }

    async fn enable_container_cdn(&self, _name: &str) -> Result<bool, CloudStorageError> {
        tracing::warn!(feature = "enable_container_cdn", "Feature is not supported by the local driver");
        Ok(false)
    }

    async fn disable_container_cdn(&self, _name: &str) -> Result<bool, CloudStorageError> {
        tracing::warn!(feature = "disable_container_cdn", "Feature is not supported by the local driver");
        Ok(false)
    }

    async fn upload_blob(
        &self,
        container: &str,
        source: BlobSource,
        options: UploadOptions,
    ) -> Result<BlobRecord, CloudStorageError> {
        let folder = self.container_path(container).await?;
        let blob_name = options
            .blob_name
            .clone()
            .or_else(|| source.file_name())
            .ok_or_else(|| {
                CloudStorageError::backend("A blob name is required when the source has no file name.")
            })?;
        let path = self.blob_path(&folder, &blob_name)?;

        if options.acl.is_some() {
            tracing::info!(option = "acl", "Option is not supported by the local driver");
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let reader = source.into_reader().await?;
        let tmp = attributes::temp_path(&path);
        let checksum = match write_temp(&tmp, reader).await {
            Ok(checksum) => checksum,
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e.into());
            }
        };

        let attrs = Attributes {
            content_type: Some(
                options
                    .content_type
                    .unwrap_or_else(|| content_type_for(&blob_name)),
            ),
            content_disposition: options.content_disposition,
            cache_control: options.cache_control,
            checksum: Some(checksum),
            meta_data: options.meta_data,
        };

        // Attributes set on the temp file travel with it through the rename.
        // Without xattrs the sidecar is staged first, so a failure leaves the
        // existing blob untouched.
        let staged_sidecar = match attributes::set_xattrs(&tmp, &attrs).await {
            Ok(()) => None,
            Err(e) => {
                tracing::debug!(error = %e, "Extended attributes unavailable, using sidecar");
                match attributes::stage_sidecar(&path, &attrs).await {
                    Ok(staged) => Some(staged),
                    Err(e) => {
                        let _ = tokio::fs::remove_file(&tmp).await;
                        return Err(e.into());
                    }
                }
            }
        };

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            if let Some(staged) = &staged_sidecar {
                let _ = tokio::fs::remove_file(staged).await;
            }
            return Err(e.into());
        }

        match staged_sidecar {
            None => attributes::remove_sidecar(&path).await,
            Some(staged) => {
                if let Err(e) = attributes::commit_sidecar(&staged, &path).await {
                    // The old sidecar predates the new content and would be
                    // ignored on read anyway.
                    attributes::remove_sidecar(&path).await;
                    return Err(e.into());
                }
            }
        }

        tracing::debug!(container = %container, blob = %blob_name, "Uploaded blob");
        self.make_blob(container, &blob_name, &path).await
    }

    async fn get_blob(
        &self,
        container: &str,
        blob_name: &str,
    ) -> Result<BlobRecord, CloudStorageError> {
        let folder = self.container_path(container).await?;
        let path = self.blob_path(&folder, blob_name).map_err(|_| {
            CloudStorageError::NotFound(messages::blob_not_found(blob_name, container))
        })?;
        self.make_blob(container, blob_name, &path).await
    }

    async fn get_blobs(&self, container: &str) -> Result<Vec<BlobRecord>, CloudStorageError> {
        let folder = self.container_path(container).await?;
        let mut blobs = Vec::new();

        for name in self.blob_names(&folder).await? {
            let Ok(path) = self.blob_path(&folder, &name) else {
                continue;
            };
            match self.make_blob(container, &name, &path).await {
                Ok(blob) => blobs.push(blob),
                // Deleted between listing and stat.
                Err(CloudStorageError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(blobs)
    }

    async fn download_blob(
        &self,
        blob: &BlobRecord,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, CloudStorageError> {
        let not_found =
            || CloudStorageError::NotFound(messages::blob_not_found(&blob.name, &blob.container));

        let folder = self.container_path(&blob.container).await?;
        let path = self.blob_path(&folder, &blob.name).map_err(|_| not_found())?;
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };

        Ok(copy_in_chunks(&mut file, writer, |_| {}).await?)
    }

    async fn delete_blob(&self, blob: &BlobRecord) -> Result<(), CloudStorageError> {
        let not_found =
            || CloudStorageError::NotFound(messages::blob_not_found(&blob.name, &blob.container));

        let folder = self.container_path(&blob.container).await?;
        let path = self.blob_path(&folder, &blob.name).map_err(|_| not_found())?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        }
        attributes::remove_sidecar(&path).await;
        Self::prune_empty_dirs(&folder, &path).await;

        tracing::debug!(container = %blob.container, blob = %blob.name, "Deleted blob");
        Ok(())
    }

    fn blob_cdn_url(&self, blob: &BlobRecord) -> Result<String, CloudStorageError> {
        let folder = self.base_path.join(&blob.container);
        Ok(self
            .blob_path(&folder, &blob.name)?
            .to_string_lossy()
            .to_string())
    }

    async fn generate_container_upload_url(
        &self,
        container: &str,
        blob_name: &str,
        expires: i64,
        options: UploadUrlOptions,
    ) -> Result<FormPost, CloudStorageError> {
        let signer = self.signer()?;
        self.container_path(container).await?;
        validate_blob_name(blob_name)?;

        let mut payload = SignedPayload::new(
            DriverName::Local,
            Method::Post,
            container,
            blob_name,
            expires,
            Utc::now(),
        )?;
        payload.acl = options.acl;
        payload.meta_data = options.meta_data;
        payload.content_disposition = options.content_disposition;
        payload.content_length = options.content_length;
        payload.content_type = options.content_type;
        payload.cache_control = options.cache_control;

        let signature = signer.sign(&payload)?;
        let fields = [
            ("blob_name", blob_name.to_string()),
            ("container", container.to_string()),
            ("expires", payload.expires.to_string()),
            ("signature", signature),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Ok(FormPost {
            url: self.upload_url(),
            fields,
        })
    }

    async fn generate_blob_download_url(
        &self,
        blob: &BlobRecord,
        expires: i64,
        content_disposition: Option<&str>,
    ) -> Result<String, CloudStorageError> {
        let signer = self.signer()?;
        let mut payload = SignedPayload::new(
            DriverName::Local,
            Method::Get,
            &blob.container,
            &blob.name,
            expires,
            Utc::now(),
        )?;
        payload.content_disposition = content_disposition.map(str::to_string);
        signer.sign(&payload)
    }

    async fn validate_signature(&self, signature: &str) -> Result<SignedPayload, CloudStorageError> {
        self.signer()?.validate(signature)
    }
}
