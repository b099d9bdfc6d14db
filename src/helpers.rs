//! Shared helpers for drivers: chunked streaming, checksums, content types,
//! Content-Disposition parsing and name validation.

use std::path::Path;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{messages, CloudStorageError};

/// Transfer buffer size for uploads and downloads.
pub const CHUNK_SIZE: usize = 64 * 1024;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Copy `reader` into `writer` one chunk at a time, handing every chunk to
/// `inspect` before it is written. Returns the number of bytes copied.
pub async fn copy_in_chunks<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    mut inspect: F,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    F: FnMut(&[u8]),
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        inspect(&buf[..n]);
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    writer.flush().await?;
    Ok(total)
}

/// MD5 hex digest of a file, read in chunks.
pub async fn file_checksum(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut context = md5::Context::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
    }
    Ok(format!("{:x}", context.compute()))
}

/// Guess a MIME type from a file or blob name.
pub fn content_type_for(name: &str) -> String {
    mime_guess::from_path(name)
        .first()
        .map(|m| m.to_string())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
}

/// Split a Content-Disposition value into its type and parameters.
/// Parameter names are lowercased; quoted values are unquoted.
pub fn parse_content_disposition(value: &str) -> (String, Vec<(String, String)>) {
    let mut parts = value.split(';');
    let kind = parts.next().unwrap_or_default().trim().to_lowercase();
    let params = parts
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some((key.trim().to_lowercase(), value.to_string()))
        })
        .collect();
    (kind, params)
}

/// Base name of the `filename` parameter of a Content-Disposition value.
pub fn disposition_file_name(value: &str) -> Option<String> {
    let (_, params) = parse_content_disposition(value);
    params
        .into_iter()
        .find(|(key, _)| key == "filename")
        .and_then(|(_, name)| {
            name.rsplit(['/', '\\'])
                .next()
                .filter(|n| !n.is_empty() && *n != "." && *n != "..")
                .map(str::to_string)
        })
}

/// Container names are a single visible path component.
pub fn validate_container_name(name: &str) -> Result<(), CloudStorageError> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
        || name.len() > 255;
    if invalid {
        return Err(CloudStorageError::backend(messages::CONTAINER_NAME_INVALID));
    }
    Ok(())
}

/// Blob names are relative `/`-separated paths without `.`, `..` or empty
/// segments.
pub fn validate_blob_name(name: &str) -> Result<(), CloudStorageError> {
    let invalid = name.is_empty()
        || name.starts_with('/')
        || name.contains(['\\', '\0'])
        || name
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if invalid {
        return Err(CloudStorageError::backend(format!(
            "Invalid blob name '{name}'."
        )));
    }
    Ok(())
}
