use axum::extract::{Multipart, State};
use axum::Json;
use bytes::Bytes;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

use crate::api::response::{ApiError, JSend};
use crate::error::CloudStorageError;
use crate::models::{BlobRecord, BlobSource, UploadOptions};
use crate::signature::{Method, SignedPayload};
use crate::AppState;

/// Multipart chunks buffered between the request body and the driver.
const PENDING_CHUNKS: usize = 4;

/// Accept a form upload authorized by a signed upload token.
/// Route: POST /upload (multipart: `signature`, then `file`)
///
/// The token fixes the container, blob name and stored attributes. Other
/// form fields (`blob_name`, `container`, `expires`) are informational.
/// The file is streamed into the driver as it arrives.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<JSend<BlobRecord>>, ApiError> {
    let mut payload: Option<SignedPayload> = None;
    let mut uploaded: Option<BlobRecord> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart data: {e}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "signature" => {
                let token = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid signature: {e}")))?;
                let decoded = state.storage.validate_signature(token.trim()).await?;
                if decoded.method != Method::Post {
                    return Err(ApiError::forbidden("Signature does not permit uploads"));
                }
                payload = Some(decoded);
            }
            "file" if uploaded.is_none() => {
                let Some(payload) = payload.as_ref() else {
                    return Err(ApiError::bad_request(
                        "signature field must precede the file field",
                    ));
                };
                let min_size = payload.content_length.map_or(0, |(min, _)| min);
                let max_size = allowed_max(payload, state.config.max_upload_size);
                let file_name = field.file_name().map(str::to_string);

                let container = state.storage.get_container(&payload.container).await?;

                let (tx, rx) = mpsc::channel(PENDING_CHUNKS);
                let mut source =
                    BlobSource::from_reader(FieldReader::new(rx, min_size, max_size));
                if let Some(file_name) = file_name {
                    source = source.with_name(file_name);
                }

                let feed = async move {
                    loop {
                        let item = match field.chunk().await {
                            Ok(Some(chunk)) => Ok(chunk),
                            Ok(None) => break,
                            Err(e) => Err(io::Error::other(UploadStreamError::Multipart(
                                e.to_string(),
                            ))),
                        };
                        let failed = item.is_err();
                        // A closed channel means the driver already gave up.
                        if tx.send(item).await.is_err() || failed {
                            break;
                        }
                    }
                };

                let (_, result) =
                    tokio::join!(feed, container.upload_blob(source, upload_options(payload)));
                uploaded = Some(result.map_err(upload_error)?.record().clone());
            }
            _ => {
                // Ignore unknown fields
            }
        }
    }

    if payload.is_none() {
        return Err(ApiError::bad_request("signature field is required"));
    }
    let blob = uploaded.ok_or_else(|| ApiError::bad_request("file field is required"))?;

    tracing::info!(container = %blob.container, blob = %blob.name, size = blob.size, "Accepted signed upload");
    Ok(JSend::success(blob))
}

fn upload_options(payload: &SignedPayload) -> UploadOptions {
    UploadOptions {
        blob_name: Some(payload.blob_name.clone()),
        acl: payload.acl.clone(),
        meta_data: payload.meta_data.clone(),
        content_type: payload.content_type.clone(),
        content_disposition: payload.content_disposition.clone(),
        cache_control: payload.cache_control.clone(),
    }
}

/// Upper size bound: the token's range, capped by the service limit.
fn allowed_max(payload: &SignedPayload, service_max: u64) -> u64 {
    payload
        .content_length
        .map(|(_, max)| max.min(service_max))
        .unwrap_or(service_max)
}

#[derive(Debug, thiserror::Error)]
enum UploadStreamError {
    #[error("File exceeds maximum upload size of {0} bytes")]
    TooLarge(u64),
    #[error("File is smaller than the minimum size of {0} bytes")]
    TooSmall(u64),
    #[error("Failed to read file: {0}")]
    Multipart(String),
}

/// Surface size and multipart failures raised inside the driver's read loop
/// as client errors.
fn upload_error(e: CloudStorageError) -> ApiError {
    if let CloudStorageError::Io(io_error) = &e {
        let stream_error = io_error
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<UploadStreamError>());
        match stream_error {
            Some(err @ UploadStreamError::TooLarge(_)) => {
                return ApiError::payload_too_large(err.to_string())
            }
            Some(err) => return ApiError::bad_request(err.to_string()),
            None => {}
        }
    }
    e.into()
}

/// Reads file chunks handed over by the request and enforces the allowed
/// size range. Exceeding `max` fails the read immediately; ending below `min`
/// fails it at end of stream, before the driver commits anything.
struct FieldReader {
    chunks: mpsc::Receiver<io::Result<Bytes>>,
    current: Bytes,
    received: u64,
    min: u64,
    max: u64,
}

impl FieldReader {
    fn new(chunks: mpsc::Receiver<io::Result<Bytes>>, min: u64, max: u64) -> Self {
        Self {
            chunks,
            current: Bytes::new(),
            received: 0,
            min,
            max,
        }
    }
}

impl AsyncRead for FieldReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        while this.current.is_empty() {
            match ready!(this.chunks.poll_recv(cx)) {
                Some(Ok(chunk)) => {
                    this.received += chunk.len() as u64;
                    if this.received > this.max {
                        return Poll::Ready(Err(io::Error::other(UploadStreamError::TooLarge(
                            this.max,
                        ))));
                    }
                    this.current = chunk;
                }
                Some(Err(e)) => return Poll::Ready(Err(e)),
                None if this.received < this.min => {
                    return Poll::Ready(Err(io::Error::other(UploadStreamError::TooSmall(
                        this.min,
                    ))));
                }
                None => return Poll::Ready(Ok(())),
            }
        }

        let n = this.current.len().min(buf.remaining());
        buf.put_slice(&this.current.split_to(n));
        Poll::Ready(Ok(()))
    }
}
