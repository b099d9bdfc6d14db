use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

use crate::api::response::{ApiError, AppQuery};
use crate::helpers::{CHUNK_SIZE, DEFAULT_CONTENT_TYPE};
use crate::signature::Method;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    pub signature: String,
}

/// Stream a blob named by a signed download token.
/// Route: GET /download?signature=<token>
pub async fn download(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<DownloadParams>,
) -> Result<Response, ApiError> {
    let payload = state.storage.validate_signature(&params.signature).await?;
    if payload.method != Method::Get {
        return Err(ApiError::forbidden("Signature does not permit downloads"));
    }

    let container = state.storage.get_container(&payload.container).await?;
    let blob = container.get_blob(&payload.blob_name).await?;

    let content_type = blob
        .content_type()
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();
    let content_disposition = payload
        .content_disposition
        .clone()
        .or_else(|| blob.content_disposition().map(str::to_string));
    let cache_control = blob.cache_control().map(str::to_string);
    let size = blob.size();
    let etag = blob.etag().to_string();

    // The driver writes into one end of the pipe while the body reads the other.
    let (reader, mut writer) = tokio::io::duplex(CHUNK_SIZE);
    tokio::spawn(async move {
        if let Err(e) = blob.download(&mut writer).await {
            tracing::error!(blob = %blob.path(), error = %e, "Download stream failed");
        }
    });

    let mut response = (StatusCode::OK, Body::from_stream(ReaderStream::new(reader))).into_response();
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_TYPE,
        content_type
            .parse()
            .unwrap_or(HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));

    if let Some(value) = content_disposition.and_then(|d| d.parse().ok()) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(value) = cache_control.and_then(|c| c.parse().ok()) {
        headers.insert(header::CACHE_CONTROL, value);
    }
    if let Ok(value) = format!("\"{etag}\"").parse() {
        headers.insert(header::ETAG, value);
    }

    Ok(response)
}
