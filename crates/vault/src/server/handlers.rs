//! Axum request handlers for all service endpoints.

use std::io::{self, Read};

use axum::{
    body::Body,
    extract::{multipart::MultipartRejection, Multipart, OriginalUri, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use codec::CodecError;
use common::{
    protocol::{ErrorResponse, FileItem, FileUploadSuccess, HealthResponse},
    ServiceError,
};
use futures::{stream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{from_codec, from_pipeline, from_store, ApiError, BodyError};
use super::state::AppState;
use crate::store::{pipeline::ObjectDecoder, PushRequest};

/// Plaintext bytes sent per body frame on download.
const DOWNLOAD_BLOCK: usize = 64 * 1024;

/// Body frames buffered between a connection and its blocking worker.
const QUEUE_DEPTH: usize = 8;

/// `GET /api/file` — every object in the bucket.
pub async fn list_files(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
) -> Result<Json<Vec<FileItem>>, ApiError> {
    let objects = state
        .conn
        .list_files(&state.bucket)
        .await
        .map_err(|e| ApiError::new(from_store(&e), &uri))?;

    let items = objects
        .into_iter()
        .map(|o| FileItem {
            object_name: o.key,
            size: o.size,
        })
        .collect();
    Ok(Json(items))
}

/// `POST /api/file` — encrypt and store the multipart field `file`.
///
/// The object name is the `object_name` field when it precedes `file`, else
/// the uploaded filename, else a random UUID. The body is encrypted while it
/// streams in; dropping the request cancels and aborts the upload.
pub async fn upload_file(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<FileUploadSuccess>, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::bad_request(e.body_text(), &uri))?;

    let mut object_name = None;
    let mut field = loop {
        let next = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(e.body_text(), &uri))?;
        let Some(field) = next else {
            return Err(ApiError::bad_request("form has no `file` field", &uri));
        };
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => break field,
            Some("object_name") => {
                let name = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.body_text(), &uri))?;
                if !name.trim().is_empty() {
                    object_name = Some(name);
                }
            }
            _ => {}
        }
    };

    let uploaded = field.file_name().filter(|n| !n.is_empty()).map(str::to_owned);
    let object_name = object_name
        .or_else(|| uploaded.clone())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let req = PushRequest {
        bucket: state.bucket.to_string(),
        filename: uploaded.unwrap_or_else(|| object_name.clone()),
        object_name,
        chunk_size: state.chunk_size,
        size_hint: None,
    };
    debug!(object = %req.object_name, "upload received");

    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let (tx, rx) = mpsc::channel::<Option<io::Result<Bytes>>>(QUEUE_DEPTH);
    let source = SyncIoBridge::new(StreamReader::new(Box::pin(request_body(rx))));

    let pump = async move {
        loop {
            let msg = match field.chunk().await {
                Ok(Some(chunk)) => Some(Ok(chunk)),
                Ok(None) => None,
                Err(e) => Some(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    BodyError(e.body_text()),
                ))),
            };
            let last = !matches!(msg, Some(Ok(_)));
            if tx.send(msg).await.is_err() || last {
                break;
            }
        }
    };
    let (_, pushed) = tokio::join!(pump, state.conn.push_object(source, req, cancel));
    guard.disarm();

    let info = pushed.map_err(|e| ApiError::new(from_pipeline(&e), &uri))?;
    Ok(Json(FileUploadSuccess {
        object_name: info.key,
        version_id: info.version_id,
    }))
}

/// Request body as a byte stream. `None` on the channel marks the end of the
/// body; a channel closed without it is an error, so a dropped request is
/// never mistaken for a complete one.
fn request_body(
    rx: mpsc::Receiver<Option<io::Result<Bytes>>>,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    stream::unfold(Some(rx), |rx| async move {
        let mut rx = rx?;
        match rx.recv().await {
            Some(Some(item)) => Some((item, Some(rx))),
            Some(None) => None,
            None => Some((
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "request body ended early",
                )),
                None,
            )),
        }
    })
}

/// `GET /api/file/*name` — decrypt and stream a stored object.
///
/// The header and the first block are authenticated before the status line
/// goes out, so a missing or corrupt object still yields a JSON error. A
/// failure later in the stream aborts the response body.
pub async fn download_file(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let mut reader = state
        .conn
        .get_object(&state.bucket, &name)
        .await
        .map_err(|e| ApiError::new(from_pipeline(&e), &uri))?;

    let opened = tokio::task::spawn_blocking(move || -> Result<_, CodecError> {
        let filename = reader.read_header()?.filename();
        let first = read_block(&mut reader)?;
        Ok((reader, filename, first))
    })
    .await
    .map_err(|e| ApiError::new(ServiceError::Internal(e.to_string()), &uri))?;
    let (reader, filename, first) =
        opened.map_err(|e| ApiError::new(from_codec(&e), &uri))?;

    let filename = if filename.is_empty() { name } else { filename };
    let body = if first.len() < DOWNLOAD_BLOCK {
        Body::from(first)
    } else {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::task::spawn_blocking(move || stream_plaintext(reader, tx));
        let rest = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
        Body::from_stream(stream::once(async move { Ok(first) }).chain(rest))
    };

    let headers = [
        (
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        ),
        (header::CONTENT_DISPOSITION, content_disposition(&filename)),
    ];
    Ok((StatusCode::OK, headers, body).into_response())
}

fn read_block(reader: &mut ObjectDecoder) -> io::Result<Bytes> {
    let mut block = Vec::with_capacity(DOWNLOAD_BLOCK);
    (&mut *reader)
        .take(DOWNLOAD_BLOCK as u64)
        .read_to_end(&mut block)?;
    Ok(Bytes::from(block))
}

fn stream_plaintext(mut reader: ObjectDecoder, tx: mpsc::Sender<io::Result<Bytes>>) {
    loop {
        match read_block(&mut reader) {
            Ok(block) if block.is_empty() => break,
            Ok(block) => {
                if tx.blocking_send(Ok(block)).is_err() {
                    debug!("download receiver gone");
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "download aborted");
                let _ = tx.blocking_send(Err(e));
                break;
            }
        }
    }
}

fn content_disposition(filename: &str) -> HeaderValue {
    let safe: String = filename
        .chars()
        .map(|c| if c.is_control() || c == '"' || c == '\\' { '_' } else { c })
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{safe}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// `GET /health` — liveness and readiness check.
///
/// Returns `200 OK` when the bucket is reachable, `503` otherwise.
pub async fn health(State(state): State<AppState>) -> Response {
    let reachable = match state.conn.store().bucket_exists(&state.bucket).await {
        Ok(exists) => exists,
        Err(e) => {
            warn!(error = %e, "health check could not reach the object store");
            false
        }
    };

    let (status_code, status_str) = if reachable {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    let body = HealthResponse {
        status: status_str.into(),
        bucket: state.bucket.to_string(),
    };
    (status_code, Json(body)).into_response()
}

/// Catch-all 404 handler.
pub async fn not_found(OriginalUri(uri): OriginalUri) -> impl IntoResponse {
    let err = ErrorResponse::new("not_found", "the requested resource does not exist")
        .with_path(uri.path());
    (StatusCode::NOT_FOUND, Json(err))
}
