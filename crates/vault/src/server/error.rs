//! Mapping of pipeline failures onto HTTP responses.

use axum::{
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use codec::CodecError;
use common::{protocol::ErrorResponse, ServiceError};
use thiserror::Error;
use tracing::{error, warn};

use crate::store::{PipelineError, StoreError};

/// Error from the client's request body while it is being streamed.
#[derive(Debug, Error)]
#[error("malformed upload body: {0}")]
pub struct BodyError(pub String);

/// A [`ServiceError`] bound to the request path that produced it.
#[derive(Debug)]
pub struct ApiError {
    error: ServiceError,
    path: String,
}

impl ApiError {
    pub fn new(error: ServiceError, uri: &Uri) -> Self {
        Self {
            error,
            path: uri.path().to_owned(),
        }
    }

    pub fn bad_request(message: impl Into<String>, uri: &Uri) -> Self {
        Self::new(ServiceError::BadRequest(message.into()), uri)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(path = %self.path, error = %self.error, "request failed");
        } else {
            warn!(path = %self.path, error = %self.error, "request rejected");
        }
        let body = ErrorResponse::new(self.error.code(), self.error.message()).with_path(self.path);
        (status, Json(body)).into_response()
    }
}

pub fn from_store(err: &StoreError) -> ServiceError {
    if err.is_not_found() {
        ServiceError::NotFound(err.to_string())
    } else if err.is_forbidden() {
        ServiceError::Forbidden(err.to_string())
    } else if matches!(err, StoreError::Cancelled) {
        ServiceError::Unavailable(err.to_string())
    } else {
        ServiceError::Internal(err.to_string())
    }
}

pub fn from_codec(err: &CodecError) -> ServiceError {
    match err {
        CodecError::FilenameTooLong(_) | CodecError::FilenameHasNul => {
            ServiceError::BadRequest(err.to_string())
        }
        _ => ServiceError::Internal(err.to_string()),
    }
}

pub fn from_pipeline(err: &PipelineError) -> ServiceError {
    match err {
        PipelineError::InvalidChunkSize { .. }
        | PipelineError::TooManyParts { .. }
        | PipelineError::ObjectTooLarge { .. } => ServiceError::BadRequest(err.to_string()),
        _ if err.is_cancelled() => ServiceError::Unavailable(err.to_string()),
        PipelineError::Transfer { source, .. }
            if source.get_ref().is_some_and(|e| e.is::<BodyError>()) =>
        {
            ServiceError::BadRequest(source.to_string())
        }
        _ => {
            if let Some(e) = err.store_error() {
                from_store(e)
            } else if let Some(e) = err.codec_error() {
                from_codec(e)
            } else {
                ServiceError::Internal(err.to_string())
            }
        }
    }
}
