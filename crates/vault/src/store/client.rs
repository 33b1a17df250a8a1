//! Object store capability consumed by the upload writers and the pipeline.
//!
//! The trait mirrors the S3 operations the service needs. [`super::s3::S3Store`]
//! is the production implementation; tests use an in-memory store or a mock.

use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::io::AsyncRead;

/// One entry of a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: i64,
}

/// Result of a finished upload (single put or completed multipart session).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadInfo {
    pub bucket: String,
    pub key: String,
    pub etag: String,
    /// Empty when the bucket is not versioned.
    pub version_id: String,
}

/// A part accepted by the object store, echoed back on completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// Lazy listing; errors are delivered in-band.
pub type ObjectStream = BoxStream<'static, Result<ObjectInfo, StoreError>>;

/// Body of a stored object.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{operation} failed: {message}")]
    Request {
        operation: &'static str,
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },

    #[error("upload cancelled")]
    Cancelled,

    #[error("upload writer is closed")]
    WriterClosed,

    #[error("no data was written to the upload")]
    EmptyUpload,

    #[error("upload finished without reporting a result")]
    Abandoned,
}

impl StoreError {
    pub fn request(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Request {
            operation,
            status: None,
            code: None,
            message: message.into(),
        }
    }

    /// HTTP status of a failed request.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Request { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Request { status, code, .. } => {
                *status == Some(404)
                    || matches!(
                        code.as_deref(),
                        Some("NoSuchKey" | "NoSuchBucket" | "NotFound" | "NoSuchUpload")
                    )
            }
            _ => false,
        }
    }

    pub fn is_forbidden(&self) -> bool {
        match self {
            Self::Request { status, code, .. } => {
                *status == Some(403) || code.as_deref() == Some("AccessDenied")
            }
            _ => false,
        }
    }

    /// Recover a [`StoreError`] carried inside an [`io::Error`].
    pub fn from_io(err: &io::Error) -> Option<&StoreError> {
        err.get_ref().and_then(|inner| inner.downcast_ref::<StoreError>())
    }
}

impl From<StoreError> for io::Error {
    fn from(err: StoreError) -> Self {
        let kind = match err {
            StoreError::WriterClosed => io::ErrorKind::BrokenPipe,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Operations the service performs against an S3-compatible bucket.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn list_objects(&self, bucket: &str) -> ObjectStream;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader, StoreError>;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError>;

    async fn make_bucket(&self, bucket: &str) -> Result<(), StoreError>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<UploadInfo, StoreError>;

    /// Open a multipart session and return its upload id.
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> Result<String, StoreError>;

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<CompletedPart, StoreError>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<UploadInfo, StoreError>;

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StoreError>;
}
