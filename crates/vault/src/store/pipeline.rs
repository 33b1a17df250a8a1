//! Pipeline orchestrator: connects a plaintext source to an encrypted object.
//!
//! `push_object` runs the copy (source → [`EncodeWriter`] → [`UploadWriter`])
//! on a blocking thread and races it against the caller's cancellation token.
//! `get_object` hands back a lazy [`DecodeReader`] to be drained on a blocking
//! thread.

use std::io::{self, Read};
use std::sync::Arc;

use codec::{AesKey, CodecError, DecodeReader, EncodeWriter, Header, Sink, HEADER_LEN, RECORD_OVERHEAD};
use futures::StreamExt;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::{ObjectInfo, ObjectReader, ObjectStore, StoreError, UploadInfo};
use super::writer::{UploadFailure, UploadTarget, UploadWriter};

/// Content type recorded for every stored object; the body is ciphertext.
pub const ENCRYPTED_CONTENT_TYPE: &str = "application/octet-stream";

/// Plaintext reader over a stored object.
pub type ObjectDecoder = DecodeReader<SyncIoBridge<ObjectReader>>;

/// Part size and count limits of the object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartLimits {
    pub min_part_size: u64,
    pub max_part_size: u64,
    pub max_parts: u64,
}

impl Default for PartLimits {
    fn default() -> Self {
        Self {
            min_part_size: 5 << 20,
            max_part_size: 5 << 30,
            max_parts: 10_000,
        }
    }
}

impl PartLimits {
    /// Accepts 0 (whole mode) or a chunk size whose parts fit the limits.
    ///
    /// The largest part is the first one: header, sequence number, one full
    /// chunk and its tag.
    pub fn validate_chunk_size(&self, chunk_size: u64) -> Result<(), PipelineError> {
        if chunk_size == 0 {
            return Ok(());
        }
        let largest = chunk_size.checked_add((HEADER_LEN + RECORD_OVERHEAD) as u64);
        match largest {
            Some(largest) if chunk_size >= self.min_part_size && largest <= self.max_part_size => {
                Ok(())
            }
            _ => Err(PipelineError::InvalidChunkSize {
                chunk_size,
                min: self.min_part_size,
                max: self
                    .max_part_size
                    .saturating_sub((HEADER_LEN + RECORD_OVERHEAD) as u64),
            }),
        }
    }

    /// Reject a payload of known length that the object store could not take.
    pub fn check_size(&self, chunk_size: u64, payload_len: u64) -> Result<(), PipelineError> {
        if chunk_size == 0 {
            let size = payload_len.saturating_add((HEADER_LEN + codec::TAG_LEN) as u64);
            if size > self.max_part_size {
                return Err(PipelineError::ObjectTooLarge {
                    size,
                    max: self.max_part_size,
                });
            }
            return Ok(());
        }
        // the final record may be a full chunk, so parts == ceil(len / chunk), at least 1
        let parts = payload_len.div_ceil(chunk_size).max(1);
        if parts > self.max_parts {
            return Err(PipelineError::TooManyParts {
                parts,
                max: self.max_parts,
            });
        }
        Ok(())
    }
}

/// Parameters of one upload.
#[derive(Debug, Clone)]
pub struct PushRequest {
    pub bucket: String,
    pub object_name: String,
    /// Stored in the encrypted header; at most 50 bytes.
    pub filename: String,
    pub chunk_size: u64,
    /// Plaintext length when known in advance.
    pub size_hint: Option<u64>,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("chunk size {chunk_size} must be 0 or between {min} and {max} bytes")]
    InvalidChunkSize { chunk_size: u64, min: u64, max: u64 },

    #[error("upload needs {parts} parts, the object store allows {max}")]
    TooManyParts { parts: u64, max: u64 },

    #[error("object of {size} bytes exceeds the single upload limit of {max} bytes")]
    ObjectTooLarge { size: u64, max: u64 },

    #[error("upload cancelled")]
    Cancelled,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("transfer failed: {source}{}", .cleanup.as_ref().map(|e| format!(" (abort failed: {e})")).unwrap_or_default())]
    Transfer {
        source: io::Error,
        cleanup: Option<StoreError>,
    },

    /// The upload writer reported no object. A session the store refused to
    /// complete has been aborted; `cleanup` holds a failed abort.
    #[error("upload failed: {0}")]
    Upload(#[from] UploadFailure),

    #[error("transfer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PipelineError {
    /// The [`StoreError`] behind this failure, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Store(e) => Some(e),
            Self::Transfer { source, .. } => StoreError::from_io(source),
            Self::Upload(e) => Some(&e.source),
            _ => None,
        }
    }

    /// The [`CodecError`] behind this failure, if any.
    pub fn codec_error(&self) -> Option<&CodecError> {
        match self {
            Self::Codec(e) => Some(e),
            Self::Transfer { source, .. } => CodecError::from_io(source),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled) || matches!(self.store_error(), Some(StoreError::Cancelled))
    }
}

/// Object store plus key material; cheap to clone.
#[derive(Clone)]
pub struct Connection {
    store: Arc<dyn ObjectStore>,
    key: Arc<AesKey>,
    limits: PartLimits,
}

impl Connection {
    pub fn new(store: Arc<dyn ObjectStore>, key: AesKey, limits: PartLimits) -> Self {
        Self {
            store,
            key: Arc::new(key),
            limits,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Encrypt everything `source` yields into `req.bucket/req.object_name`.
    ///
    /// `source` is read on a blocking thread. When `cancel` fires while the
    /// transfer is still running the call returns [`PipelineError::Cancelled`]
    /// at once; the transfer notices on its next write or close and aborts the
    /// upload. A transfer that already closed the writer is not undone: its
    /// completion is awaited and reported as usual. Cancelling during that
    /// last `close` can still commit the object after `Cancelled` is returned.
    ///
    /// # Errors
    ///
    /// Validation errors before any transfer, [`PipelineError::Transfer`]
    /// when reading, encrypting or uploading fails, and
    /// [`PipelineError::Upload`] when the finished upload yields no object.
    /// Any open multipart session is aborted first and an abort failure is
    /// attached.
    pub async fn push_object<R>(
        &self,
        source: R,
        req: PushRequest,
        cancel: CancellationToken,
    ) -> Result<UploadInfo, PipelineError>
    where
        R: Read + Send + 'static,
    {
        self.limits.validate_chunk_size(req.chunk_size)?;
        if let Some(len) = req.size_hint {
            self.limits.check_size(req.chunk_size, len)?;
        }
        let header = Header::new(req.chunk_size, &req.filename)?;

        let target = UploadTarget {
            bucket: req.bucket,
            key: req.object_name,
            content_type: ENCRYPTED_CONTENT_TYPE.to_owned(),
        };
        let object = target.key.clone();
        let (upload, completion) = UploadWriter::new(
            Arc::clone(&self.store),
            target,
            req.chunk_size,
            cancel.clone(),
            Handle::current(),
        );
        let writer = EncodeWriter::new(&self.key, header, upload)?;
        debug!(object = %object, chunk_size = req.chunk_size, "upload started");

        let mut transfer = tokio::task::spawn_blocking(move || transfer(source, writer));
        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            joined = &mut transfer => Some(joined),
        };
        let copied = match joined {
            Some(joined) => joined??,
            None if transfer.is_finished() => transfer.await??,
            None => {
                warn!(object = %object, "upload cancelled by caller");
                return Err(PipelineError::Cancelled);
            }
        };

        let info = completion.wait().await?;
        info!(
            bucket = %info.bucket,
            object = %info.key,
            plaintext_bytes = copied,
            "encrypted upload stored"
        );
        Ok(info)
    }

    /// Open a decrypting reader over a stored object.
    ///
    /// Nothing is authenticated until the reader is read; consume it on a
    /// blocking thread.
    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectDecoder, PipelineError> {
        let body = self.store.get_object(bucket, key).await?;
        Ok(DecodeReader::new(&self.key, SyncIoBridge::new(body)))
    }

    /// Every object in `bucket`.
    ///
    /// The listing is drained even after an error; the first error is
    /// returned once it ends.
    pub async fn list_files(&self, bucket: &str) -> Result<Vec<ObjectInfo>, StoreError> {
        let mut listing = self.store.list_objects(bucket);
        let mut objects = Vec::new();
        let mut first_err = None;
        while let Some(item) = listing.next().await {
            match item {
                Ok(obj) => objects.push(obj),
                Err(e) => {
                    warn!(bucket, error = %e, "listing error");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(objects),
        }
    }

    pub async fn create_bucket_if_not_exists(&self, bucket: &str) -> Result<(), StoreError> {
        if self.store.bucket_exists(bucket).await? {
            debug!(bucket, "bucket exists");
            return Ok(());
        }
        self.store.make_bucket(bucket).await?;
        info!(bucket, "bucket created");
        Ok(())
    }
}

/// Copy `source` through the encoder and close it; abort the upload on failure.
fn transfer<R: Read>(mut source: R, mut writer: EncodeWriter<UploadWriter>) -> Result<u64, PipelineError> {
    let copied = io::copy(&mut source, &mut writer).and_then(|n| writer.close().map(|()| n));
    copied.map_err(|source| {
        let mut upload = writer.into_inner();
        let cleanup = upload.cancel().err();
        warn!(error = %source, abort_failed = cleanup.is_some(), "upload transfer failed");
        PipelineError::Transfer { source, cleanup }
    })
}
