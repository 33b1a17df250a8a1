//! Upload writers: the `Sink` end of the encryption pipeline.
//!
//! Both writers run on a blocking thread and drive each object-store call with
//! [`Handle::block_on`]; calling them from inside an async task panics.
//!
//! - [`MultipartWriter`] opens a multipart session on the first write and
//!   uploads every `write` call as the next part. `close` finalizes the session
//!   in the background and reports through [`Completion`]; a session the store
//!   refuses to complete is aborted before the failure is reported.
//! - [`SingleShotWriter`] uploads its one `write` call as a whole object.

use std::io::{self, Write};
use std::mem;
use std::sync::Arc;

use bytes::Bytes;
use codec::Sink;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::{CompletedPart, ObjectStore, StoreError, UploadInfo};

/// Where an upload goes.
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub bucket: String,
    pub key: String,
    pub content_type: String,
}

/// An upload that did not produce an object, with the outcome of the abort
/// issued for its multipart session, if that abort failed.
#[derive(Debug, Error)]
#[error("{source}{}", .cleanup.as_ref().map(|e| format!(" (abort failed: {e})")).unwrap_or_default())]
pub struct UploadFailure {
    pub source: StoreError,
    pub cleanup: Option<StoreError>,
}

impl From<StoreError> for UploadFailure {
    fn from(source: StoreError) -> Self {
        Self {
            source,
            cleanup: None,
        }
    }
}

type Outcome = Result<UploadInfo, UploadFailure>;

/// Receiving half of an upload's single-slot result.
pub struct Completion(oneshot::Receiver<Outcome>);

impl Completion {
    /// Wait for the upload to finish. A writer dropped without reporting yields
    /// [`StoreError::Abandoned`].
    pub async fn wait(self) -> Outcome {
        self.0
            .await
            .unwrap_or_else(|_| Err(StoreError::Abandoned.into()))
    }
}

/// Upload writer selected from the chunk size.
pub enum UploadWriter {
    Multipart(MultipartWriter),
    SingleShot(SingleShotWriter),
}

impl UploadWriter {
    /// Chunk size 0 selects the single-shot writer, anything else multipart.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        target: UploadTarget,
        chunk_size: u64,
        cancel: CancellationToken,
        runtime: Handle,
    ) -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        let ctx = Ctx {
            store,
            target,
            cancel,
            runtime,
            done: Some(tx),
        };
        let writer = if chunk_size == 0 {
            Self::SingleShot(SingleShotWriter {
                ctx,
                state: ShotState::Open,
            })
        } else {
            Self::Multipart(MultipartWriter {
                ctx,
                state: PartState::NotStarted,
                parts: Vec::new(),
                bytes: 0,
            })
        };
        (writer, Completion(rx))
    }

    /// Abandon the upload. Idempotent: the abort call is issued at most once.
    ///
    /// # Errors
    ///
    /// The object store's error if aborting the multipart session failed.
    pub fn cancel(&mut self) -> Result<(), StoreError> {
        match self {
            Self::Multipart(w) => w.cancel(),
            Self::SingleShot(w) => w.cancel(),
        }
    }
}

impl Write for UploadWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Multipart(w) => w.write(buf),
            Self::SingleShot(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Sink for UploadWriter {
    fn close(&mut self) -> io::Result<()> {
        match self {
            Self::Multipart(w) => w.close(),
            Self::SingleShot(w) => w.close(),
        }
    }
}

struct Ctx {
    store: Arc<dyn ObjectStore>,
    target: UploadTarget,
    cancel: CancellationToken,
    runtime: Handle,
    done: Option<oneshot::Sender<Outcome>>,
}

impl Ctx {
    fn report(&mut self, outcome: Outcome) {
        if let Some(tx) = self.done.take() {
            // receiver gone means nobody waits for the result
            let _ = tx.send(outcome);
        }
    }
}

// ---------------------------------------------------------------------------
// Multipart
// ---------------------------------------------------------------------------

enum PartState {
    NotStarted,
    InProgress { upload_id: String },
    Completed,
    Aborted,
}

pub struct MultipartWriter {
    ctx: Ctx,
    state: PartState,
    parts: Vec<CompletedPart>,
    bytes: u64,
}

impl MultipartWriter {
    fn cancel(&mut self) -> Result<(), StoreError> {
        match mem::replace(&mut self.state, PartState::Aborted) {
            PartState::InProgress { upload_id } => {
                self.ctx.report(Err(StoreError::Cancelled.into()));
                let t = &self.ctx.target;
                let res = self.ctx.runtime.block_on(
                    self.ctx
                        .store
                        .abort_multipart_upload(&t.bucket, &t.key, &upload_id),
                );
                match &res {
                    Ok(()) => info!(
                        bucket = %t.bucket,
                        object = %t.key,
                        parts = self.parts.len(),
                        "multipart upload aborted"
                    ),
                    Err(e) => warn!(
                        bucket = %t.bucket,
                        object = %t.key,
                        error = %e,
                        "failed to abort multipart upload"
                    ),
                }
                res
            }
            PartState::NotStarted => {
                self.ctx.report(Err(StoreError::Cancelled.into()));
                Ok(())
            }
            PartState::Completed => {
                self.state = PartState::Completed;
                Ok(())
            }
            PartState::Aborted => Ok(()),
        }
    }

    fn self_cancel(&mut self) -> io::Error {
        // the abort outcome is logged by cancel; the caller sees the cancellation
        let _ = self.cancel();
        StoreError::Cancelled.into()
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.ctx.cancel.is_cancelled() {
            return Err(self.self_cancel());
        }
        if matches!(self.state, PartState::Completed | PartState::Aborted) {
            return Err(StoreError::WriterClosed.into());
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let t = &self.ctx.target;
        let upload_id = match &self.state {
            PartState::InProgress { upload_id } => upload_id.clone(),
            _ => {
                let id = self.ctx.runtime.block_on(self.ctx.store.create_multipart_upload(
                    &t.bucket,
                    &t.key,
                    &t.content_type,
                ))?;
                debug!(bucket = %t.bucket, object = %t.key, "multipart upload opened");
                self.state = PartState::InProgress {
                    upload_id: id.clone(),
                };
                id
            }
        };

        let part_number = self.parts.len() as i32 + 1;
        let part = self.ctx.runtime.block_on(self.ctx.store.upload_part(
            &t.bucket,
            &t.key,
            &upload_id,
            part_number,
            Bytes::copy_from_slice(buf),
        ))?;
        debug!(
            object = %t.key,
            part_number,
            bytes = buf.len(),
            "part uploaded"
        );
        self.parts.push(part);
        self.bytes += buf.len() as u64;
        Ok(buf.len())
    }

    fn close(&mut self) -> io::Result<()> {
        if self.ctx.cancel.is_cancelled() {
            return Err(self.self_cancel());
        }
        match mem::replace(&mut self.state, PartState::Completed) {
            PartState::InProgress { upload_id } => {
                let store = Arc::clone(&self.ctx.store);
                let target = self.ctx.target.clone();
                let parts = mem::take(&mut self.parts);
                let bytes = self.bytes;
                let done = self.ctx.done.take();
                self.ctx.runtime.spawn(async move {
                    let outcome = match store
                        .complete_multipart_upload(&target.bucket, &target.key, &upload_id, parts)
                        .await
                    {
                        Ok(info) => {
                            info!(bucket = %target.bucket, object = %target.key, bytes, "multipart upload completed");
                            Ok(info)
                        }
                        Err(source) => {
                            // the session stays open on the store until aborted
                            let cleanup = store
                                .abort_multipart_upload(&target.bucket, &target.key, &upload_id)
                                .await
                                .err();
                            warn!(
                                bucket = %target.bucket,
                                object = %target.key,
                                error = %source,
                                abort_failed = cleanup.is_some(),
                                "multipart upload completion failed"
                            );
                            Err(UploadFailure { source, cleanup })
                        }
                    };
                    if let Some(tx) = done {
                        let _ = tx.send(outcome);
                    }
                });
                Ok(())
            }
            PartState::NotStarted => {
                self.ctx.report(Err(StoreError::EmptyUpload.into()));
                Ok(())
            }
            prev @ (PartState::Completed | PartState::Aborted) => {
                self.state = prev;
                Err(StoreError::WriterClosed.into())
            }
        }
    }
}

impl Drop for MultipartWriter {
    fn drop(&mut self) {
        if let PartState::InProgress { upload_id } = mem::replace(&mut self.state, PartState::Aborted)
        {
            let store = Arc::clone(&self.ctx.store);
            let target = self.ctx.target.clone();
            warn!(object = %target.key, "multipart writer dropped mid-upload, aborting");
            self.ctx.runtime.spawn(async move {
                if let Err(e) = store
                    .abort_multipart_upload(&target.bucket, &target.key, &upload_id)
                    .await
                {
                    warn!(object = %target.key, error = %e, "failed to abort multipart upload");
                }
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Single shot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShotState {
    Open,
    Uploaded,
    Closed,
}

pub struct SingleShotWriter {
    ctx: Ctx,
    state: ShotState,
}

impl SingleShotWriter {
    fn cancel(&mut self) -> Result<(), StoreError> {
        if self.state == ShotState::Open {
            self.ctx.report(Err(StoreError::Cancelled.into()));
        }
        self.state = ShotState::Closed;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.ctx.cancel.is_cancelled() {
            let _ = self.cancel();
            return Err(StoreError::Cancelled.into());
        }
        if self.state != ShotState::Open {
            return Err(StoreError::WriterClosed.into());
        }
        // any failure below leaves nothing to retry
        self.state = ShotState::Closed;

        let t = &self.ctx.target;
        let info = self.ctx.runtime.block_on(self.ctx.store.put_object(
            &t.bucket,
            &t.key,
            Bytes::copy_from_slice(buf),
            &t.content_type,
        ))?;
        info!(bucket = %t.bucket, object = %t.key, bytes = buf.len(), "object uploaded");
        self.ctx.report(Ok(info));
        self.state = ShotState::Uploaded;
        Ok(buf.len())
    }

    fn close(&mut self) -> io::Result<()> {
        if self.ctx.cancel.is_cancelled() {
            let _ = self.cancel();
            return Err(StoreError::Cancelled.into());
        }
        match self.state {
            ShotState::Uploaded => {
                self.state = ShotState::Closed;
                Ok(())
            }
            ShotState::Open => {
                self.state = ShotState::Closed;
                self.ctx.report(Err(StoreError::EmptyUpload.into()));
                Ok(())
            }
            ShotState::Closed => Err(StoreError::WriterClosed.into()),
        }
    }
}
