//! In-memory [`ObjectStore`] used by the test-suite.
//!
//! Enforces the multipart rules of a real object store: part numbers start at
//! 1 and arrive in order, completion must list exactly the uploaded parts,
//! finished sessions reject further calls, and objects need an existing bucket.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{stream, StreamExt};

use super::client::{
    CompletedPart, ObjectInfo, ObjectReader, ObjectStore, ObjectStream, StoreError, UploadInfo,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Completed,
    Aborted,
}

struct Session {
    bucket: String,
    key: String,
    state: SessionState,
    parts: Vec<(CompletedPart, Bytes)>,
}

#[derive(Default)]
struct Inner {
    buckets: HashMap<String, BTreeMap<String, Bytes>>,
    sessions: BTreeMap<u64, Session>,
    next_id: u64,
    versions: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    min_part_size: usize,
    fail_part: Option<i32>,
}

fn error(operation: &'static str, status: u16, code: &str) -> StoreError {
    StoreError::Request {
        operation,
        status: Some(status),
        code: Some(code.to_owned()),
        message: format!("{code} ({status})"),
    }
}

fn parse_id(upload_id: &str) -> Option<u64> {
    upload_id.strip_prefix("upload-")?.parse().ok()
}

impl MemoryStore {
    pub fn with_bucket(bucket: &str) -> Self {
        let store = Self::default();
        store
            .inner
            .lock()
            .unwrap()
            .buckets
            .insert(bucket.to_owned(), BTreeMap::new());
        store
    }

    /// Reject completion when a part other than the last is smaller than `n`.
    pub fn min_part_size(mut self, n: usize) -> Self {
        self.min_part_size = n;
        self
    }

    /// Fail every upload of part number `n`.
    pub fn fail_part(mut self, n: i32) -> Self {
        self.fail_part = Some(n);
        self
    }

    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Bytes>) {
        self.inner
            .lock()
            .unwrap()
            .buckets
            .entry(bucket.to_owned())
            .or_default()
            .insert(key.to_owned(), body.into());
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let inner = self.inner.lock().unwrap();
        inner.buckets.get(bucket)?.get(key).cloned()
    }

    pub fn session_states(&self) -> Vec<SessionState> {
        let inner = self.inner.lock().unwrap();
        inner.sessions.values().map(|s| s.state).collect()
    }

    pub fn open_sessions(&self) -> usize {
        self.session_states()
            .into_iter()
            .filter(|s| *s == SessionState::Open)
            .count()
    }

    /// Sizes of the parts uploaded in the most recent session for `key`.
    pub fn part_sizes(&self, key: &str) -> Vec<usize> {
        let inner = self.inner.lock().unwrap();
        inner
            .sessions
            .values()
            .rev()
            .find(|s| s.key == key)
            .map(|s| s.parts.iter().map(|(_, body)| body.len()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn list_objects(&self, bucket: &str) -> ObjectStream {
        let inner = self.inner.lock().unwrap();
        let items: Vec<Result<ObjectInfo, StoreError>> = match inner.buckets.get(bucket) {
            Some(objects) => objects
                .iter()
                .map(|(key, body)| {
                    Ok(ObjectInfo {
                        key: key.clone(),
                        size: body.len() as i64,
                    })
                })
                .collect(),
            None => vec![Err(error("ListObjectsV2", 404, "NoSuchBucket"))],
        };
        stream::iter(items).boxed()
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader, StoreError> {
        let inner = self.inner.lock().unwrap();
        let objects = inner
            .buckets
            .get(bucket)
            .ok_or_else(|| error("GetObject", 404, "NoSuchBucket"))?;
        let body = objects
            .get(key)
            .ok_or_else(|| error("GetObject", 404, "NoSuchKey"))?;
        Ok(Box::pin(Cursor::new(body.to_vec())))
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        Ok(self.inner.lock().unwrap().buckets.contains_key(bucket))
    }

    async fn make_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.buckets.contains_key(bucket) {
            return Err(error("CreateBucket", 409, "BucketAlreadyOwnedByYou"));
        }
        inner.buckets.insert(bucket.to_owned(), BTreeMap::new());
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        _content_type: &str,
    ) -> Result<UploadInfo, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.versions += 1;
        let version_id = format!("v{}", inner.versions);
        let objects = inner
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| error("PutObject", 404, "NoSuchBucket"))?;
        objects.insert(key.to_owned(), body);
        Ok(UploadInfo {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            etag: format!("etag-{version_id}"),
            version_id,
        })
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        _content_type: &str,
    ) -> Result<String, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.buckets.contains_key(bucket) {
            return Err(error("CreateMultipartUpload", 404, "NoSuchBucket"));
        }
        inner.next_id += 1;
        let id = inner.next_id;
        inner.sessions.insert(
            id,
            Session {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                state: SessionState::Open,
                parts: Vec::new(),
            },
        );
        Ok(format!("upload-{id}"))
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<CompletedPart, StoreError> {
        if self.fail_part == Some(part_number) {
            return Err(error("UploadPart", 500, "InternalError"));
        }
        let mut inner = self.inner.lock().unwrap();
        let session = parse_id(upload_id)
            .and_then(|id| inner.sessions.get_mut(&id))
            .filter(|s| s.state == SessionState::Open)
            .ok_or_else(|| error("UploadPart", 404, "NoSuchUpload"))?;
        if part_number != session.parts.len() as i32 + 1 {
            return Err(error("UploadPart", 400, "InvalidPartOrder"));
        }
        let part = CompletedPart {
            part_number,
            etag: format!("etag-{upload_id}-{part_number}"),
        };
        session.parts.push((part.clone(), body));
        Ok(part)
    }

    async fn complete_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<UploadInfo, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let session = parse_id(upload_id)
            .and_then(|id| inner.sessions.get_mut(&id))
            .filter(|s| s.state == SessionState::Open)
            .ok_or_else(|| error("CompleteMultipartUpload", 404, "NoSuchUpload"))?;

        let uploaded: Vec<&CompletedPart> = session.parts.iter().map(|(p, _)| p).collect();
        if parts.is_empty() || parts.iter().collect::<Vec<_>>() != uploaded {
            return Err(error("CompleteMultipartUpload", 400, "InvalidPart"));
        }
        let last = session.parts.len() - 1;
        if session.parts[..last]
            .iter()
            .any(|(_, body)| body.len() < self.min_part_size)
        {
            return Err(error("CompleteMultipartUpload", 400, "EntityTooSmall"));
        }

        let mut body = BytesMut::new();
        for (_, part) in &session.parts {
            body.extend_from_slice(part);
        }
        session.state = SessionState::Completed;
        let (bucket, key) = (session.bucket.clone(), session.key.clone());

        inner.versions += 1;
        let version_id = format!("v{}", inner.versions);
        inner
            .buckets
            .entry(bucket.clone())
            .or_default()
            .insert(key.clone(), body.freeze());
        Ok(UploadInfo {
            bucket,
            key,
            etag: format!("etag-{upload_id}"),
            version_id,
        })
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let session = parse_id(upload_id)
            .and_then(|id| inner.sessions.get_mut(&id))
            .filter(|s| s.state == SessionState::Open)
            .ok_or_else(|| error("AbortMultipartUpload", 404, "NoSuchUpload"))?;
        session.state = SessionState::Aborted;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn enforces_part_order_and_exact_completion() {
        let store = MemoryStore::with_bucket("b");
        let id = store.create_multipart_upload("b", "k", "x").await.unwrap();

        let err = store
            .upload_part("b", "k", &id, 2, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Request { status: Some(400), .. }));

        let p1 = store
            .upload_part("b", "k", &id, 1, Bytes::from_static(b"ab"))
            .await
            .unwrap();
        let p2 = store
            .upload_part("b", "k", &id, 2, Bytes::from_static(b"cd"))
            .await
            .unwrap();

        // a subset of the uploaded parts is rejected
        assert!(store
            .complete_multipart_upload("b", "k", &id, vec![p1.clone()])
            .await
            .is_err());

        store
            .complete_multipart_upload("b", "k", &id, vec![p1, p2])
            .await
            .unwrap();
        assert_eq!(store.object("b", "k").unwrap(), Bytes::from_static(b"abcd"));

        assert!(store.abort_multipart_upload("b", "k", &id).await.is_err());
        assert_eq!(store.session_states(), vec![SessionState::Completed]);
    }

    #[tokio::test]
    async fn missing_bucket_and_key() {
        let store = MemoryStore::with_bucket("b");
        assert!(store.get_object("b", "nope").await.err().unwrap().is_not_found());
        assert!(store
            .put_object("other", "k", Bytes::new(), "x")
            .await
            .unwrap_err()
            .is_not_found());

        store.insert("b", "k", b"hello".to_vec());
        let mut body = Vec::new();
        store
            .get_object("b", "k")
            .await
            .unwrap()
            .read_to_end(&mut body)
            .await
            .unwrap();
        assert_eq!(body, b"hello");
    }
}
