//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::store::Connection;

/// Application state shared across all request handlers.
///
/// Every field is cheap to clone so Axum can clone the state per request.
#[derive(Clone)]
pub struct AppState {
    /// Object store and key material.
    pub conn: Connection,
    /// Bucket holding every encrypted object.
    pub bucket: Arc<String>,
    /// Chunk size for new uploads; 0 selects whole mode.
    pub chunk_size: u64,
    /// Largest accepted request body in bytes.
    pub max_upload_size: usize,
}

impl AppState {
    pub fn new(conn: Connection, bucket: String, chunk_size: u64, max_upload_size: usize) -> Self {
        Self {
            conn,
            bucket: Arc::new(bucket),
            chunk_size,
            max_upload_size,
        }
    }
}

#[cfg(test)]
pub const TEST_BUCKET: &str = "files";

#[cfg(test)]
impl AppState {
    /// State over `store` with small part limits and a 16-byte chunk size.
    pub fn for_store(store: Arc<dyn crate::store::ObjectStore>) -> Self {
        use crate::store::PartLimits;

        let limits = PartLimits {
            min_part_size: 16,
            max_part_size: 1 << 20,
            max_parts: 10_000,
        };
        let key = codec::AesKey::from_slice(&[7u8; codec::KEY_LEN]).expect("32-byte key");
        Self::new(Connection::new(store, key, limits), TEST_BUCKET.into(), 16, 1 << 20)
    }
}

#[cfg(test)]
impl Default for AppState {
    /// In-memory store holding an empty bucket, suitable for tests.
    fn default() -> Self {
        Self::for_store(Arc::new(crate::store::memory::MemoryStore::with_bucket(TEST_BUCKET)))
    }
}
