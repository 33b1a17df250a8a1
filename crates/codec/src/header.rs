//! Fixed 70-byte preamble written in clear at the start of every encrypted object.

use aes_gcm::{
    aead::{AeadCore, OsRng},
    Aes256Gcm,
};

use crate::cipher::NONCE_LEN;
use crate::error::CodecError;

/// Bytes reserved for the NUL-padded filename.
pub const FILENAME_LEN: usize = 50;
/// Bytes used by the big-endian chunk size.
pub const CHUNK_SIZE_LEN: usize = 8;
/// Bytes used by the base IV.
pub const IV_LEN: usize = NONCE_LEN;
/// Total header length.
pub const HEADER_LEN: usize = FILENAME_LEN + CHUNK_SIZE_LEN + IV_LEN;
/// Leading header bytes authenticated as AAD by every sealed segment.
pub const AAD_LEN: usize = FILENAME_LEN + CHUNK_SIZE_LEN;
/// Bytes used by the cleartext sequence number in front of each chunk record.
pub const SEQ_LEN: usize = 4;
/// Sequence number reserved for the final chunk record.
pub const LAST_CHUNK_SEQ: u32 = 0xFFFF_FFFF;

const CHUNK_SIZE_OFFSET: usize = FILENAME_LEN;
const IV_OFFSET: usize = AAD_LEN;

/// Encoded header: `filename (50) | chunk size u64 BE (8) | IV (12)`.
///
/// Immutable once built. Writers and readers derive per-segment nonces from it
/// with [`Header::nonce_for`] instead of touching the stored IV.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Header([u8; HEADER_LEN]);

impl Header {
    /// Build a header with a fresh random IV from the OS CSPRNG.
    ///
    /// A `chunk_size` of 0 selects whole mode.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::FilenameTooLong`] if `filename` exceeds
    /// [`FILENAME_LEN`] bytes and [`CodecError::FilenameHasNul`] if it contains NUL.
    pub fn new(chunk_size: u64, filename: &str) -> Result<Self, CodecError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&nonce);
        Self::with_iv(chunk_size, filename, iv)
    }

    /// Build a header with a caller-supplied IV.
    ///
    /// Reusing an IV under the same key breaks GCM; outside of known-answer
    /// tests use [`Header::new`].
    ///
    /// # Errors
    ///
    /// Same as [`Header::new`].
    pub fn with_iv(chunk_size: u64, filename: &str, iv: [u8; IV_LEN]) -> Result<Self, CodecError> {
        let name = filename.as_bytes();
        if name.len() > FILENAME_LEN {
            return Err(CodecError::FilenameTooLong(name.len()));
        }
        if name.contains(&0) {
            return Err(CodecError::FilenameHasNul);
        }

        let mut raw = [0u8; HEADER_LEN];
        raw[..name.len()].copy_from_slice(name);
        raw[CHUNK_SIZE_OFFSET..IV_OFFSET].copy_from_slice(&chunk_size.to_be_bytes());
        raw[IV_OFFSET..].copy_from_slice(&iv);
        Ok(Self(raw))
    }

    /// Decode a header read from an encrypted stream.
    ///
    /// Nothing here is trusted yet: the first segment opened against
    /// [`Header::aad`] and the derived nonce authenticates every field.
    pub fn parse(raw: [u8; HEADER_LEN]) -> Self {
        Self(raw)
    }

    /// Raw header bytes, as written to the destination.
    pub fn as_bytes(&self) -> &[u8; HEADER_LEN] {
        &self.0
    }

    /// Base IV.
    pub fn iv(&self) -> [u8; IV_LEN] {
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&self.0[IV_OFFSET..]);
        iv
    }

    /// Chunk size in bytes; 0 means whole mode.
    pub fn chunk_size(&self) -> u64 {
        let mut buf = [0u8; CHUNK_SIZE_LEN];
        buf.copy_from_slice(&self.0[CHUNK_SIZE_OFFSET..IV_OFFSET]);
        u64::from_be_bytes(buf)
    }

    /// `true` when the object is split into chunk records.
    pub fn is_chunked(&self) -> bool {
        self.chunk_size() > 0
    }

    /// Filename with the NUL padding removed.
    pub fn filename(&self) -> String {
        let name = &self.0[..FILENAME_LEN];
        let end = name.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        String::from_utf8_lossy(&name[..end]).into_owned()
    }

    /// Additional authenticated data: filename and chunk size.
    pub fn aad(&self) -> &[u8] {
        &self.0[..AAD_LEN]
    }

    /// Nonce for the chunk record carrying `seq`: the base IV with its last
    /// four bytes XOR-ed with `seq` in big-endian order.
    pub fn nonce_for(&self, seq: u32) -> [u8; NONCE_LEN] {
        let mut nonce = self.iv();
        for (b, s) in nonce[NONCE_LEN - SEQ_LEN..].iter_mut().zip(seq.to_be_bytes()) {
            *b ^= s;
        }
        nonce
    }
}

impl std::fmt::Debug for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Header")
            .field("filename", &self.filename())
            .field("chunk_size", &self.chunk_size())
            .field("iv", &hex::encode(self.iv()))
            .finish()
    }
}
