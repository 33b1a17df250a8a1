//! AES-256-GCM cipher provider and key material.
//!
//! Every sealed segment of an object uses the same key, the header's AAD, and a
//! nonce that is unique within the object (see [`crate::header::Header::nonce_for`]).

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce,
};
use zeroize::{Zeroize, Zeroizing};

use crate::error::CodecError;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of an AES-GCM nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Byte length of the GCM authentication tag appended to every sealed segment.
pub const TAG_LEN: usize = 16;

/// Fixed-size AES-256 key.
///
/// The bytes are overwritten with zeroes on drop and never printed.
#[derive(Clone)]
pub struct AesKey(Box<[u8; KEY_LEN]>);

impl AesKey {
    /// Build a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKeyLength`] if `bytes` is not [`KEY_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != KEY_LEN {
            return Err(CodecError::InvalidKeyLength(bytes.len()));
        }
        let mut buf = Box::new([0u8; KEY_LEN]);
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    /// Parse a key from its hexadecimal representation (64 hex characters).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKeyHex`] for non-hex input and
    /// [`CodecError::InvalidKeyLength`] if it does not decode to [`KEY_LEN`] bytes.
    pub fn from_hex(s: &str) -> Result<Self, CodecError> {
        let decoded = Zeroizing::new(hex::decode(s.trim())?);
        Self::from_slice(&decoded)
    }

    /// Borrow the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Drop for AesKey {
    fn drop(&mut self) {
        self.0.as_mut_slice().zeroize();
    }
}

impl std::fmt::Debug for AesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesKey([REDACTED])")
    }
}

/// Construct the AEAD instance for `key`.
pub(crate) fn build_cipher(key: &AesKey) -> Aes256Gcm {
    Aes256Gcm::new(key.as_bytes().into())
}

/// Seal `buf` in place and return the detached tag.
pub(crate) fn seal_in_place(
    cipher: &Aes256Gcm,
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    buf: &mut [u8],
) -> Result<[u8; TAG_LEN], CodecError> {
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(nonce), aad, buf)
        .map_err(|_| CodecError::Seal)?;
    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(&tag);
    Ok(out)
}

/// Open `buf` (`ciphertext || tag`) in place; on success the tag is stripped.
pub(crate) fn open_in_place(
    cipher: &Aes256Gcm,
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    buf: &mut Vec<u8>,
) -> Result<(), CodecError> {
    cipher
        .decrypt_in_place(Nonce::from_slice(nonce), aad, buf)
        .map_err(|_| CodecError::Authentication)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY_HEX: &str = "000102030405060708090A0B0C0D0E0FF0E0D0C0B0A090807060504030201000";

    #[test]
    fn key_from_hex() {
        let key = AesKey::from_hex(TEST_KEY_HEX).unwrap();
        assert_eq!(key.as_bytes()[0], 0x00);
        assert_eq!(key.as_bytes()[15], 0x0F);
        assert_eq!(key.as_bytes()[16], 0xF0);
    }

    #[test]
    fn key_rejects_wrong_length() {
        assert!(matches!(
            AesKey::from_slice(&[0u8; 16]),
            Err(CodecError::InvalidKeyLength(16))
        ));
        assert!(matches!(
            AesKey::from_hex("0011"),
            Err(CodecError::InvalidKeyLength(2))
        ));
    }

    #[test]
    fn key_rejects_bad_hex() {
        assert!(matches!(
            AesKey::from_hex("zz"),
            Err(CodecError::InvalidKeyHex(_))
        ));
    }

    #[test]
    fn key_bytes_are_wiped() {
        let mut key = AesKey::from_hex(TEST_KEY_HEX).unwrap();
        assert!(key.as_bytes().iter().any(|&b| b != 0));
        // same call the drop impl makes
        key.0.as_mut_slice().zeroize();
        assert_eq!(key.as_bytes(), &[0u8; KEY_LEN]);
    }

    #[test]
    fn key_redacted_in_debug() {
        let key = AesKey::from_slice(&[0x42; KEY_LEN]).unwrap();
        assert!(format!("{key:?}").contains("REDACTED"));
    }

    #[test]
    fn seal_open_round_trip() {
        let cipher = build_cipher(&AesKey::from_hex(TEST_KEY_HEX).unwrap());
        let nonce = [7u8; NONCE_LEN];
        let mut buf = b"hello".to_vec();
        let tag = seal_in_place(&cipher, &nonce, b"aad", &mut buf).unwrap();
        assert_ne!(buf, b"hello");
        buf.extend_from_slice(&tag);
        assert_eq!(buf.len(), 5 + TAG_LEN);
        open_in_place(&cipher, &nonce, b"aad", &mut buf).unwrap();
        assert_eq!(buf, b"hello");
    }

    #[test]
    fn wrong_aad_fails_auth() {
        let cipher = build_cipher(&AesKey::from_hex(TEST_KEY_HEX).unwrap());
        let nonce = [1u8; NONCE_LEN];
        let mut buf = b"secret".to_vec();
        let tag = seal_in_place(&cipher, &nonce, b"a", &mut buf).unwrap();
        buf.extend_from_slice(&tag);
        assert!(matches!(
            open_in_place(&cipher, &nonce, b"b", &mut buf),
            Err(CodecError::Authentication)
        ));
    }

    #[test]
    fn tag_alone_is_not_enough() {
        let cipher = build_cipher(&AesKey::from_hex(TEST_KEY_HEX).unwrap());
        let mut buf = vec![0u8; TAG_LEN - 1];
        assert!(matches!(
            open_in_place(&cipher, &[0u8; NONCE_LEN], b"", &mut buf),
            Err(CodecError::Authentication)
        ));
    }
}
