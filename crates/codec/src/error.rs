//! Errors produced by the codec layer.

use std::io;

use thiserror::Error;

use crate::cipher::KEY_LEN;
use crate::header::FILENAME_LEN;

/// Errors produced while building headers, sealing, or opening an encrypted stream.
///
/// Readers and writers speak `std::io`, so every variant also travels inside an
/// [`io::Error`]; use [`CodecError::from_io`] to get it back out.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The filename does not fit in the header.
    #[error("filename too long: {0} bytes, max {FILENAME_LEN} bytes")]
    FilenameTooLong(usize),

    /// The filename contains a NUL byte, which is reserved for header padding.
    #[error("filename must not contain NUL bytes")]
    FilenameHasNul,

    /// The key is the wrong length (must be [`KEY_LEN`] bytes).
    #[error("invalid key length: expected {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),

    /// The key is not valid hexadecimal.
    #[error("invalid hex key: {0}")]
    InvalidKeyHex(#[from] hex::FromHexError),

    /// The chunk size recorded in a header cannot be addressed on this platform.
    #[error("chunk size {0} does not fit in memory")]
    ChunkSizeTooLarge(u64),

    /// The source ended before a complete header was read.
    #[error("truncated header")]
    TruncatedHeader,

    /// The writer has already been closed.
    #[error("writer already closed")]
    WriterClosed,

    /// The stream produced more chunks than the sequence number space allows.
    #[error("too many chunks: the sequence counter reached the final-chunk marker")]
    TooMuchChunk,

    /// A chunk carried an unexpected sequence number.
    #[error("chunk in invalid sequence: expected {expected}, found {found}")]
    InvalidSeqNum {
        /// Sequence number the reader expected next.
        expected: u32,
        /// Sequence number carried by the record.
        found: u32,
    },

    /// A record ended early and is not the final chunk.
    #[error("truncated chunk record")]
    TruncatedChunk,

    /// The stream ended without a final chunk.
    #[error("stream ended without a final chunk")]
    MissingFinalChunk,

    /// Bytes follow the final chunk.
    #[error("unexpected data after the final chunk")]
    TrailingData,

    /// The header has not been read from the source yet.
    #[error("header not read yet")]
    NoFirstRead,

    /// AEAD authentication failed: tampered data, wrong key, or wrong nonce.
    #[error("authentication failed")]
    Authentication,

    /// AEAD sealing failed (plaintext exceeds the per-nonce limit).
    #[error("aead seal failed")]
    Seal,

    /// The destination accepted fewer bytes than offered.
    #[error("short write")]
    ShortWrite,

    /// The reader already failed and cannot resume mid-stream.
    #[error("reader failed earlier and cannot resume")]
    Poisoned,

    /// The underlying source or destination failed.
    #[error("i/o error: {0}")]
    Io(io::Error),
}

impl CodecError {
    /// Recover the [`CodecError`] carried by an [`io::Error`], if any.
    pub fn from_io(err: &io::Error) -> Option<&CodecError> {
        err.get_ref().and_then(|inner| inner.downcast_ref::<CodecError>())
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            CodecError::Io(err) => err.kind(),
            CodecError::FilenameTooLong(_)
            | CodecError::FilenameHasNul
            | CodecError::InvalidKeyLength(_)
            | CodecError::InvalidKeyHex(_)
            | CodecError::ChunkSizeTooLarge(_)
            | CodecError::Seal => io::ErrorKind::InvalidInput,
            CodecError::TruncatedHeader => io::ErrorKind::UnexpectedEof,
            CodecError::WriterClosed => io::ErrorKind::BrokenPipe,
            CodecError::ShortWrite => io::ErrorKind::WriteZero,
            CodecError::NoFirstRead => io::ErrorKind::Other,
            CodecError::TooMuchChunk
            | CodecError::InvalidSeqNum { .. }
            | CodecError::TruncatedChunk
            | CodecError::MissingFinalChunk
            | CodecError::TrailingData
            | CodecError::Poisoned
            | CodecError::Authentication => io::ErrorKind::InvalidData,
        }
    }
}

impl From<CodecError> for io::Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(inner) => inner,
            other => io::Error::new(other.io_kind(), other),
        }
    }
}

impl From<io::Error> for CodecError {
    /// Unwraps a [`CodecError`] travelling inside `err`, or keeps `err` as [`CodecError::Io`].
    fn from(err: io::Error) -> Self {
        if CodecError::from_io(&err).is_none() {
            return CodecError::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<CodecError>()) {
            Some(Ok(codec)) => *codec,
            _ => CodecError::Poisoned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_io_error() {
        let err: io::Error = CodecError::InvalidSeqNum { expected: 2, found: 7 }.into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(matches!(
            CodecError::from_io(&err),
            Some(CodecError::InvalidSeqNum { expected: 2, found: 7 })
        ));
    }

    #[test]
    fn foreign_io_error_has_no_codec_error() {
        let err = io::Error::new(io::ErrorKind::Other, "disk on fire");
        assert!(CodecError::from_io(&err).is_none());
        let codec = CodecError::from(err);
        assert!(matches!(codec, CodecError::Io(_)));
        assert_eq!(io::Error::from(codec).kind(), io::ErrorKind::Other);
    }

    #[test]
    fn owned_conversion_unwraps_codec_error() {
        let err: io::Error = CodecError::TrailingData.into();
        assert!(matches!(CodecError::from(err), CodecError::TrailingData));
    }

    #[test]
    fn display_includes_limit() {
        let e = CodecError::FilenameTooLong(51);
        assert!(e.to_string().contains("max 50 bytes"));
    }
}
