//! Streaming AES-256-GCM codec for data at rest.
//!
//! Every encrypted object starts with a 70-byte header written in clear:
//!
//! ```text
//! 0             50              58            70
//! +-------------+---------------+-------------+
//! |  filename   |  chunk size   |     IV      |
//! +-------------+---------------+-------------+
//!   NUL-padded     u64, BE         12 bytes
//! ```
//!
//! The first 58 bytes are the AAD of every sealed segment. The IV is not part
//! of the AAD; it is bound through the nonce instead.
//!
//! * Chunk size 0 (whole mode): `header || ciphertext || tag`, one AEAD call,
//!   nonce = IV.
//! * Chunk size > 0 (chunk mode): `header` followed by records
//!   `seq (4, BE) || ciphertext || tag`, nonce = IV with its last four bytes
//!   XOR-ed by `seq`. The last record carries [`LAST_CHUNK_SEQ`].
//!
//! [`EncodeWriter`] and [`DecodeReader`] speak `std::io`; errors travel as
//! [`std::io::Error`] and can be recovered with [`CodecError::from_io`].

mod chunk;
mod cipher;
mod decode;
mod encode;
mod error;
mod header;
mod sink;
mod whole;

use std::io::{Read, Write};

pub use chunk::{ChunkReader, ChunkWriter, RECORD_OVERHEAD};
pub use cipher::{AesKey, KEY_LEN, NONCE_LEN, TAG_LEN};
pub use decode::DecodeReader;
pub use encode::EncodeWriter;
pub use error::CodecError;
pub use header::{Header, AAD_LEN, FILENAME_LEN, HEADER_LEN, IV_LEN, LAST_CHUNK_SEQ, SEQ_LEN};
pub use sink::Sink;
pub use whole::{WholeReader, WholeWriter};

/// Encrypt `plaintext` in memory under a fresh random IV.
///
/// # Errors
///
/// Header errors ([`CodecError::FilenameTooLong`], [`CodecError::FilenameHasNul`])
/// and [`CodecError::ChunkSizeTooLarge`].
pub fn seal_to_vec(
    key: &AesKey,
    chunk_size: u64,
    filename: &str,
    plaintext: &[u8],
) -> Result<Vec<u8>, CodecError> {
    let header = Header::new(chunk_size, filename)?;
    let mut writer = EncodeWriter::new(key, header, Vec::with_capacity(plaintext.len()))?;
    writer.write_all(plaintext)?;
    writer.close()?;
    Ok(writer.into_inner())
}

/// Decrypt a complete encrypted object held in memory.
///
/// Returns the filename recorded in the header and the plaintext.
///
/// # Errors
///
/// Any format, sequencing or authentication error of the stream.
pub fn open_from_slice(key: &AesKey, data: &[u8]) -> Result<(String, Vec<u8>), CodecError> {
    let mut reader = DecodeReader::new(key, data);
    let mut plaintext = Vec::new();
    reader.read_to_end(&mut plaintext)?;
    Ok((reader.filename()?, plaintext))
}
