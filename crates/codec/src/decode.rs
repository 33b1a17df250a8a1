use std::io::{self, Read, Write};

use aes_gcm::Aes256Gcm;

use crate::chunk::ChunkReader;
use crate::cipher::{build_cipher, AesKey};
use crate::error::CodecError;
use crate::header::{Header, HEADER_LEN};
use crate::whole::WholeReader;

enum State<R: Read> {
    Unread(R),
    Whole(WholeReader<R>),
    Chunk(ChunkReader<R>),
    Poisoned,
}

/// Decrypting reader over an encrypted stream.
///
/// The header is read lazily, on the first read, and decides between whole
/// and chunk mode. After any error the reader is poisoned and every later read
/// fails with [`CodecError::Poisoned`].
pub struct DecodeReader<R: Read> {
    cipher: Aes256Gcm,
    header: Option<Header>,
    state: State<R>,
}

impl<R: Read> DecodeReader<R> {
    pub fn new(key: &AesKey, src: R) -> Self {
        Self {
            cipher: build_cipher(key),
            header: None,
            state: State::Unread(src),
        }
    }

    /// Read and parse the header without consuming any plaintext.
    ///
    /// # Errors
    ///
    /// [`CodecError::TruncatedHeader`] if the source ends early,
    /// [`CodecError::ChunkSizeTooLarge`] for a chunk size this platform cannot
    /// buffer, and I/O errors from the source.
    pub fn read_header(&mut self) -> Result<&Header, CodecError> {
        if self.header.is_none() {
            self.init()?;
        }
        self.header.as_ref().ok_or(CodecError::Poisoned)
    }

    /// Header, once it has been read.
    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    /// Filename recorded in the header.
    ///
    /// # Errors
    ///
    /// [`CodecError::NoFirstRead`] if nothing has been read yet.
    pub fn filename(&self) -> Result<String, CodecError> {
        self.header
            .as_ref()
            .map(Header::filename)
            .ok_or(CodecError::NoFirstRead)
    }

    /// Copy all remaining plaintext into `dest`.
    pub fn write_to<W: Write + ?Sized>(&mut self, dest: &mut W) -> io::Result<u64> {
        io::copy(self, dest)
    }

    fn init(&mut self) -> Result<(), CodecError> {
        let mut src = match std::mem::replace(&mut self.state, State::Poisoned) {
            State::Unread(src) => src,
            State::Poisoned => return Err(CodecError::Poisoned),
            other => {
                self.state = other;
                return Ok(());
            }
        };

        let mut raw = Vec::with_capacity(HEADER_LEN);
        (&mut src).take(HEADER_LEN as u64).read_to_end(&mut raw)?;
        let mut fixed = [0u8; HEADER_LEN];
        if raw.len() < HEADER_LEN {
            return Err(CodecError::TruncatedHeader);
        }
        fixed.copy_from_slice(&raw);
        let header = Header::parse(fixed);

        let cipher = self.cipher.clone();
        self.state = if header.is_chunked() {
            State::Chunk(ChunkReader::new(cipher, header, src)?)
        } else {
            State::Whole(WholeReader::new(cipher, header, src))
        };
        self.header = Some(header);
        tracing::trace!(
            chunk_size = header.chunk_size(),
            "encrypted stream header read"
        );
        Ok(())
    }
}

impl<R: Read> Read for DecodeReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if matches!(self.state, State::Unread(_)) {
            self.init()?;
        }
        let res = match &mut self.state {
            State::Whole(r) => r.read(out),
            State::Chunk(r) => r.read(out),
            State::Unread(_) | State::Poisoned => return Err(CodecError::Poisoned.into()),
        };
        if res.is_err() {
            self.state = State::Poisoned;
        }
        res
    }
}
