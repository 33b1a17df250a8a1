use std::io::{self, Write};

use crate::chunk::ChunkWriter;
use crate::cipher::{build_cipher, AesKey};
use crate::error::CodecError;
use crate::header::Header;
use crate::sink::Sink;
use crate::whole::WholeWriter;

/// Encrypting writer, selected once from the header's chunk size.
pub enum EncodeWriter<W: Sink> {
    Whole(WholeWriter<W>),
    Chunk(ChunkWriter<W>),
}

impl<W: Sink> EncodeWriter<W> {
    /// Wrap `dest` so that everything written is encrypted under `key`.
    ///
    /// Nothing reaches `dest` until the first full chunk (chunk mode) or until
    /// [`Sink::close`] (whole mode). `close` must be called to emit the final
    /// segment.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::ChunkSizeTooLarge`] if the header's chunk size
    /// cannot be buffered on this platform.
    pub fn new(key: &AesKey, header: Header, dest: W) -> Result<Self, CodecError> {
        let cipher = build_cipher(key);
        if header.is_chunked() {
            Ok(Self::Chunk(ChunkWriter::new(cipher, header, dest)?))
        } else {
            Ok(Self::Whole(WholeWriter::new(cipher, header, dest)))
        }
    }

    pub fn header(&self) -> &Header {
        match self {
            Self::Whole(w) => w.header(),
            Self::Chunk(w) => w.header(),
        }
    }

    pub fn into_inner(self) -> W {
        match self {
            Self::Whole(w) => w.into_inner(),
            Self::Chunk(w) => w.into_inner(),
        }
    }
}

impl<W: Sink> Write for EncodeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Whole(w) => w.write(buf),
            Self::Chunk(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Whole(w) => w.flush(),
            Self::Chunk(w) => w.flush(),
        }
    }
}

impl<W: Sink> Sink for EncodeWriter<W> {
    fn close(&mut self) -> io::Result<()> {
        match self {
            Self::Whole(w) => w.close(),
            Self::Chunk(w) => w.close(),
        }
    }
}
