//! Whole mode: the entire payload is sealed in one AEAD call.
//!
//! Both sides hold the full payload in memory, so this mode suits small
//! objects only; large uploads should use chunk mode.

use std::io::{self, Read, Write};

use aes_gcm::Aes256Gcm;

use crate::cipher::{open_in_place, seal_in_place};
use crate::error::CodecError;
use crate::header::{Header, HEADER_LEN};
use crate::sink::Sink;

/// Buffers plaintext and emits `header || ciphertext || tag` on close.
pub struct WholeWriter<W: Sink> {
    cipher: Aes256Gcm,
    header: Header,
    dest: W,
    // header bytes followed by the plaintext written so far
    buf: Vec<u8>,
    closed: bool,
}

impl<W: Sink> WholeWriter<W> {
    pub(crate) fn new(cipher: Aes256Gcm, header: Header, dest: W) -> Self {
        Self {
            cipher,
            header,
            dest,
            buf: header.as_bytes().to_vec(),
            closed: false,
        }
    }

    /// Header written in front of the ciphertext.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Consume the writer and return the destination.
    pub fn into_inner(self) -> W {
        self.dest
    }

    fn finish(&mut self) -> Result<(), CodecError> {
        let nonce = self.header.iv();
        let tag = seal_in_place(
            &self.cipher,
            &nonce,
            self.header.aad(),
            &mut self.buf[HEADER_LEN..],
        )?;
        self.buf.extend_from_slice(&tag);

        let out = std::mem::take(&mut self.buf);
        if self.dest.write(&out)? != out.len() {
            return Err(CodecError::ShortWrite);
        }
        tracing::trace!(bytes = out.len(), "whole-mode object sealed");
        self.dest.close()?;
        Ok(())
    }
}

impl<W: Sink> Write for WholeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(CodecError::WriterClosed.into());
        }
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: Sink> Sink for WholeWriter<W> {
    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Err(CodecError::WriterClosed.into());
        }
        self.closed = true;
        self.finish().map_err(io::Error::from)
    }
}

/// Reads the whole remaining source on first use, then serves the plaintext.
pub struct WholeReader<R: Read> {
    cipher: Aes256Gcm,
    header: Header,
    src: R,
    plain: Vec<u8>,
    pos: usize,
    opened: bool,
}

impl<R: Read> WholeReader<R> {
    pub(crate) fn new(cipher: Aes256Gcm, header: Header, src: R) -> Self {
        Self {
            cipher,
            header,
            src,
            plain: Vec::new(),
            pos: 0,
            opened: false,
        }
    }

    fn open(&mut self) -> Result<(), CodecError> {
        self.src.read_to_end(&mut self.plain)?;
        let nonce = self.header.iv();
        if let Err(err) = open_in_place(&self.cipher, &nonce, self.header.aad(), &mut self.plain) {
            self.plain.clear();
            return Err(err);
        }
        self.opened = true;
        Ok(())
    }
}

impl<R: Read> Read for WholeReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if !self.opened {
            self.open()?;
        }
        let rest = &self.plain[self.pos..];
        let n = rest.len().min(out.len());
        out[..n].copy_from_slice(&rest[..n]);
        self.pos += n;
        Ok(n)
    }
}
