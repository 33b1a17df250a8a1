//! Chunk mode: the payload is split into fixed-size chunks, each sealed on its own.
//!
//! Record layout: `seq (4, BE) || ciphertext || tag (16)`. Ordinary records carry
//! sequence numbers 0, 1, 2, ... and exactly `chunk_size` ciphertext bytes. The
//! stream always ends with one record whose sequence number is
//! [`LAST_CHUNK_SEQ`]; it carries the remaining 0..=`chunk_size` bytes.

use std::io::{self, Read, Write};

use aes_gcm::Aes256Gcm;

use crate::cipher::{open_in_place, seal_in_place, TAG_LEN};
use crate::error::CodecError;
use crate::header::{Header, HEADER_LEN, LAST_CHUNK_SEQ, SEQ_LEN};
use crate::sink::Sink;

/// Per-record overhead: sequence number plus tag.
pub const RECORD_OVERHEAD: usize = SEQ_LEN + TAG_LEN;

fn chunk_len(header: &Header) -> Result<usize, CodecError> {
    let size = header.chunk_size();
    usize::try_from(size)
        .ok()
        .filter(|len| len.checked_add(RECORD_OVERHEAD + HEADER_LEN).is_some())
        .ok_or(CodecError::ChunkSizeTooLarge(size))
}

/// Encrypting writer for chunk mode.
///
/// The last 1..=`chunk_size` bytes are always held back so that `close` can
/// seal them as the final record. An empty payload still produces the header
/// and a zero-length final record.
pub struct ChunkWriter<W: Sink> {
    cipher: Aes256Gcm,
    header: Header,
    dest: W,
    chunk_len: usize,
    buf: Vec<u8>,
    seq: u32,
    header_written: bool,
    closed: bool,
}

impl<W: Sink> ChunkWriter<W> {
    pub(crate) fn new(cipher: Aes256Gcm, header: Header, dest: W) -> Result<Self, CodecError> {
        let chunk_len = chunk_len(&header)?;
        Ok(Self {
            cipher,
            header,
            dest,
            chunk_len,
            buf: Vec::new(),
            seq: 0,
            header_written: false,
            closed: false,
        })
    }

    /// Header written in front of the first record.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Consume the writer and return the destination.
    pub fn into_inner(self) -> W {
        self.dest
    }

    /// Seal the buffered plaintext under `seq` and forward it as one segment.
    /// The header goes in front of the first segment.
    fn emit(&mut self, seq: u32) -> Result<(), CodecError> {
        let prefix = if self.header_written { 0 } else { HEADER_LEN };
        let mut record = Vec::with_capacity(prefix + RECORD_OVERHEAD + self.buf.len());
        if !self.header_written {
            record.extend_from_slice(self.header.as_bytes());
        }
        record.extend_from_slice(&seq.to_be_bytes());
        let body = record.len();
        record.extend_from_slice(&self.buf);

        let nonce = self.header.nonce_for(seq);
        let tag = seal_in_place(&self.cipher, &nonce, self.header.aad(), &mut record[body..])?;
        record.extend_from_slice(&tag);
        self.buf.clear();

        if self.dest.write(&record)? != record.len() {
            return Err(CodecError::ShortWrite);
        }
        self.header_written = true;
        tracing::trace!(seq, bytes = record.len(), "chunk record forwarded");
        Ok(())
    }

    fn write_chunks(&mut self, input: &[u8]) -> Result<usize, CodecError> {
        let mut n = 0;
        // Strictly more than what fills the buffer: the final chunk stays behind.
        while input.len() - n > self.chunk_len - self.buf.len() {
            if self.seq == LAST_CHUNK_SEQ {
                return Err(CodecError::TooMuchChunk);
            }
            let take = self.chunk_len - self.buf.len();
            self.buf.extend_from_slice(&input[n..n + take]);
            n += take;
            self.emit(self.seq)?;
            self.seq += 1;
        }
        self.buf.extend_from_slice(&input[n..]);
        Ok(input.len())
    }
}

impl<W: Sink> Write for ChunkWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(CodecError::WriterClosed.into());
        }
        self.write_chunks(buf).map_err(|err| {
            self.closed = true;
            io::Error::from(err)
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        self.dest.flush()
    }
}

impl<W: Sink> Sink for ChunkWriter<W> {
    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Err(CodecError::WriterClosed.into());
        }
        self.closed = true;
        self.emit(LAST_CHUNK_SEQ)?;
        self.dest.close()
    }
}

/// Decrypting reader for chunk mode.
///
/// Fails closed: a missing final record, bytes after it, a truncated record or
/// an out-of-order sequence number are all errors, never a silent end of stream.
pub struct ChunkReader<R: Read> {
    cipher: Aes256Gcm,
    header: Header,
    src: R,
    record_len: u64,
    record: Vec<u8>,
    plain: Vec<u8>,
    pos: usize,
    expected: u32,
    finished: bool,
    drained: bool,
}

impl<R: Read> ChunkReader<R> {
    pub(crate) fn new(cipher: Aes256Gcm, header: Header, src: R) -> Result<Self, CodecError> {
        let chunk_len = chunk_len(&header)?;
        Ok(Self {
            cipher,
            header,
            src,
            record_len: (chunk_len + RECORD_OVERHEAD) as u64,
            record: Vec::new(),
            plain: Vec::new(),
            pos: 0,
            expected: 0,
            finished: false,
            drained: false,
        })
    }

    fn next_record(&mut self) -> Result<(), CodecError> {
        // `take` grows the buffer with the data actually present, so a forged
        // header cannot force a huge allocation up front.
        self.record.clear();
        (&mut self.src)
            .take(self.record_len)
            .read_to_end(&mut self.record)?;
        let n = self.record.len();

        if n == 0 {
            return Err(CodecError::MissingFinalChunk);
        }
        if n < RECORD_OVERHEAD {
            return Err(CodecError::TruncatedChunk);
        }
        let mut raw_seq = [0u8; SEQ_LEN];
        raw_seq.copy_from_slice(&self.record[..SEQ_LEN]);
        let seq = u32::from_be_bytes(raw_seq);

        if (n as u64) < self.record_len && seq != LAST_CHUNK_SEQ {
            return Err(CodecError::TruncatedChunk);
        }
        if seq != LAST_CHUNK_SEQ && seq != self.expected {
            return Err(CodecError::InvalidSeqNum {
                expected: self.expected,
                found: seq,
            });
        }

        self.plain.clear();
        self.plain.extend_from_slice(&self.record[SEQ_LEN..]);
        self.pos = 0;
        let nonce = self.header.nonce_for(seq);
        if let Err(err) = open_in_place(&self.cipher, &nonce, self.header.aad(), &mut self.plain) {
            self.plain.clear();
            return Err(err);
        }

        if seq == LAST_CHUNK_SEQ {
            self.finished = true;
        } else {
            self.expected += 1;
        }
        Ok(())
    }

    fn check_end(&mut self) -> Result<(), CodecError> {
        let mut extra = Vec::with_capacity(1);
        (&mut self.src).take(1).read_to_end(&mut extra)?;
        if !extra.is_empty() {
            return Err(CodecError::TrailingData);
        }
        self.drained = true;
        Ok(())
    }

    fn read_plain(&mut self, out: &mut [u8]) -> Result<usize, CodecError> {
        loop {
            if self.pos < self.plain.len() {
                let rest = &self.plain[self.pos..];
                let n = rest.len().min(out.len());
                out[..n].copy_from_slice(&rest[..n]);
                self.pos += n;
                return Ok(n);
            }
            if self.finished {
                if !self.drained {
                    self.check_end()?;
                }
                return Ok(0);
            }
            self.next_record()?;
        }
    }
}

impl<R: Read> Read for ChunkReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        self.read_plain(out).map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{build_cipher, AesKey};
    use crate::header::IV_LEN;

    const IV: [u8; IV_LEN] = [241, 194, 91, 221, 6, 243, 146, 157, 149, 144, 41, 39];

    fn cipher() -> Aes256Gcm {
        build_cipher(&AesKey::from_slice(&[9u8; 32]).unwrap())
    }

    #[derive(Default)]
    struct Segments(Vec<Vec<u8>>);

    impl Write for Segments {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.push(buf.to_vec());
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Sink for Segments {}

    fn seal(chunk: u64, payload: &[u8], writes: &[usize]) -> Vec<Vec<u8>> {
        let header = Header::with_iv(chunk, "c.bin", IV).unwrap();
        let mut w = ChunkWriter::new(cipher(), header, Segments::default()).unwrap();
        let mut rest = payload;
        for &len in writes {
            let (head, tail) = rest.split_at(len.min(rest.len()));
            w.write_all(head).unwrap();
            rest = tail;
        }
        w.write_all(rest).unwrap();
        w.close().unwrap();
        w.into_inner().0
    }

    fn open(chunk: u64, stream: &[u8]) -> Result<Vec<u8>, CodecError> {
        let header = Header::with_iv(chunk, "c.bin", IV).unwrap();
        let mut r = ChunkReader::new(cipher(), header, &stream[HEADER_LEN..])?;
        let mut out = Vec::new();
        r.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn one_segment_per_record_and_header_first() {
        let segments = seal(4, b"0123456789", &[3, 3]);
        // 10 bytes in chunks of 4: records 4, 4 and a final 2.
        let lens: Vec<usize> = segments.iter().map(Vec::len).collect();
        assert_eq!(lens, vec![HEADER_LEN + 24, 24, 22]);
        assert_eq!(&segments[0][HEADER_LEN..HEADER_LEN + 4], &0u32.to_be_bytes());
        assert_eq!(&segments[1][..4], &1u32.to_be_bytes());
        assert_eq!(&segments[2][..4], &LAST_CHUNK_SEQ.to_be_bytes());
    }

    #[test]
    fn exact_multiple_ends_with_full_final_record() {
        let segments = seal(5, b"abcdefghij", &[]);
        let lens: Vec<usize> = segments.iter().map(Vec::len).collect();
        assert_eq!(lens, vec![HEADER_LEN + 25, 25]);
        assert_eq!(&segments[1][..4], &LAST_CHUNK_SEQ.to_be_bytes());
        assert_eq!(open(5, &segments.concat()).unwrap(), b"abcdefghij");
    }

    #[test]
    fn empty_payload_is_header_plus_empty_final_record() {
        let segments = seal(8, b"", &[]);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].len(), HEADER_LEN + RECORD_OVERHEAD);
        assert_eq!(open(8, &segments[0]).unwrap(), b"");
    }

    #[test]
    fn size_accounting() {
        for (chunk, len) in [(1u64, 7usize), (3, 9), (3, 10), (16, 100), (100, 16)] {
            let payload = vec![0x5a; len];
            let total: usize = seal(chunk, &payload, &[]).iter().map(Vec::len).sum();
            let c = chunk as usize;
            let records = len.div_ceil(c).max(1);
            assert_eq!(
                total,
                HEADER_LEN + records * RECORD_OVERHEAD + len,
                "chunk {c}, len {len}"
            );
        }
    }

    #[test]
    fn too_many_chunks() {
        let header = Header::with_iv(1, "c.bin", IV).unwrap();
        let mut w = ChunkWriter::new(cipher(), header, Vec::new()).unwrap();
        w.seq = LAST_CHUNK_SEQ - 1;
        w.write_all(b"ab").unwrap();
        let err = w.write(b"c").unwrap_err();
        assert!(matches!(CodecError::from_io(&err), Some(CodecError::TooMuchChunk)));
        // the writer is unusable afterwards
        let err = w.write(b"d").unwrap_err();
        assert!(matches!(CodecError::from_io(&err), Some(CodecError::WriterClosed)));
    }

    #[test]
    fn missing_final_record() {
        let stream = seal(4, b"0123456789", &[]).concat();
        // drop the final 22-byte record
        let cut = &stream[..stream.len() - 22];
        assert!(matches!(open(4, cut), Err(CodecError::MissingFinalChunk)));
    }

    #[test]
    fn trailing_data_after_final_record() {
        let mut stream = seal(4, b"0123456789", &[]).concat();
        stream.push(0);
        assert!(matches!(open(4, &stream), Err(CodecError::TrailingData)));
    }

    #[test]
    fn truncated_record() {
        let stream = seal(4, b"0123456789", &[]).concat();
        // cut inside the second (ordinary) record
        let cut = &stream[..HEADER_LEN + 24 + 22];
        assert!(matches!(open(4, cut), Err(CodecError::TruncatedChunk)));
        // fewer bytes than seq + tag
        let cut = &stream[..HEADER_LEN + 24 + 7];
        assert!(matches!(open(4, cut), Err(CodecError::TruncatedChunk)));
    }

    #[test]
    fn early_final_record_is_rejected_by_authentication() {
        let mut stream = seal(4, b"0123456789", &[]).concat();
        // relabel record 0 as final: nonce changes, so opening fails
        stream[HEADER_LEN..HEADER_LEN + 4].copy_from_slice(&LAST_CHUNK_SEQ.to_be_bytes());
        assert!(matches!(open(4, &stream), Err(CodecError::Authentication)));
    }

    #[test]
    fn reordered_records() {
        let segments = seal(2, b"abcdef", &[]);
        // records: seq 0, seq 1, final
        let swapped = [
            segments[0][..HEADER_LEN].to_vec(),
            segments[1].clone(),
            segments[0][HEADER_LEN..].to_vec(),
            segments[2].clone(),
        ]
        .concat();
        assert!(matches!(
            open(2, &swapped),
            Err(CodecError::InvalidSeqNum { expected: 0, found: 1 })
        ));
    }

    #[test]
    fn small_reads_drain_buffered_plaintext() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let stream = seal(10, &payload, &[]).concat();
        let header = Header::with_iv(10, "c.bin", IV).unwrap();
        let mut r = ChunkReader::new(cipher(), header, &stream[HEADER_LEN..]).unwrap();
        let mut out = Vec::new();
        let mut piece = [0u8; 3];
        loop {
            let n = r.read(&mut piece).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&piece[..n]);
        }
        assert_eq!(out, payload);
        assert_eq!(r.read(&mut [0u8; 0]).unwrap(), 0);
    }

    #[test]
    fn oversized_chunk_size_rejected_without_allocating() {
        let header = Header::with_iv(u64::MAX, "c.bin", IV).unwrap();
        assert!(matches!(
            ChunkReader::new(cipher(), header, &[0u8; 0][..]),
            Err(CodecError::ChunkSizeTooLarge(u64::MAX))
        ));
    }
}
