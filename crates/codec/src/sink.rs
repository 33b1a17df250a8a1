use std::io::{self, Write};

/// A [`Write`] destination with a terminal `close`.
///
/// Encoding writers call `close` once, after the final segment, so that a
/// transport (for example a multipart upload) can finalize itself. The default
/// implementation only flushes.
pub trait Sink: Write {
    /// Finish the destination. No further writes are expected afterwards.
    fn close(&mut self) -> io::Result<()> {
        self.flush()
    }
}

impl Sink for Vec<u8> {}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}
