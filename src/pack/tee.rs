//! Forwarding reader used to capture compressed entry bodies
//!
//! A zlib stream carries no length prefix, so the only way to find where an
//! entry's body ends is to inflate it. [`TeeReader`] sits between the pack
//! file and the decompressor and writes every byte the decompressor consumes
//! to a sink, so the compressed span can be copied out verbatim.

use std::io::{self, BufRead, Read, Write};

/// Reader decorator that forwards every consumed byte to `sink`, exactly
/// once and in order.
///
/// The wrapped reader's buffer is only read through, never drained ahead of
/// the caller: bytes count as consumed when a bulk `read` returns them, when
/// [`TeeReader::read_byte`] returns one, or when `BufRead::consume` accepts
/// them. Bytes the decompressor looked at through `fill_buf` but did not
/// consume stay in the inner reader for the next entry.
#[derive(Debug)]
pub struct TeeReader<R, W> {
    inner: R,
    sink: W,
    forwarded: u64,
    // `consume` cannot fail, so a sink error raised there is held here and
    // returned from the next call.
    deferred: Option<io::Error>,
}

impl<R: BufRead, W: Write> TeeReader<R, W> {
    pub fn new(inner: R, sink: W) -> Self {
        Self {
            inner,
            sink,
            forwarded: 0,
            deferred: None,
        }
    }

    /// Consume and forward a single byte
    pub fn read_byte(&mut self) -> io::Result<u8> {
        self.take_deferred()?;
        let byte = match self.inner.fill_buf()?.first() {
            Some(&byte) => byte,
            None => return Err(io::ErrorKind::UnexpectedEof.into()),
        };
        self.inner.consume(1);
        self.sink.write_all(&[byte])?;
        self.forwarded += 1;
        Ok(byte)
    }

    /// Number of bytes forwarded so far
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    /// Surface any pending sink error and return the forwarded byte count
    pub fn finish(mut self) -> io::Result<u64> {
        self.take_deferred()?;
        Ok(self.forwarded)
    }

    fn take_deferred(&mut self) -> io::Result<()> {
        match self.deferred.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<R: BufRead, W: Write> Read for TeeReader<R, W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.take_deferred()?;
        let n = self.inner.read(buf)?;
        self.sink.write_all(&buf[..n])?;
        self.forwarded += n as u64;
        Ok(n)
    }
}

impl<R: BufRead, W: Write> BufRead for TeeReader<R, W> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.take_deferred()?;
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        if amt == 0 {
            return;
        }
        // The inner buffer still holds what the last fill_buf returned.
        let taken = match self.inner.fill_buf() {
            Ok(available) => {
                let taken = amt.min(available.len());
                match self.sink.write_all(&available[..taken]) {
                    Ok(()) => self.forwarded += taken as u64,
                    Err(e) => self.deferred = Some(e),
                }
                taken
            }
            Err(e) => {
                self.deferred = Some(e);
                return;
            }
        };
        self.inner.consume(taken);
    }
}
