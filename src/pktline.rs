//! pkt-line framing
//!
//! Each line is prefixed with its total length (prefix included) as four
//! lowercase hex digits. `0000` is the flush packet.

use std::io::Write;

use crate::error::{Error, Result};

pub const FLUSH_PKT: &[u8; 4] = b"0000";

/// Largest packet git accepts, prefix included
pub const MAX_PKT_LEN: usize = 65520;

/// Frame `line` as a data packet, terminated by a newline
pub fn encode_line(line: &str) -> Result<Vec<u8>> {
    let len = 4 + line.len() + 1;
    if len > MAX_PKT_LEN {
        return Err(Error::Protocol(format!(
            "pkt-line of {} bytes exceeds the {} byte limit",
            len, MAX_PKT_LEN
        )));
    }
    let mut pkt = format!("{:04x}", len).into_bytes();
    pkt.extend_from_slice(line.as_bytes());
    pkt.push(b'\n');
    Ok(pkt)
}

/// Writer for pkt-line framed output
pub struct PktLineWriter<W> {
    writer: W,
}

impl<W: Write> PktLineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one newline-terminated data line
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(&encode_line(line)?)?;
        Ok(())
    }

    pub fn flush_pkt(&mut self) -> Result<()> {
        self.writer.write_all(FLUSH_PKT)?;
        Ok(())
    }

    /// Flush the underlying writer
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Access the underlying writer for unframed output
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
