//! Send a pack stream assembled from the repository's existing pack files
//!
//! Entries are copied verbatim: the header bytes through
//! [`copy_header`], the compressed body by inflating it through a
//! [`TeeReader`] whose sink is the output. Nothing is recompressed or
//! re-deltified, so offset deltas stay valid as long as every entry of a
//! pack is sent in its original order.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, Write};

use anyhow::{Context, Result};
use flate2::bufread::ZlibDecoder;
use sha1::{Digest, Sha1};

use super::header::{copy_header, ObjectHeader};
use super::objects::{ObjectId, PackGroup};
use super::tee::TeeReader;

pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
pub const PACK_VERSION: u32 = 2;

/// Writer that feeds everything it writes into a running SHA-1
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha1,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha1::new(),
            written: 0,
        }
    }

    /// Bytes hashed so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Stop hashing and return the writer with the digest of everything
    /// written through it
    pub fn finalize(self) -> (W, ObjectId) {
        let digest: [u8; 20] = self.hasher.finalize().into();
        (self.inner, ObjectId(digest))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// What a finished pack stream contained
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackSummary {
    pub objects: u32,
    /// Total bytes sent, trailing checksum included
    pub bytes: u64,
    pub checksum: ObjectId,
}

/// Stream a version 2 pack holding every locator in `groups` to `output`.
///
/// The 12-byte header declares the object count up front, so any failure
/// after it leaves a truncated stream behind; the caller must treat an
/// error as fatal for the whole response.
pub fn send_pack<W: Write>(groups: &[PackGroup], output: W) -> Result<PackSummary> {
    let total: usize = groups.iter().map(PackGroup::len).sum();
    let count = u32::try_from(total)
        .with_context(|| format!("Too many objects for one pack: {}", total))?;

    let mut out = HashingWriter::new(output);
    out.write_all(PACK_SIGNATURE)
        .and_then(|_| out.write_all(&PACK_VERSION.to_be_bytes()))
        .and_then(|_| out.write_all(&count.to_be_bytes()))
        .context("Failed to write pack header")?;
    tracing::info!("Sending pack with {} objects from {} pack file(s)", count, groups.len());

    let mut sent = 0u32;
    for group in groups {
        sent += copy_group(group, &mut out)?;
    }
    if sent != count {
        anyhow::bail!("Pack declared {} objects but {} were copied", count, sent);
    }

    let bytes = out.written() + ObjectId::LEN as u64;
    let (mut output, checksum) = out.finalize();
    output
        .write_all(checksum.as_bytes())
        .context("Failed to write pack checksum")?;
    output.flush().context("Failed to flush pack stream")?;

    tracing::info!("Pack sent: {} bytes, checksum {}", bytes, checksum);
    Ok(PackSummary {
        objects: count,
        bytes,
        checksum,
    })
}

/// Copy every entry of one pack file, in offset order
fn copy_group<W: Write>(group: &PackGroup, out: &mut W) -> Result<u32> {
    let path = group.pack_path();
    let file = File::open(path)
        .with_context(|| format!("Failed to open pack file: {}", path.display()))?;
    let mut reader = BufReader::new(file);
    tracing::debug!("Copying {} object(s) from {}", group.len(), path.display());

    let mut copied = 0u32;
    for locator in &group.locators {
        let position = reader
            .stream_position()
            .with_context(|| format!("Failed to query position in {}", path.display()))?;
        if locator.offset < position {
            anyhow::bail!(
                "Object {} at offset {} overlaps the entry ending at {} in {}",
                locator.id,
                locator.offset,
                position,
                path.display()
            );
        }
        // Relative seeks keep the buffer when the next entry is adjacent.
        reader
            .seek_relative((locator.offset - position) as i64)
            .with_context(|| format!("Failed to seek to offset {} in {}", locator.offset, path.display()))?;

        let entry = copy_entry(&mut reader, out).with_context(|| {
            format!(
                "Failed to copy object {} at offset {} from {}",
                locator.id,
                locator.offset,
                path.display()
            )
        })?;
        tracing::trace!(
            "Copied {} ({:?}, {} header + {} compressed bytes)",
            locator.id,
            entry.header.kind,
            entry.header_len,
            entry.compressed_len
        );
        copied += 1;
    }
    Ok(copied)
}

struct CopiedEntry {
    header: ObjectHeader,
    header_len: usize,
    compressed_len: u64,
}

/// Copy one entry starting at the reader's current position
fn copy_entry<R: BufRead, W: Write>(reader: &mut R, out: &mut W) -> Result<CopiedEntry> {
    let (header, header_len) = copy_header(reader, out)?;

    let mut tee = TeeReader::new(&mut *reader, &mut *out);
    let inflated = {
        let mut decoder = ZlibDecoder::new(&mut tee);
        io::copy(&mut decoder, &mut io::sink()).context("Failed to inflate object body")?
    };
    let compressed_len = tee.finish().context("Failed to forward object body")?;

    if inflated != header.size {
        tracing::debug!(
            "Header declares {} bytes but body inflated to {}",
            header.size,
            inflated
        );
    }
    Ok(CopiedEntry {
        header,
        header_len,
        compressed_len,
    })
}
