//! Pack entry headers
//!
//! An entry starts with a variable-length header: the first byte holds the
//! continuation flag, a 3-bit type and the low 4 bits of the inflated size;
//! every continuation byte adds 7 more size bits. Offset deltas follow with
//! a big-endian base-distance varint, ref deltas with the 20-byte base id.
//!
//! Headers are never re-encoded on the way out. [`copy_header`] forwards
//! each byte as it is consumed so the output matches the source exactly.

use std::io::{self, Read, Write};

use gix_object::Kind;

use super::objects::ObjectId;
use crate::error::{Error, Result};

const TYPE_COMMIT: u8 = 1;
const TYPE_TREE: u8 = 2;
const TYPE_BLOB: u8 = 3;
const TYPE_TAG: u8 = 4;
const TYPE_OFS_DELTA: u8 = 6;
const TYPE_REF_DELTA: u8 = 7;

/// What a pack entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A complete object of the given kind
    Base(Kind),
    /// A delta against the entry `base_distance` bytes before this one
    OfsDelta { base_distance: u64 },
    /// A delta against the object named `base_id`
    RefDelta { base_id: ObjectId },
}

impl EntryKind {
    /// The 3-bit type code stored in the first header byte
    pub fn type_code(&self) -> u8 {
        match self {
            EntryKind::Base(Kind::Commit) => TYPE_COMMIT,
            EntryKind::Base(Kind::Tree) => TYPE_TREE,
            EntryKind::Base(Kind::Blob) => TYPE_BLOB,
            EntryKind::Base(Kind::Tag) => TYPE_TAG,
            EntryKind::OfsDelta { .. } => TYPE_OFS_DELTA,
            EntryKind::RefDelta { .. } => TYPE_REF_DELTA,
        }
    }

    pub fn is_delta(&self) -> bool {
        !matches!(self, EntryKind::Base(_))
    }
}

/// Decoded entry header.
///
/// `size` is the inflated size the header declares. It is a hint only;
/// nothing downstream trusts it to find the end of the compressed body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    pub kind: EntryKind,
    pub size: u64,
}

impl ObjectHeader {
    /// Canonical byte form of this header
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        let mut size = self.size;
        let mut byte = (self.kind.type_code() << 4) | (size & 0x0f) as u8;
        size >>= 4;
        while size != 0 {
            out.push(byte | 0x80);
            byte = (size & 0x7f) as u8;
            size >>= 7;
        }
        out.push(byte);

        match self.kind {
            EntryKind::Base(_) => {}
            EntryKind::OfsDelta { base_distance } => {
                out.extend_from_slice(&encode_base_distance(base_distance))
            }
            EntryKind::RefDelta { base_id } => out.extend_from_slice(base_id.as_bytes()),
        }
        out
    }
}

/// Reads one byte at a time and forwards it before handing it to the decoder
struct ForwardingBytes<'a, R, W> {
    input: &'a mut R,
    output: &'a mut W,
    consumed: usize,
}

impl<R: Read, W: Write> ForwardingBytes<'_, R, W> {
    fn next(&mut self, what: &str) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.input.read_exact(&mut byte).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::Header(format!(
                    "truncated {} after {} byte(s)",
                    what, self.consumed
                ))
            } else {
                Error::Io(e)
            }
        })?;
        self.output.write_all(&byte)?;
        self.consumed += 1;
        Ok(byte[0])
    }
}

/// Decode one entry header from `input`, writing every consumed byte to
/// `output` unchanged.
///
/// Returns the header together with the number of bytes it occupied. Any
/// short read is fatal: the input is positioned mid-entry and cannot be
/// resumed.
pub fn copy_header<R: Read, W: Write>(
    input: &mut R,
    output: &mut W,
) -> Result<(ObjectHeader, usize)> {
    let mut bytes = ForwardingBytes {
        input,
        output,
        consumed: 0,
    };

    let first = bytes.next("type byte")?;
    let type_code = (first >> 4) & 0x07;
    let mut size = u64::from(first & 0x0f);
    let mut shift = 4u32;
    let mut byte = first;
    while byte & 0x80 != 0 {
        byte = bytes.next("size byte")?;
        let bits = u64::from(byte & 0x7f);
        if shift >= 64 || (bits << shift) >> shift != bits {
            return Err(Error::Header("object size overflows 64 bits".to_string()));
        }
        size |= bits << shift;
        shift += 7;
    }

    let kind = match type_code {
        TYPE_COMMIT => EntryKind::Base(Kind::Commit),
        TYPE_TREE => EntryKind::Base(Kind::Tree),
        TYPE_BLOB => EntryKind::Base(Kind::Blob),
        TYPE_TAG => EntryKind::Base(Kind::Tag),
        TYPE_OFS_DELTA => EntryKind::OfsDelta {
            base_distance: read_base_distance(&mut bytes)?,
        },
        TYPE_REF_DELTA => {
            let mut raw = [0u8; ObjectId::LEN];
            for slot in raw.iter_mut() {
                *slot = bytes.next("ref delta base id")?;
            }
            EntryKind::RefDelta {
                base_id: ObjectId(raw),
            }
        }
        other => {
            return Err(Error::Header(format!("invalid object type {}", other)));
        }
    };

    Ok((ObjectHeader { kind, size }, bytes.consumed))
}

// Each continuation adds one before shifting, so every encoded length has
// its own range and no value has two encodings.
fn read_base_distance<R: Read, W: Write>(bytes: &mut ForwardingBytes<'_, R, W>) -> Result<u64> {
    let mut byte = bytes.next("base offset")?;
    let mut value = u64::from(byte & 0x7f);
    while byte & 0x80 != 0 {
        byte = bytes.next("base offset")?;
        value = value
            .checked_add(1)
            .and_then(|v| v.checked_mul(128))
            .and_then(|v| v.checked_add(u64::from(byte & 0x7f)))
            .ok_or_else(|| Error::Header("delta base offset overflows 64 bits".to_string()))?;
    }
    Ok(value)
}

fn encode_base_distance(mut value: u64) -> Vec<u8> {
    let mut buf = [0u8; 10];
    let mut pos = buf.len() - 1;
    buf[pos] = (value & 0x7f) as u8;
    value >>= 7;
    while value != 0 {
        value -= 1;
        pos -= 1;
        buf[pos] = 0x80 | (value & 0x7f) as u8;
        value >>= 7;
    }
    buf[pos..].to_vec()
}
