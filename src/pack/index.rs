//! Pack index (`.idx`) enumeration
//!
//! Only version 2 indexes are read. The layout is an 8-byte header, a
//! 256-entry cumulative fan-out table whose last slot is the object count,
//! the sorted object ids, one CRC32 per object, one 4-byte pack offset per
//! object, an optional large-offset table and two trailing checksums.

use std::fmt;
use std::fs;
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::objects::{ObjectId, ObjectLocator};
use crate::error::{Error, Result};

pub const INDEX_SIGNATURE: [u8; 4] = [0xff, b't', b'O', b'c'];
pub const INDEX_VERSION: u32 = 2;

const HEADER_LEN: usize = 8;
const FANOUT_LEN: usize = 256 * 4;
const CRC_LEN: usize = 4;
const OFFSET_LEN: usize = 4;
const TRAILER_LEN: usize = 2 * ObjectId::LEN;
const LARGE_OFFSET_FLAG: u32 = 0x8000_0000;

/// What to do when an index file cannot be read or parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexPolicy {
    /// Stop at the first failure and report it
    #[default]
    Abort,
    /// Skip failing index files, keeping their errors for a summary
    BestEffort,
}

impl FromStr for IndexPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "abort" => Ok(IndexPolicy::Abort),
            "best-effort" => Ok(IndexPolicy::BestEffort),
            other => Err(Error::Config(format!(
                "unknown index policy '{}' (expected 'abort' or 'best-effort')",
                other
            ))),
        }
    }
}

impl fmt::Display for IndexPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexPolicy::Abort => f.write_str("abort"),
            IndexPolicy::BestEffort => f.write_str("best-effort"),
        }
    }
}

/// A fully validated index file held in memory
#[derive(Debug)]
pub struct PackIndex {
    pack_path: PathBuf,
    data: Vec<u8>,
    count: usize,
}

impl PackIndex {
    /// Read and validate an index file. The file handle is closed before
    /// this returns.
    pub fn open(idx_path: &Path) -> Result<Self> {
        let data = fs::read(idx_path).map_err(|e| Error::Index {
            path: idx_path.to_path_buf(),
            reason: format!("failed to read: {}", e),
        })?;
        Self::parse(idx_path, data)
    }

    /// Validate raw index bytes. Every entry is checked here, so a parsed
    /// index always yields all of its entries.
    pub fn parse(idx_path: &Path, data: Vec<u8>) -> Result<Self> {
        let invalid = |reason: String| Error::Index {
            path: idx_path.to_path_buf(),
            reason,
        };

        if data.len() < HEADER_LEN + FANOUT_LEN {
            return Err(invalid(format!(
                "{} bytes is too short for the fan-out table",
                data.len()
            )));
        }
        if data[..4] != INDEX_SIGNATURE {
            return Err(invalid(
                "missing index signature (version 1 indexes are not supported)".to_string(),
            ));
        }
        let version = read_u32(&data, 4);
        if version != INDEX_VERSION {
            return Err(invalid(format!("unsupported index version {}", version)));
        }

        let mut previous = 0u32;
        for slot in 0..256 {
            let cumulative = read_u32(&data, HEADER_LEN + slot * 4);
            if cumulative < previous {
                return Err(invalid(format!("fan-out table decreases at slot {}", slot)));
            }
            previous = cumulative;
        }
        let count = previous as usize;

        let required = HEADER_LEN
            + FANOUT_LEN
            + count * (ObjectId::LEN + CRC_LEN + OFFSET_LEN)
            + TRAILER_LEN;
        if data.len() < required {
            return Err(invalid(format!(
                "{} bytes is too short for {} objects (need {})",
                data.len(),
                count,
                required
            )));
        }

        let index = PackIndex {
            pack_path: idx_path.with_extension("pack"),
            data,
            count,
        };
        for entry in 0..count {
            if index.raw_offset(entry) & LARGE_OFFSET_FLAG != 0 {
                return Err(Error::LargeOffset {
                    path: idx_path.to_path_buf(),
                    entry: entry as u32,
                });
            }
        }
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The pack file this index describes
    pub fn pack_path(&self) -> &Path {
        &self.pack_path
    }

    pub fn object_id(&self, entry: usize) -> ObjectId {
        let start = HEADER_LEN + FANOUT_LEN + entry * ObjectId::LEN;
        let mut raw = [0u8; ObjectId::LEN];
        raw.copy_from_slice(&self.data[start..start + ObjectId::LEN]);
        ObjectId(raw)
    }

    pub fn locator(&self, entry: usize) -> ObjectLocator {
        ObjectLocator {
            id: self.object_id(entry),
            pack_path: self.pack_path.clone(),
            offset: u64::from(self.raw_offset(entry)),
        }
    }

    fn raw_offset(&self, entry: usize) -> u32 {
        let table = HEADER_LEN + FANOUT_LEN + self.count * (ObjectId::LEN + CRC_LEN);
        read_u32(&self.data, table + entry * OFFSET_LEN)
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Lazy enumeration of every object listed by the `.idx` files in a pack
/// directory.
///
/// Index files are visited in name order and read one at a time. The cursor
/// cannot be restarted: once it has returned `None`, or an error under
/// [`IndexPolicy::Abort`], it stays exhausted. Dropping it early releases
/// everything it holds.
#[derive(Debug)]
pub struct IndexCursor {
    pack_dir: PathBuf,
    pending: std::vec::IntoIter<PathBuf>,
    current: Option<(PackIndex, usize)>,
    policy: IndexPolicy,
    skipped: Vec<Error>,
    exhausted: bool,
}

impl IndexCursor {
    /// List the index files in `pack_dir`. A missing or unreadable
    /// directory fails here regardless of policy.
    pub fn open(pack_dir: &Path, policy: IndexPolicy) -> Result<Self> {
        let listing_error = |e: std::io::Error| Error::Index {
            path: pack_dir.to_path_buf(),
            reason: format!("failed to list pack directory: {}", e),
        };

        let mut idx_files = Vec::new();
        for entry in fs::read_dir(pack_dir).map_err(listing_error)? {
            let path = entry.map_err(listing_error)?.path();
            if path.extension().is_some_and(|ext| ext == "idx") {
                idx_files.push(path);
            }
        }
        idx_files.sort();
        tracing::debug!(
            "Found {} index file(s) in {}",
            idx_files.len(),
            pack_dir.display()
        );

        Ok(Self {
            pack_dir: pack_dir.to_path_buf(),
            pending: idx_files.into_iter(),
            current: None,
            policy,
            skipped: Vec::new(),
            exhausted: false,
        })
    }

    pub fn policy(&self) -> IndexPolicy {
        self.policy
    }

    /// Errors for index files skipped under [`IndexPolicy::BestEffort`]
    pub fn skipped(&self) -> &[Error] {
        &self.skipped
    }

    /// One error summarising every skipped file, if any were skipped
    pub fn skipped_summary(&self) -> Option<Error> {
        if self.skipped.is_empty() {
            return None;
        }
        let reasons: Vec<String> = self.skipped.iter().map(|e| e.to_string()).collect();
        Some(Error::Index {
            path: self.pack_dir.clone(),
            reason: format!(
                "skipped {} index file(s): {}",
                self.skipped.len(),
                reasons.join("; ")
            ),
        })
    }
}

impl Iterator for IndexCursor {
    type Item = Result<ObjectLocator>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        loop {
            if let Some((index, next)) = &mut self.current {
                if *next < index.len() {
                    let locator = index.locator(*next);
                    *next += 1;
                    return Some(Ok(locator));
                }
                self.current = None;
            }

            let Some(idx_path) = self.pending.next() else {
                self.exhausted = true;
                return None;
            };
            match PackIndex::open(&idx_path) {
                Ok(index) => {
                    tracing::debug!(
                        "Reading {} object(s) from {}",
                        index.len(),
                        idx_path.display()
                    );
                    self.current = Some((index, 0));
                }
                Err(e) => match self.policy {
                    IndexPolicy::Abort => {
                        self.exhausted = true;
                        return Some(Err(e));
                    }
                    IndexPolicy::BestEffort => {
                        tracing::warn!("Skipping index file: {}", e);
                        self.skipped.push(e);
                    }
                },
            }
        }
    }
}

impl FusedIterator for IndexCursor {}
