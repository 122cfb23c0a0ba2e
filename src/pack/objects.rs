//! Object identifiers and pack locations

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Raw 20-byte SHA-1 object identifier
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub [u8; 20]);

impl ObjectId {
    pub const LEN: usize = 20;

    /// Build an id from a slice that must be exactly 20 bytes long
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 20] = bytes.try_into().ok()?;
        Some(Self(raw))
    }

    /// Parse a 40 character hex string
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 2 * Self::LEN {
            return None;
        }
        let bytes = hex::decode(s).ok()?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

/// Where an object lives: which pack file, and at what byte offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocator {
    pub id: ObjectId,
    pub pack_path: PathBuf,
    pub offset: u64,
}

/// All locators that share one pack file, sorted by offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackGroup {
    pub pack_path: PathBuf,
    pub locators: Vec<ObjectLocator>,
}

impl PackGroup {
    pub fn pack_path(&self) -> &Path {
        &self.pack_path
    }

    pub fn len(&self) -> usize {
        self.locators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locators.is_empty()
    }
}

/// Partition locators by pack file and order each partition by offset.
///
/// Groups come back ordered by pack path so repeated runs over the same
/// repository emit identical streams.
pub fn group_by_pack<I>(locators: I) -> Vec<PackGroup>
where
    I: IntoIterator<Item = ObjectLocator>,
{
    let mut by_pack: BTreeMap<PathBuf, Vec<ObjectLocator>> = BTreeMap::new();
    for locator in locators {
        by_pack
            .entry(locator.pack_path.clone())
            .or_default()
            .push(locator);
    }

    by_pack
        .into_iter()
        .map(|(pack_path, mut locators)| {
            locators.sort_by_key(|l| l.offset);
            PackGroup {
                pack_path,
                locators,
            }
        })
        .collect()
}
