//! Git pack format support
//!
//! Reads the repository's `.idx` files to find every object, then streams a
//! single pack built by copying each entry byte-for-byte from the pack files
//! on disk.

pub mod header;
pub mod index;
pub mod objects;
pub mod send;
pub mod tee;

pub use header::{copy_header, EntryKind, ObjectHeader};
pub use index::{IndexCursor, IndexPolicy, PackIndex};
pub use objects::{group_by_pack, ObjectId, ObjectLocator, PackGroup};
pub use send::{send_pack, HashingWriter, PackSummary};
pub use tee::TeeReader;
