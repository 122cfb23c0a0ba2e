//! Read-only git upload-pack server
//!
//! Advertises a single branch and answers every fetch with the complete set
//! of objects from the repository's pack files, copied without repacking.

#![deny(clippy::mod_module_files)]

pub mod config;
pub mod error;
pub mod pack;
pub mod pktline;
pub mod protocol;
pub mod repo;

pub use config::ServerConfig;
pub use error::{Error, Result};
pub use protocol::{serve, Session, SessionState};
