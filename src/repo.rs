//! Repository layout on disk

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::pack::ObjectId;

/// A git directory opened read-only
#[derive(Debug, Clone)]
pub struct Repository {
    git_dir: PathBuf,
}

impl Repository {
    /// Open a work tree (containing `.git/`) or a bare git directory
    pub fn open(path: &Path) -> Result<Self> {
        let dot_git = path.join(".git");
        let git_dir = if dot_git.is_dir() {
            dot_git
        } else if path.is_dir() {
            path.to_path_buf()
        } else {
            return Err(Error::Config(format!(
                "repository not found: {}",
                path.display()
            )));
        };
        Ok(Self { git_dir })
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn ref_path(&self, branch: &str) -> PathBuf {
        self.git_dir.join("refs/heads").join(branch)
    }

    pub fn pack_dir(&self) -> PathBuf {
        self.git_dir.join("objects/pack")
    }

    /// Read the commit a branch points at from its loose ref file.
    ///
    /// Only lowercase hex is accepted, so the advertised id is exactly the
    /// text of the ref file.
    pub fn read_branch_tip(&self, branch: &str) -> Result<ObjectId> {
        let path = self.ref_path(branch);
        let content = fs::read_to_string(&path)?;
        let hex = content.trim_end_matches(|c| c == '\n' || c == '\r');
        let lowercase = hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        lowercase
            .then(|| ObjectId::from_hex(hex))
            .flatten()
            .ok_or_else(|| {
                Error::Config(format!(
                    "ref file {} does not hold a 40 digit lowercase hex object id",
                    path.display()
                ))
            })
    }
}
