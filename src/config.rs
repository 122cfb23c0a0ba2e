use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::pack::IndexPolicy;

/// Expand tilde (~) in path to user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(s) = path.to_str() {
        if let Some(stripped) = s.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if s == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

/// Configuration for git-serve-pack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Repository to serve: a work tree containing `.git`, or a bare git dir
    #[serde(default = "defaults::default_repo")]
    pub repo: PathBuf,
    /// The single branch advertised to clients
    #[serde(default = "defaults::default_branch")]
    pub branch: String,
    /// How unreadable index files are handled
    #[serde(default)]
    pub index_policy: IndexPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            repo: defaults::default_repo(),
            branch: defaults::default_branch(),
            index_policy: IndexPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a config file (if any) and the environment.
    ///
    /// An explicit path must exist; the default path is only read when
    /// present.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => Some(expand_tilde(path)),
            None => Self::config_file_path().filter(|path| path.exists()),
        };

        let mut config = match config_path {
            Some(path) => {
                tracing::debug!("loading git-serve-pack config from {:?}", path);
                Self::load_from_file(&path)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: ServerConfig = serde_yaml::from_str(&content)
            .map_err(Error::from)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.repo = expand_tilde(&config.repo);
        Ok(config)
    }

    /// Apply `GIT_SERVE_PACK_*` overrides using `lookup` to read variables
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("GIT_SERVE_PACK_REPO") {
            self.repo = expand_tilde(&PathBuf::from(path));
        }

        if let Some(branch) = lookup("GIT_SERVE_PACK_BRANCH") {
            self.branch = branch;
        }

        if let Some(policy) = lookup("GIT_SERVE_PACK_INDEX_POLICY") {
            self.index_policy = policy
                .parse()
                .context("Failed to parse GIT_SERVE_PACK_INDEX_POLICY")?;
        }
        Ok(())
    }

    /// Check settings that would otherwise fail mid-session
    pub fn validate(&self) -> std::result::Result<(), Error> {
        let bad_segment = self
            .branch
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
        if bad_segment {
            return Err(Error::Config(format!(
                "invalid branch name '{}'",
                self.branch
            )));
        }
        Ok(())
    }

    /// Full ref name of the served branch
    pub fn ref_name(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    /// Get default config file path
    pub fn config_file_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/git-serve-pack/config.yaml"))
    }
}

mod defaults {
    use std::path::PathBuf;

    pub(crate) fn default_repo() -> PathBuf {
        PathBuf::from(".")
    }

    pub(crate) fn default_branch() -> String {
        "main".to_string()
    }
}
