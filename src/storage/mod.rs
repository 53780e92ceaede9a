//! Local persisted state
//!
//! The session keeps almost nothing on disk. The one exception is the user id
//! sent with every request:
//!
//! <data_dir>/agentsock/
//! └── user_id                        # One line, written by the host page or by hand

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// User id sent when none is stored
pub const USER_ID_FALLBACK: &str = "anonymous";

const USER_ID_FILE: &str = "user_id";

/// Small key files under the platform data directory
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Store at the platform data directory
    pub fn new() -> Result<Self> {
        let root = match directories::ProjectDirs::from("", "", "agentsock") {
            Some(dirs) => dirs.data_dir().to_path_buf(),
            None => PathBuf::from(".agentsock"),
        };
        Ok(Self { root })
    }

    /// Store rooted at an explicit directory
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stored user id, if there is a usable one
    pub fn user_id(&self) -> Option<String> {
        let path = self.root.join(USER_ID_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let id = content.trim();
                (!id.is_empty()).then(|| id.to_string())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!("Could not read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Stored user id, or `fallback` when missing, empty or unreadable
    pub fn user_id_or(&self, fallback: &str) -> String {
        self.user_id().unwrap_or_else(|| fallback.to_string())
    }

    /// Persist the user id
    pub fn set_user_id(&self, user_id: &str) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create {}", self.root.display()))?;
        std::fs::write(self.root.join(USER_ID_FILE), format!("{}\n", user_id.trim()))?;
        Ok(())
    }
}
