//! Workspace layout for a synthesis project.
//!
//! A project is any directory containing `.synthesis/`. Configuration lives at
//! `.synthesis/config.toml`; local state (ledger database, content blobs, audit trail)
//! lives under `.synthesis/data/`.

use crate::core::error::SynthesisError;
use crate::core::schemas::LEDGER_DB_NAME;
use std::path::{Path, PathBuf};

pub const PROJECT_DIR: &str = ".synthesis";
pub const CONFIG_FILE: &str = "config.toml";
pub const CONTENT_DIR: &str = "content";

/// Handle to the project's local state directory.
#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to `<project>/.synthesis/data`
    pub root: PathBuf,
}

impl Store {
    pub fn for_project(project_root: &Path) -> Self {
        Self {
            root: project_root.join(PROJECT_DIR).join("data"),
        }
    }

    pub fn ensure(&self) -> Result<(), SynthesisError> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn ledger_db_path(&self) -> PathBuf {
        self.root.join(LEDGER_DB_NAME)
    }

    pub fn content_dir(&self) -> PathBuf {
        self.root.join(CONTENT_DIR)
    }
}

/// Walk up from `start_dir` to the nearest directory containing `.synthesis/`.
pub fn find_project_root(start_dir: &Path) -> Option<PathBuf> {
    let mut current = Some(start_dir);
    while let Some(dir) = current {
        if dir.join(PROJECT_DIR).is_dir() {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }
    None
}

pub fn default_config_path(project_root: &Path) -> PathBuf {
    project_root.join(PROJECT_DIR).join(CONFIG_FILE)
}
