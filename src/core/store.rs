//! Store handle for a Coursewalk state workspace.
//!
//! A store is the directory holding the sequencing database, the LRS event
//! log, and the optional `coursewalk.toml`. All engine state for every
//! course and session under one deployment is scoped to a store.

use std::path::{Path, PathBuf};

use crate::core::schemas;

#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to the store root directory.
    pub root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the consolidated sequencing database.
    pub fn db_path(&self) -> PathBuf {
        self.root.join(schemas::SEQUENCING_DB_NAME)
    }

    /// Path of the append-only LRS event log.
    pub fn lrs_log_path(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    /// Path of the optional engine config file.
    pub fn config_path(&self) -> PathBuf {
        self.root.join(schemas::CONFIG_FILE_NAME)
    }
}

impl AsRef<Path> for Store {
    fn as_ref(&self) -> &Path {
        &self.root
    }
}
