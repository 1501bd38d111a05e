//! Store configuration
//!
//! Everything a [`crate::tree::Store`] needs to know before it opens a backing file.

use std::path::{Path, PathBuf};

/// Configuration for opening a [`crate::tree::Store`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    path: PathBuf,
    reset: bool,
    random_access: bool,
}

impl StoreConfig {
    /// Configuration for a store backed by the file at `path`.
    ///
    /// By default an existing file is preserved and the mapping is advised for random access.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            reset: false,
            random_access: true,
        }
    }

    /// Remove any existing backing file before opening, so the store starts empty.
    pub fn reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    /// Advise the kernel that the mapping will be accessed randomly.
    pub fn random_access(mut self, random_access: bool) -> Self {
        self.random_access = random_access;
        self
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Will an existing backing file be removed on open?
    pub fn is_reset(&self) -> bool {
        self.reset
    }

    /// Will the mapping be advised for random access?
    pub fn is_random_access(&self) -> bool {
        self.random_access
    }
}
