//! Mapped region functions
//!
//! A [`MappedRegion`] owns one open backing file and one shared, writable mapping of the whole
//! of that file.
//!
//! Every resize closes the file, reopens it, sets its length and maps it again. The base address
//! of the mapping may change each time, so nothing outside this module ever holds an address:
//! callers ask for a byte view at an offset, use it, and let it go. Views borrow the region and a
//! resize needs `&mut self`, which makes holding a view across a remap a compile error.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use memmap2::{MmapMut, MmapOptions};
use thiserror::Error;

use crate::tree::Offset;

/// Region specific errors.
#[derive(Error, Debug)]
pub enum RegionError {
    /// The mapping could not be established
    #[error("could not map file: {0}")]
    Map(#[source] io::Error),

    /// The region has no active mapping
    #[error("region is closed")]
    Closed,

    /// One or more steps of closing the region failed
    #[error("{} error(s) while closing region: {}", .0.len(), join_errors(.0))]
    Teardown(Vec<anyhow::Error>),
}

fn join_errors(errors: &[anyhow::Error]) -> String {
    errors
        .iter()
        .map(|e| format!("{e:#}"))
        .collect::<Vec<String>>()
        .join("; ")
}

#[derive(Debug)]
struct Mapping {
    file: File,
    mmap: MmapMut,
}

/// A file mapped into memory.
#[derive(Debug)]
pub struct MappedRegion {
    path: PathBuf,
    random_access: bool,
    mapping: Option<Mapping>,
}

impl MappedRegion {
    /// Map the file at `path`, creating it if required and growing it to at least
    /// `minimum_size` bytes.
    pub fn try_open<P: AsRef<Path>>(path: P, minimum_size: u64) -> Result<Self> {
        Self::try_open_with(path, minimum_size, true)
    }

    /// As [`MappedRegion::try_open`], choosing whether the mapping is advised for random access.
    pub fn try_open_with<P: AsRef<Path>>(
        path: P,
        minimum_size: u64,
        random_access: bool,
    ) -> Result<Self> {
        let mut region = Self {
            path: path.as_ref().to_path_buf(),
            random_access,
            mapping: None,
        };
        region
            .resize_at_least(minimum_size)
            .context("could not resize file")?;
        Ok(region)
    }

    /// Truncate the backing file to exactly `size` bytes and map it again.
    ///
    /// On failure the region is left closed.
    pub fn resize(&mut self, size: u64) -> Result<()> {
        let file = self.reopen_file().context("could not reopen file")?;
        file.set_len(size).context("could not truncate file")?;
        self.map(file).context("could not mmap file")
    }

    /// Grow the backing file to at least `minimum_size` bytes and map it again.
    ///
    /// A file which is already big enough keeps its size. The mapping is always re-established.
    /// On failure the region is left closed.
    pub fn resize_at_least(&mut self, minimum_size: u64) -> Result<()> {
        let file = self.reopen_file().context("could not reopen file")?;
        let current = file.metadata().context("could not stat file")?.len();
        if current < minimum_size {
            file.set_len(minimum_size)
                .context("could not truncate file")?;
        }
        self.map(file).context("could not mmap file")
    }

    /// Length of the mapping in bytes. A closed region has length 0.
    pub fn len(&self) -> usize {
        self.mapping.as_ref().map_or(0, |m| m.mmap.len())
    }

    /// Is the mapping empty (or closed)?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Is there an active mapping?
    pub fn is_open(&self) -> bool {
        self.mapping.is_some()
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The whole mapping. A closed region is an empty slice.
    pub fn as_slice(&self) -> &[u8] {
        match &self.mapping {
            Some(mapping) => &mapping.mmap[..],
            None => &[],
        }
    }

    /// The whole mapping, mutably. A closed region is an empty slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.mapping {
            Some(mapping) => &mut mapping.mmap[..],
            None => &mut [],
        }
    }

    /// View of `len` bytes at `offset`.
    ///
    /// The caller guarantees `offset + len <= self.len()`. A view outside the mapping panics.
    pub fn bytes_at(&self, offset: Offset, len: usize) -> &[u8] {
        let start = offset.get() as usize;
        &self.as_slice()[start..start.saturating_add(len)]
    }

    /// Mutable view of `len` bytes at `offset`.
    ///
    /// The caller guarantees `offset + len <= self.len()`. A view outside the mapping panics.
    pub fn bytes_at_mut(&mut self, offset: Offset, len: usize) -> &mut [u8] {
        let start = offset.get() as usize;
        &mut self.as_mut_slice()[start..start.saturating_add(len)]
    }

    /// Synchronize the whole mapping with the backing file.
    pub fn flush(&self) -> Result<()> {
        let mapping = self.mapping.as_ref().ok_or(RegionError::Closed)?;
        mapping
            .mmap
            .flush()
            .context("error syncing file to disk")
    }

    /// Synchronize `len` bytes at `offset` with the backing file.
    pub fn flush_range(&self, offset: Offset, len: usize) -> Result<()> {
        let mapping = self.mapping.as_ref().ok_or(RegionError::Closed)?;
        mapping
            .mmap
            .flush_range(offset.get() as usize, len)
            .context("error syncing range to disk")
    }

    /// Unmap and close the backing file.
    ///
    /// Closing a closed region does nothing. Every step is attempted even if an earlier one
    /// fails, and the region is closed afterwards whatever the outcome.
    pub fn close(&mut self) -> Result<()> {
        let Some(Mapping { file, mmap }) = self.mapping.take() else {
            return Ok(());
        };
        let mut errors = vec![];

        if let Err(e) = mmap.flush() {
            errors.push(anyhow::Error::new(e).context("could not flush mapping"));
        }
        drop(mmap);

        if let Err(e) = file.sync_all() {
            errors.push(anyhow::Error::new(e).context("could not sync file"));
        }
        drop(file);

        tracing::trace!(path = %self.path.display(), "region closed");

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RegionError::Teardown(errors).into())
        }
    }

    fn reopen_file(&mut self) -> Result<File> {
        self.close().context("could not close open file")?;

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true).truncate(false);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        options
            .open(&self.path)
            .with_context(|| format!("could not open file: {}", self.path.display()))
    }

    fn map(&mut self, file: File) -> Result<()> {
        // SAFETY: The region owns the only handle to this file for the lifetime of the mapping.
        // Concurrent modification by another process is unsupported.
        let mmap = unsafe { MmapOptions::new().map_mut(&file) }.map_err(RegionError::Map)?;

        #[cfg(unix)]
        if self.random_access && !mmap.is_empty() {
            mmap.advise(memmap2::Advice::Random)
                .map_err(RegionError::Map)
                .context("could not perform madvise")?;
        }

        tracing::debug!(path = %self.path.display(), len = mmap.len(), "region mapped");

        self.mapping = Some(Mapping { file, mmap });
        Ok(())
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("could not close mapped region: {:#}", e);
        }
    }
}

#[cfg(test)]
pub(crate) fn scratch_path(name: &str) -> PathBuf {
    use rand::Rng;

    let tag: u64 = rand::thread_rng().gen();
    std::env::temp_dir().join(format!("larch_{name}_{tag:016x}.dat"))
}
