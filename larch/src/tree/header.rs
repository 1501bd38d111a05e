//! Store header
//!
//! The header lives at offset 0 of the region and has the following structure
//!
//! ```text
//! offset 0  : magic     u32
//! offset 4  : version   u16
//! offset 6  : reserved  u16
//! offset 8  : length    u64 (allocation frontier)
//! offset 16 : root      u64 (Offset, 0 for an empty tree)
//! ```

use anyhow::Result;
use bincode::Options;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::node::{Offset, NODE_SIZE};
use crate::io::{MappedRegion, RegionError};
use crate::BINCODER;

/// Size in bytes of the header. Node storage begins here.
pub const HEADER_SIZE: u64 = 24;

/// Tag identifying a larch store.
pub const MAGIC: u32 = 0xbbcd_e160;

/// Current (and only supported) format version.
pub const FORMAT_VERSION: u16 = 1;

/// Errors found while validating a header.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FormatError {
    /// The magic tag is not ours
    #[error("invalid magic: {0:#010x}")]
    InvalidMagic(u32),

    /// The file was written by an incompatible version
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u16),

    /// The region can't hold a header
    #[error("region of {0} bytes is too short for a header")]
    Truncated(u64),

    /// The allocation frontier lies outside the file or off the node stride
    #[error("allocation length {0} is outside the file or not on a node boundary")]
    InvalidLength(u64),
}

/// The fixed size record at the start of every store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreHeader {
    magic: u32,
    version: u16,
    reserved: u16,
    length: u64,
    root: Offset,
}

impl StoreHeader {
    /// A header for an empty store.
    pub fn new() -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            reserved: 0,
            length: HEADER_SIZE,
            root: Offset::NONE,
        }
    }

    /// Magic tag.
    pub fn magic(&self) -> u32 {
        self.magic
    }

    /// Format version.
    pub fn version(&self) -> u16 {
        self.version
    }

    /// Offset just past the last allocated byte.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Where the next node will be allocated.
    pub fn frontier(&self) -> Offset {
        Offset::new(self.length)
    }

    /// Reference to the root node, [`Offset::NONE`] if the tree is empty.
    pub fn root(&self) -> Offset {
        self.root
    }

    /// Number of node slots allocated.
    pub fn slot_count(&self) -> u64 {
        (self.length - HEADER_SIZE) / NODE_SIZE
    }

    pub(crate) fn set_length(&mut self, length: u64) {
        self.length = length;
    }

    pub(crate) fn set_root(&mut self, root: Offset) {
        self.root = root;
    }

    /// Read the header from `region`, initializing it if the region is fresh.
    ///
    /// A zero magic tag means nothing has been written yet, so a new header is written. Any other
    /// mismatch is a [`FormatError`] and the region must not be used.
    pub fn validate_or_init(region: &mut MappedRegion) -> Result<Self> {
        let header = Self::read(region)?;
        if header.magic == 0 {
            let header = Self::new();
            header.write(region)?;
            tracing::debug!(path = %region.path().display(), "initialized header");
            return Ok(header);
        }
        header.validate(region.len() as u64)?;
        Ok(header)
    }

    /// Read the header from `region` as-is.
    pub fn read(region: &MappedRegion) -> Result<Self> {
        if !region.is_open() {
            return Err(RegionError::Closed.into());
        }
        if (region.len() as u64) < HEADER_SIZE {
            return Err(FormatError::Truncated(region.len() as u64).into());
        }
        let buf = region.bytes_at(Offset::NONE, HEADER_SIZE as usize);
        BINCODER.deserialize(buf).map_err(|e| e.into())
    }

    /// Write the header to `region`.
    pub fn write(&self, region: &mut MappedRegion) -> Result<()> {
        if !region.is_open() {
            return Err(RegionError::Closed.into());
        }
        let buf = region.bytes_at_mut(Offset::NONE, HEADER_SIZE as usize);
        BINCODER.serialize_into(buf, self).map_err(|e| e.into())
    }

    fn validate(&self, region_len: u64) -> Result<(), FormatError> {
        if self.magic != MAGIC {
            return Err(FormatError::InvalidMagic(self.magic));
        }
        if self.version != FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion(self.version));
        }
        if self.length < HEADER_SIZE
            || self.length > region_len
            || (self.length - HEADER_SIZE) % NODE_SIZE != 0
        {
            return Err(FormatError::InvalidLength(self.length));
        }
        Ok(())
    }
}

impl Default for StoreHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::io::region::scratch_path;

    #[test]
    fn it_has_a_fixed_record_size() {
        assert_eq!(
            HEADER_SIZE,
            BINCODER.serialized_size(&StoreHeader::new()).expect("sized")
        );
    }

    #[test]
    fn it_initializes_a_fresh_region() {
        let path = scratch_path("header_init");
        let mut region = MappedRegion::try_open(&path, HEADER_SIZE).expect("opens region");
        let header = StoreHeader::validate_or_init(&mut region).expect("initializes");
        assert_eq!(MAGIC, header.magic());
        assert_eq!(FORMAT_VERSION, header.version());
        assert_eq!(HEADER_SIZE, header.length());
        assert!(header.root().is_none());
        assert_eq!(0, header.slot_count());
        assert_eq!(&MAGIC.to_le_bytes(), &region.as_slice()[0..4]);
        assert_eq!(&FORMAT_VERSION.to_le_bytes(), &region.as_slice()[4..6]);
        drop(region);
        std::fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn it_accepts_an_existing_header() {
        let path = scratch_path("header_existing");
        let mut region = MappedRegion::try_open(&path, 96).expect("opens region");
        let mut header = StoreHeader::new();
        header.set_length(72);
        header.set_root(Offset::new(HEADER_SIZE));
        header.write(&mut region).expect("writes");
        let read = StoreHeader::validate_or_init(&mut region).expect("validates");
        assert_eq!(header, read);
        drop(region);
        std::fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn it_rejects_invalid_magic() {
        let path = scratch_path("header_magic");
        std::fs::write(&path, [0xefu8, 0xbe, 0xad, 0xde].repeat(8)).expect("seed file");
        let mut region = MappedRegion::try_open(&path, HEADER_SIZE).expect("opens region");
        let err = StoreHeader::validate_or_init(&mut region).expect_err("rejects");
        assert_eq!(
            Some(&FormatError::InvalidMagic(0xdead_beef)),
            err.downcast_ref::<FormatError>()
        );
        drop(region);
        std::fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn it_rejects_unsupported_version() {
        let path = scratch_path("header_version");
        let mut region = MappedRegion::try_open(&path, HEADER_SIZE).expect("opens region");
        let mut header = StoreHeader::new();
        header.version = FORMAT_VERSION + 1;
        header.write(&mut region).expect("writes");
        let err = StoreHeader::validate_or_init(&mut region).expect_err("rejects");
        assert_eq!(
            Some(&FormatError::UnsupportedVersion(FORMAT_VERSION + 1)),
            err.downcast_ref::<FormatError>()
        );
        drop(region);
        std::fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn it_rejects_a_frontier_beyond_the_file() {
        let path = scratch_path("header_length");
        let mut region = MappedRegion::try_open(&path, HEADER_SIZE).expect("opens region");
        let mut header = StoreHeader::new();
        header.set_length(HEADER_SIZE + 240);
        header.write(&mut region).expect("writes");
        let err = StoreHeader::validate_or_init(&mut region).expect_err("rejects");
        assert_eq!(
            Some(&FormatError::InvalidLength(HEADER_SIZE + 240)),
            err.downcast_ref::<FormatError>()
        );
        drop(region);
        std::fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn it_rejects_a_frontier_off_the_node_stride() {
        let path = scratch_path("header_stride");
        let mut region = MappedRegion::try_open(&path, HEADER_SIZE + 5).expect("opens region");
        let mut header = StoreHeader::new();
        header.set_length(HEADER_SIZE + 5);
        header.write(&mut region).expect("writes");
        let err = StoreHeader::validate_or_init(&mut region).expect_err("rejects");
        assert_eq!(
            Some(&FormatError::InvalidLength(HEADER_SIZE + 5)),
            err.downcast_ref::<FormatError>()
        );
        drop(region);
        std::fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn it_rejects_a_short_region() {
        let path = scratch_path("header_short");
        let mut region = MappedRegion::try_open(&path, 8).expect("opens region");
        let err = StoreHeader::validate_or_init(&mut region).expect_err("rejects");
        assert_eq!(
            Some(&FormatError::Truncated(8)),
            err.downcast_ref::<FormatError>()
        );
        drop(region);
        std::fs::remove_file(&path).expect("cleanup");
    }
}
