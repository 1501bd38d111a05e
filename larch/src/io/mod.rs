//! IO functions
//!

// Re-export
pub use self::region::MappedRegion;
pub use self::region::RegionError;

pub mod region;
