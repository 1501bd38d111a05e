#![warn(missing_docs)]
//! Larch
//!
//! # Why is this called Larch?
//!
//! It's a tree which keeps its shape on disk, and larch is a tree which drops its needles every
//! winter but keeps its branches.
//!
//! # Implementation Details
//!
//! Provides a persistent binary tree of single character values, stored in a memory mapped
//! file.
//!
//! The file is mapped into memory as a single region. At offset 0 of the region is a fixed size
//! header which records a magic tag, a format version, the allocation frontier and a reference
//! to the root node. After the header comes a sequence of fixed size node records, each of which
//! holds a value and references to its left and right children.
//!
//! References are never addresses. Every reference is an [`tree::Offset`] relative to the start
//! of the region. The mapping is discarded and re-established whenever the file grows, so the
//! base address of the region is not stable, but offsets are.
//!
//! Nodes are only ever appended at the allocation frontier. Nothing is reclaimed: a node which
//! becomes unreachable from the root is an orphan. Orphans are wasted space, not corruption, and
//! can be listed with [`tree::Store::detect_orphans`].
//!
//! Records are encoded with bincode, so the layout is the same (little endian, fixed width) on
//! every host.
//!
//! Note: The borrow checker enforces the main rule of the region. Any view into mapped memory
//! borrows the region, and anything which may remap needs a mutable borrow, so a view can't
//! outlive a remap.
//!

pub mod config;
pub mod io;
pub mod tree;

use bincode::config::AllowTrailing;
use bincode::config::FixintEncoding;
use bincode::config::WithOtherIntEncoding;
use bincode::config::WithOtherTrailing;
use bincode::{DefaultOptions, Options};
use std::sync::LazyLock;

static BINCODER: LazyLock<
    WithOtherIntEncoding<WithOtherTrailing<DefaultOptions, AllowTrailing>, FixintEncoding>,
> = LazyLock::new(|| {
    bincode::DefaultOptions::new()
        .allow_trailing_bytes()
        .with_fixint_encoding()
});
