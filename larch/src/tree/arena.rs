//! Node arena
//!
//! Append-only storage of fixed size node records, following the header in a [`MappedRegion`].
//! Nodes are allocated at the frontier recorded in the header and are never freed.

use anyhow::{Context, Result};

use super::header::{StoreHeader, HEADER_SIZE};
use super::node::{Node, Offset, NODE_SIZE};
use crate::config::StoreConfig;
use crate::io::{MappedRegion, RegionError};

/// Allocator of nodes within a mapped region.
#[derive(Debug)]
pub struct NodeArena {
    region: MappedRegion,
    closed: bool,
}

impl NodeArena {
    /// Map the configured backing file and validate (or initialize) its header.
    pub fn try_open(config: &StoreConfig) -> Result<Self> {
        let mut region =
            MappedRegion::try_open_with(config.path(), HEADER_SIZE, config.is_random_access())?;
        StoreHeader::validate_or_init(&mut region)?;
        region.flush()?;
        Ok(Self {
            region,
            closed: false,
        })
    }

    /// The underlying region.
    pub fn region(&self) -> &MappedRegion {
        &self.region
    }

    /// Current header.
    pub fn header(&self) -> Result<StoreHeader> {
        StoreHeader::read(&self.region)
    }

    /// Replace the header.
    pub fn write_header(&mut self, header: &StoreHeader) -> Result<()> {
        header.write(&mut self.region)
    }

    /// Write `node` at the allocation frontier and advance the frontier past it.
    ///
    /// The region grows (and is remapped) to fit the new node. If anything fails the frontier is
    /// unchanged, so the append may be retried. A failed resize leaves the region closed; the
    /// retry reopens it and validates the header again. An arena closed with
    /// [`NodeArena::close`] stays closed.
    pub fn append(&mut self, node: Node) -> Result<Offset> {
        if self.closed {
            return Err(RegionError::Closed.into());
        }
        if !self.region.is_open() {
            self.region
                .resize_at_least(HEADER_SIZE)
                .context("could not reopen region")?;
            StoreHeader::validate_or_init(&mut self.region)?;
        }
        let mut header = self.header()?;
        let offset = header.frontier();
        let end = offset.get() + NODE_SIZE;

        self.region
            .resize_at_least(end)
            .context("could not grow region")?;
        node.encode(self.region.bytes_at_mut(offset, NODE_SIZE as usize))?;

        let previous = header;
        header.set_length(end);
        self.write_header(&header)?;
        if let Err(e) = self.region.flush() {
            // Don't leave an allocation behind which may not be on disk
            self.write_header(&previous)?;
            return Err(e);
        }

        tracing::debug!(%offset, value = %node.value(), "appended node");
        Ok(offset)
    }

    /// The node at `offset`.
    ///
    /// `offset` must have come from [`NodeArena::append`] or from a reference in a node or the
    /// header.
    pub fn node_at(&self, offset: Offset) -> Result<Node> {
        Node::decode(self.region.bytes_at(offset, NODE_SIZE as usize))
    }

    /// Modify the node at `offset` in place.
    pub fn update_node(&mut self, offset: Offset, f: impl FnOnce(&mut Node)) -> Result<()> {
        let mut node = self.node_at(offset)?;
        f(&mut node);
        node.encode(self.region.bytes_at_mut(offset, NODE_SIZE as usize))
    }

    /// Every allocated slot, in allocation order.
    pub fn slots(&self) -> Result<impl Iterator<Item = Offset>> {
        let length = self.header()?.length();
        Ok((HEADER_SIZE..length)
            .step_by(NODE_SIZE as usize)
            .map(Offset::new))
    }

    /// Is `offset` the start of an allocated slot?
    pub fn is_allocated(&self, offset: Offset, header: &StoreHeader) -> bool {
        let offset = offset.get();
        offset >= HEADER_SIZE
            && offset
                .checked_add(NODE_SIZE)
                .is_some_and(|end| end <= header.length())
            && (offset - HEADER_SIZE) % NODE_SIZE == 0
    }

    /// Synchronize the region with the backing file.
    pub fn flush(&self) -> Result<()> {
        self.region.flush()
    }

    /// Release the region. Nothing can be appended afterwards.
    pub fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.region.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::io::region::scratch_path;
    use crate::tree::MAGIC;

    #[test]
    fn it_appends_at_the_frontier() {
        let path = scratch_path("arena_append");
        let mut arena = NodeArena::try_open(&StoreConfig::new(&path)).expect("opens arena");
        let first = arena.append(Node::new('A')).expect("appends");
        let second = arena.append(Node::new('B')).expect("appends");
        assert_eq!(Offset::new(HEADER_SIZE), first);
        assert_eq!(Offset::new(HEADER_SIZE + NODE_SIZE), second);
        assert_eq!(HEADER_SIZE + 2 * NODE_SIZE, arena.header().expect("header").length());
        assert_eq!('A', arena.node_at(first).expect("node").value());
        assert_eq!('B', arena.node_at(second).expect("node").value());
        assert_eq!(
            (HEADER_SIZE + 2 * NODE_SIZE) as usize,
            arena.region().len()
        );
        drop(arena);
        std::fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn it_appends_within_a_larger_file() {
        let path = scratch_path("arena_larger");
        let mut arena = NodeArena::try_open(&StoreConfig::new(&path)).expect("opens arena");
        arena.region.resize(4_096).expect("resizes");
        let offset = arena.append(Node::new('A')).expect("appends");
        assert_eq!(Offset::new(HEADER_SIZE), offset);
        assert_eq!(4_096, arena.region().len());
        drop(arena);
        std::fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn it_refuses_append_after_close() {
        let path = scratch_path("arena_closed");
        let mut arena = NodeArena::try_open(&StoreConfig::new(&path)).expect("opens arena");
        arena.append(Node::new('A')).expect("appends");
        arena.close().expect("closes");
        assert!(arena.header().is_err());
        std::fs::remove_file(&path).expect("remove file");

        let err = arena.append(Node::new('B')).expect_err("closed");
        assert!(matches!(
            err.downcast_ref::<RegionError>(),
            Some(RegionError::Closed)
        ));
        assert!(!path.exists());
    }

    #[test]
    fn it_retries_append_after_lost_mapping() {
        let path = scratch_path("arena_retry");
        let mut arena = NodeArena::try_open(&StoreConfig::new(&path)).expect("opens arena");
        arena.append(Node::new('A')).expect("appends");
        // What a failed resize leaves behind
        arena.region.close().expect("closes region");
        let offset = arena.append(Node::new('B')).expect("appends");
        assert_eq!(Offset::new(HEADER_SIZE + NODE_SIZE), offset);
        drop(arena);
        std::fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn it_revalidates_a_replaced_file_on_retry() {
        let path = scratch_path("arena_replaced");
        let mut arena = NodeArena::try_open(&StoreConfig::new(&path)).expect("opens arena");
        arena.append(Node::new('A')).expect("appends");
        arena.region.close().expect("closes region");
        std::fs::remove_file(&path).expect("remove file");

        let offset = arena.append(Node::new('B')).expect("appends");
        assert_eq!(Offset::new(HEADER_SIZE), offset);
        let header = arena.header().expect("header");
        assert_eq!(MAGIC, header.magic());
        assert_eq!(HEADER_SIZE + NODE_SIZE, header.length());
        assert_eq!('B', arena.node_at(offset).expect("node").value());
        drop(arena);
        std::fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn it_rejects_references_near_the_end_of_the_address_space() {
        let path = scratch_path("arena_overflow");
        let mut arena = NodeArena::try_open(&StoreConfig::new(&path)).expect("opens arena");
        arena.append(Node::new('A')).expect("appends");
        let header = arena.header().expect("header");
        assert!(!arena.is_allocated(Offset::new(u64::MAX), &header));
        assert!(!arena.is_allocated(Offset::new(u64::MAX - NODE_SIZE + 1), &header));
        drop(arena);
        std::fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn it_updates_nodes_in_place() {
        let path = scratch_path("arena_update");
        let mut arena = NodeArena::try_open(&StoreConfig::new(&path)).expect("opens arena");
        let offset = arena.append(Node::new('A')).expect("appends");
        arena
            .update_node(offset, |node| node.set_value('Z'))
            .expect("updates");
        assert_eq!('Z', arena.node_at(offset).expect("node").value());
        drop(arena);
        std::fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn it_lists_allocated_slots() {
        let path = scratch_path("arena_slots");
        let mut arena = NodeArena::try_open(&StoreConfig::new(&path)).expect("opens arena");
        assert_eq!(0, arena.slots().expect("slots").count());
        for value in ['a', 'b', 'c'] {
            arena.append(Node::new(value)).expect("appends");
        }
        let slots = arena.slots().expect("slots").collect::<Vec<Offset>>();
        assert_eq!(
            vec![
                Offset::new(HEADER_SIZE),
                Offset::new(HEADER_SIZE + NODE_SIZE),
                Offset::new(HEADER_SIZE + 2 * NODE_SIZE)
            ],
            slots
        );
        let header = arena.header().expect("header");
        assert!(arena.is_allocated(slots[2], &header));
        assert!(!arena.is_allocated(Offset::NONE, &header));
        assert!(!arena.is_allocated(slots[1].advance(4), &header));
        assert!(!arena.is_allocated(header.frontier(), &header));
        drop(arena);
        std::fs::remove_file(&path).expect("cleanup");
    }
}
