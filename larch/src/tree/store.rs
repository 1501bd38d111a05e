//! Tree store
//!
//! This is the main data structure exposed by the library.
//!

use std::collections::HashSet;
use std::io::ErrorKind;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

use super::arena::NodeArena;
use super::header::StoreHeader;
use super::node::{Node, Offset, Side};
use crate::config::StoreConfig;

/// Tree specific errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TreeError {
    /// A reference which doesn't point at an allocated node
    #[error("reference to unallocated node at offset: {0}")]
    DanglingReference(Offset),

    /// A node which is its own ancestor
    #[error("cycle detected at offset: {0}")]
    Cycle(Offset),

    /// A stored value which is not a Unicode scalar value
    #[error("invalid node value: {0:#x}")]
    InvalidValue(u32),
}

/// One allocated node slot, as classified by [`Store::detect_orphans`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot {
    /// Position in allocation order, starting at 0
    pub index: usize,
    /// Where the slot starts
    pub offset: Offset,
    /// Value held in the slot
    pub value: char,
    /// Can the slot be reached from the root?
    pub reachable: bool,
}

/// A persistent binary tree stored in a memory mapped file.
#[derive(Debug)]
pub struct Store {
    arena: NodeArena,
    path: PathBuf,
}

impl Store {
    /// Open the store at the specified path, creating it if it doesn't exist.
    pub fn try_open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::try_open_with(StoreConfig::new(path))
    }

    /// Open a store as described by `config`.
    pub fn try_open_with(config: StoreConfig) -> Result<Self> {
        let path = config.path().to_path_buf();

        if config.is_reset() {
            tracing::info!("Resetting store at: {}", path.display());
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != ErrorKind::NotFound {
                    return Err(err).context("could not remove existing store");
                }
            }
        }

        tracing::info!("Opening store at: {}", path.display());

        let arena = NodeArena::try_open(&config)?;
        Ok(Self { arena, path })
    }

    /// Unmap and close the backing file. Closing twice is harmless.
    pub fn close(&mut self) -> Result<()> {
        self.arena.close()
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current header.
    pub fn header(&self) -> Result<StoreHeader> {
        self.arena.header()
    }

    /// Number of allocated node slots, reachable or not.
    pub fn node_count(&self) -> Result<u64> {
        Ok(self.header()?.slot_count())
    }

    /// The node at `offset`.
    pub fn node_at(&self, offset: Offset) -> Result<Node> {
        self.check_reference(&self.header()?, offset)?;
        self.arena.node_at(offset)
    }

    /// Allocate a new childless node holding `value`.
    ///
    /// The node is not part of the tree until it is linked.
    pub fn append(&mut self, value: char) -> Result<Offset> {
        self.arena.append(Node::new(value))
    }

    /// Make the node at `offset` the root. [`Offset::NONE`] empties the tree.
    pub fn link_as_root(&mut self, offset: Offset) -> Result<()> {
        let mut header = self.header()?;
        if offset.is_some() {
            self.check_reference(&header, offset)?;
        }
        header.set_root(offset);
        self.arena.write_header(&header)?;
        tracing::debug!(%offset, "linked root");
        self.arena.flush()
    }

    /// Make the node at `offset` the `side` child of the first node holding `parent`.
    ///
    /// Nodes are searched in traversal order. If no node holds `parent`, nothing changes.
    /// Returns whether a parent was found. [`Offset::NONE`] unlinks the existing child.
    pub fn link_as_child(&mut self, parent: char, offset: Offset, side: Side) -> Result<bool> {
        if offset.is_some() {
            self.check_reference(&self.header()?, offset)?;
        }
        let Some(target) = self.find(parent)? else {
            tracing::debug!(%parent, "no parent to link to");
            return Ok(false);
        };
        self.arena
            .update_node(target, |node| node.set_child(side, offset))?;
        tracing::debug!(%parent, %offset, %side, "linked child");
        self.arena.flush()?;
        Ok(true)
    }

    /// Change the value of the first node holding `old` to `new`.
    ///
    /// Nodes are searched in traversal order. If no node holds `old`, nothing changes. Returns
    /// whether a node was updated.
    pub fn update_value(&mut self, old: char, new: char) -> Result<bool> {
        let Some(target) = self.find(old)? else {
            return Ok(false);
        };
        self.arena.update_node(target, |node| node.set_value(new))?;
        tracing::debug!(%old, %new, "updated value");
        self.arena.flush()?;
        Ok(true)
    }

    /// Append a node holding `value` and link it into the tree.
    ///
    /// With no parent the new node becomes the root. Otherwise it becomes a child of the first
    /// node holding the parent value; if there is no such node the new node is left an orphan.
    pub fn add(&mut self, value: char, parent: Option<(char, Side)>) -> Result<Offset> {
        let offset = self.append(value)?;
        match parent {
            Some((parent, side)) => {
                self.link_as_child(parent, offset, side)?;
            }
            None => self.link_as_root(offset)?,
        }
        Ok(offset)
    }

    /// Offset of the first node, in traversal order, holding `value`.
    pub fn find(&self, value: char) -> Result<Option<Offset>> {
        let mut found = None;
        self.traverse(|offset, node| {
            if node.value() == value {
                found = Some(offset);
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
        Ok(found)
    }

    /// Visit the tree depth first: a node, then its left subtree, then its right subtree.
    ///
    /// Stops early if the callback returns break. Every reference followed is checked, and a
    /// node which is its own ancestor fails the traversal rather than looping.
    pub fn traverse(&self, mut f: impl FnMut(Offset, &Node) -> ControlFlow<()>) -> Result<()> {
        let header = self.header()?;
        if header.root().is_none() {
            return Ok(());
        }

        let mut stack = vec![(header.root(), 0)];
        let mut ancestors: Vec<Offset> = vec![];

        while let Some((offset, depth)) = stack.pop() {
            self.check_reference(&header, offset)?;
            ancestors.truncate(depth);
            if ancestors.contains(&offset) {
                return Err(TreeError::Cycle(offset).into());
            }
            ancestors.push(offset);

            let node = self.arena.node_at(offset)?;
            if f(offset, &node).is_break() {
                break;
            }
            // Right first, so that left is popped first
            if node.right().is_some() {
                stack.push((node.right(), depth + 1));
            }
            if node.left().is_some() {
                stack.push((node.left(), depth + 1));
            }
        }
        Ok(())
    }

    /// Every reachable node, in traversal order.
    pub fn nodes(&self) -> Result<Vec<(Offset, Node)>> {
        let mut nodes = vec![];
        self.traverse(|offset, node| {
            nodes.push((offset, *node));
            ControlFlow::Continue(())
        })?;
        Ok(nodes)
    }

    /// Every reachable value, in traversal order.
    pub fn values(&self) -> Result<Vec<char>> {
        Ok(self
            .nodes()?
            .into_iter()
            .map(|(_, node)| node.value())
            .collect())
    }

    /// Describe each reachable node as `left <- value -> right`, in traversal order.
    ///
    /// A missing child is shown as `_`.
    pub fn describe(&self) -> Result<Vec<String>> {
        let mut lines = vec![];
        for (_, node) in self.nodes()? {
            let left = self.child_value(node.left())?;
            let right = self.child_value(node.right())?;
            lines.push(format!("{left} <- {} -> {right}", node.value()));
        }
        Ok(lines)
    }

    /// Classify every allocated slot as reachable from the root, or orphaned.
    ///
    /// Nothing is modified.
    pub fn detect_orphans(&self) -> Result<Vec<Slot>> {
        let mut reached = HashSet::new();
        self.traverse(|offset, _| {
            reached.insert(offset);
            ControlFlow::Continue(())
        })?;
        tracing::debug!(reachable = reached.len(), "collected reachable nodes");

        let mut slots = vec![];
        for (index, offset) in self.arena.slots()?.enumerate() {
            let node = self.arena.node_at(offset)?;
            let reachable = reached.contains(&offset);
            if !reachable {
                tracing::debug!(index, %offset, value = %node.value(), "orphaned node");
            }
            slots.push(Slot {
                index,
                offset,
                value: node.value(),
                reachable,
            });
        }
        Ok(slots)
    }

    /// Synchronize the whole store with the backing file.
    pub fn flush(&self) -> Result<()> {
        self.arena.flush()
    }

    /// Log basic information about our store.
    pub fn info(&self) -> Result<()> {
        let header = self.header()?;
        tracing::info!(
            path = %self.path.display(),
            length = header.length(),
            node_count = header.slot_count(),
            root = %header.root(),
            "larch store"
        );
        Ok(())
    }

    fn child_value(&self, offset: Offset) -> Result<String> {
        if offset.is_none() {
            Ok("_".to_string())
        } else {
            Ok(self.arena.node_at(offset)?.value().to_string())
        }
    }

    fn check_reference(&self, header: &StoreHeader, offset: Offset) -> Result<(), TreeError> {
        if self.arena.is_allocated(offset, header) {
            Ok(())
        } else {
            Err(TreeError::DanglingReference(offset))
        }
    }
}

/// Remove the backing file at `path`.
///
/// Any store using the file should be closed first.
pub fn delete_backing_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    tracing::info!("Deleting store at: {}", path.display());
    std::fs::remove_file(path)
        .with_context(|| format!("could not delete file: {}", path.display()))
}
