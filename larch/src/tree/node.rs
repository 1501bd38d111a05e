//! Node Types
//!
//! A node is a fixed size record holding a single character value and references to its left
//! and right children. On disk (and in the mapping) it looks like this:
//!
//! ```text
//! offset 0  : value     u32 (Unicode scalar value)
//! offset 4  : reserved  u32
//! offset 8  : left      u64 (Offset, 0 for none)
//! offset 16 : right     u64 (Offset, 0 for none)
//! ```

use std::fmt;

use anyhow::Result;
use bincode::Options;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::store::TreeError;
use crate::BINCODER;

/// Size in bytes of a node record. Also the stride between node slots.
pub const NODE_SIZE: u64 = 24;

/// A position relative to the start of the region.
///
/// Offsets are used everywhere a pointer would otherwise be stored, since the base address of the
/// mapping changes whenever the region is remapped. Offset 0 lies within the header, so it is
/// used as the "none" reference.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Offset(u64);

impl Offset {
    /// The "none" reference.
    pub const NONE: Offset = Offset(0);

    /// An offset `value` bytes from the start of the region.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Number of bytes from the start of the region.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Is this the "none" reference?
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Is this a reference to something?
    pub const fn is_some(self) -> bool {
        self.0 != 0
    }

    /// The offset `len` bytes further on.
    pub const fn advance(self, len: u64) -> Self {
        Self(self.0 + len)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which child of a node.
#[derive(Clone, Copy, Debug, Display, EnumString, PartialEq, Eq)]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
pub enum Side {
    /// The left child.
    Left,
    /// The right child.
    Right,
}

/// A tree node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Node {
    value: char,
    left: Offset,
    right: Offset,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeRecord {
    value: u32,
    reserved: u32,
    left: Offset,
    right: Offset,
}

impl Node {
    /// A node with no children.
    pub fn new(value: char) -> Self {
        Self {
            value,
            left: Offset::NONE,
            right: Offset::NONE,
        }
    }

    /// The node value.
    pub fn value(&self) -> char {
        self.value
    }

    /// Reference to the left child.
    pub fn left(&self) -> Offset {
        self.left
    }

    /// Reference to the right child.
    pub fn right(&self) -> Offset {
        self.right
    }

    /// Reference to the child on `side`.
    pub fn child(&self, side: Side) -> Offset {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    pub(crate) fn set_value(&mut self, value: char) {
        self.value = value;
    }

    pub(crate) fn set_child(&mut self, side: Side, offset: Offset) {
        match side {
            Side::Left => self.left = offset,
            Side::Right => self.right = offset,
        }
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<Self> {
        let record: NodeRecord = BINCODER.deserialize(buf)?;
        let value = char::from_u32(record.value).ok_or(TreeError::InvalidValue(record.value))?;
        Ok(Self {
            value,
            left: record.left,
            right: record.right,
        })
    }

    pub(crate) fn encode(&self, buf: &mut [u8]) -> Result<()> {
        let record = NodeRecord {
            value: u32::from(self.value),
            reserved: 0,
            left: self.left,
            right: self.right,
        };
        BINCODER.serialize_into(buf, &record).map_err(|e| e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::str::FromStr;

    #[test]
    fn it_has_a_fixed_record_size() {
        let record = NodeRecord {
            value: u32::from('x'),
            reserved: 0,
            left: Offset::new(48),
            right: Offset::new(72),
        };
        assert_eq!(NODE_SIZE, BINCODER.serialized_size(&record).expect("sized"));
    }

    #[test]
    fn it_lays_out_fields_in_order() {
        let mut node = Node::new('A');
        node.set_child(Side::Left, Offset::new(0x30));
        node.set_child(Side::Right, Offset::new(0x48));
        let mut buf = [0xffu8; NODE_SIZE as usize];
        node.encode(&mut buf).expect("encodes");
        assert_eq!(&buf[0..4], &0x41u32.to_le_bytes());
        assert_eq!(&buf[4..8], &[0u8; 4]);
        assert_eq!(&buf[8..16], &0x30u64.to_le_bytes());
        assert_eq!(&buf[16..24], &0x48u64.to_le_bytes());
    }

    #[test]
    fn it_keeps_multibyte_values() {
        let node = Node::new('力');
        let mut buf = [0u8; NODE_SIZE as usize];
        node.encode(&mut buf).expect("encodes");
        assert_eq!(node, Node::decode(&buf).expect("decodes"));
    }

    #[test]
    fn it_rejects_invalid_values() {
        let mut buf = [0u8; NODE_SIZE as usize];
        buf[0..4].copy_from_slice(&0xd800u32.to_le_bytes());
        let err = Node::decode(&buf).expect_err("surrogates are not chars");
        assert!(matches!(
            err.downcast_ref::<TreeError>(),
            Some(TreeError::InvalidValue(0xd800))
        ));
    }

    #[test]
    fn it_refuses_a_short_buffer() {
        let mut buf = [0u8; 10];
        assert!(Node::new('a').encode(&mut buf).is_err());
        assert!(Node::decode(&buf).is_err());
    }

    #[test]
    fn it_selects_children_by_side() {
        let mut node = Node::new('p');
        node.set_child(Side::Right, Offset::new(24));
        assert_eq!(Offset::NONE, node.child(Side::Left));
        assert_eq!(Offset::new(24), node.child(Side::Right));
    }

    #[test]
    fn it_parses_sides() {
        assert_eq!(Side::Left, Side::from_str("LEFT").expect("parses"));
        assert_eq!(Side::Right, Side::from_str("right").expect("parses"));
        assert!(Side::from_str("up").is_err());
        assert_eq!("left", Side::Left.to_string());
    }

    #[test]
    fn it_treats_zero_as_none() {
        assert!(Offset::NONE.is_none());
        assert!(Offset::new(24).is_some());
        assert_eq!(Offset::new(48), Offset::new(24).advance(NODE_SIZE));
    }
}
