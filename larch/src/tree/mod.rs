//! Tree implementation
//!

// Re-export
pub use self::arena::NodeArena;
pub use self::header::{FormatError, StoreHeader, FORMAT_VERSION, HEADER_SIZE, MAGIC};
pub use self::node::{Node, Offset, Side, NODE_SIZE};
pub use self::store::{delete_backing_file, Slot, Store, TreeError};

pub mod arena;
pub mod header;
mod node;
pub mod store;
