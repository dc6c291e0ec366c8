//! Node geometry derived from the block size.
//!
//! Every node of a blob tree is stored in one block. A leaf spends 5 bytes
//! on its header and fills the rest with data; an inner node spends 5
//! bytes and fills the rest with 16-byte child ids. Both numbers are fixed
//! per filesystem because the block size is.

use crate::core::types::BLOCK_ID_LEN;
use crate::core::{FsError, FsResult};

/// Node header length: depth byte plus a u32 (leaf size / child count).
pub const NODE_HEADER_LEN: u64 = 5;

/// Deepest tree this layout supports; bounds recursion.
pub const MAX_DEPTH: u8 = 10;

/// Per-filesystem node geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeLayout {
    node_size: u64,
}

impl NodeLayout {
    /// Build the layout for nodes of `node_size` usable bytes per block.
    /// Needs room for at least two children per inner node; a one-child
    /// tree could never fan out.
    pub fn new(node_size: u64) -> FsResult<Self> {
        let layout = Self { node_size };
        if layout.max_children_per_inner_node() < 2 {
            return Err(FsError::Invalid(format!(
                "node size {node_size} is too small, inner nodes need space for two children"
            )));
        }
        Ok(layout)
    }

    /// Bytes each node serializes to.
    #[inline]
    pub fn node_size(&self) -> u64 {
        self.node_size
    }

    /// Data bytes a leaf can hold.
    #[inline]
    pub fn max_bytes_per_leaf(&self) -> u64 {
        self.node_size - NODE_HEADER_LEN
    }

    /// Child ids an inner node can hold.
    #[inline]
    pub fn max_children_per_inner_node(&self) -> u64 {
        (self.node_size - NODE_HEADER_LEN) / BLOCK_ID_LEN as u64
    }

    /// Leaves under one child of an inner node at `depth`.
    pub fn leaves_per_child(&self, depth: u8) -> u64 {
        debug_assert!(depth >= 1);
        self.max_leaves_per_tree(depth - 1)
    }

    /// Leaves a whole tree of `depth` can hold (saturating).
    pub fn max_leaves_per_tree(&self, depth: u8) -> u64 {
        self.max_children_per_inner_node()
            .checked_pow(depth as u32)
            .unwrap_or(u64::MAX)
    }

    /// Bytes a whole tree of `depth` can hold (saturating).
    pub fn max_bytes_per_tree(&self, depth: u8) -> u64 {
        self.max_leaves_per_tree(depth)
            .saturating_mul(self.max_bytes_per_leaf())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_for_4k_nodes() {
        let layout = NodeLayout::new(4096).unwrap();
        assert_eq!(layout.max_bytes_per_leaf(), 4091);
        assert_eq!(layout.max_children_per_inner_node(), 255);
        assert_eq!(layout.max_leaves_per_tree(0), 1);
        assert_eq!(layout.max_leaves_per_tree(1), 255);
        assert_eq!(layout.max_leaves_per_tree(2), 255 * 255);
        assert_eq!(layout.leaves_per_child(1), 1);
        assert_eq!(layout.leaves_per_child(2), 255);
    }

    #[test]
    fn rejects_tiny_nodes() {
        assert!(NodeLayout::new(20).is_err());
        assert!(NodeLayout::new(NODE_HEADER_LEN + 2 * BLOCK_ID_LEN as u64).is_ok());
    }

    #[test]
    fn deep_trees_saturate_instead_of_overflowing() {
        let layout = NodeLayout::new(1 << 20).unwrap();
        assert_eq!(layout.max_leaves_per_tree(MAX_DEPTH), u64::MAX);
    }
}
