//! Tree node representation and wire format.
//!
//! The first payload byte is the depth: 0 marks a leaf, anything else an
//! inner node. Every node serializes to exactly the layout's node size;
//! unused space is zero so block sizes reveal nothing about content.
//!
//! ```text
//! leaf:  | depth=0:u8 | size:u32 LE        | data … | zero padding |
//! inner: | depth:u8   | num_children:u32 LE | child ids … | zero padding |
//! ```

use crate::blobstore::layout::{NodeLayout, MAX_DEPTH, NODE_HEADER_LEN};
use crate::core::types::BLOCK_ID_LEN;
use crate::core::{BlockId, FsError, FsResult};

// ============================================================================
// Nodes
// ============================================================================

/// A leaf holding blob data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLeafNode {
    /// Block the leaf is stored in
    pub id: BlockId,
    /// Leaf payload, at most `max_bytes_per_leaf`
    pub data: Vec<u8>,
}

/// An inner node holding child block ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataInnerNode {
    /// Block the node is stored in
    pub id: BlockId,
    /// Distance to the leaves; at least 1
    pub depth: u8,
    /// Child ids, left to right; at least 1
    pub children: Vec<BlockId>,
}

/// Any node of a blob tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataNode {
    Leaf(DataLeafNode),
    Inner(DataInnerNode),
}

impl DataNode {
    /// Block id the node lives in.
    pub fn id(&self) -> BlockId {
        match self {
            DataNode::Leaf(leaf) => leaf.id,
            DataNode::Inner(inner) => inner.id,
        }
    }

    /// Depth byte: 0 for leaves.
    pub fn depth(&self) -> u8 {
        match self {
            DataNode::Leaf(_) => 0,
            DataNode::Inner(inner) => inner.depth,
        }
    }

    /// Parse a node from block payload bytes.
    pub fn parse(id: BlockId, block: &[u8], layout: &NodeLayout) -> FsResult<DataNode> {
        if (block.len() as u64) < NODE_HEADER_LEN {
            return Err(FsError::WrongFormat(format!(
                "node block {id} is shorter than the node header"
            )));
        }
        let depth = block[0];
        let count = u32::from_le_bytes(block[1..5].try_into().expect("len checked")) as u64;
        if depth == 0 {
            if count > layout.max_bytes_per_leaf() || NODE_HEADER_LEN + count > block.len() as u64 {
                return Err(FsError::WrongFormat(format!(
                    "leaf {id} claims {count} data bytes, more than fit"
                )));
            }
            let start = NODE_HEADER_LEN as usize;
            Ok(DataNode::Leaf(DataLeafNode {
                id,
                data: block[start..start + count as usize].to_vec(),
            }))
        } else {
            if depth > MAX_DEPTH {
                return Err(FsError::WrongFormat(format!(
                    "inner node {id} has depth {depth}, deeper than supported"
                )));
            }
            if count == 0
                || count > layout.max_children_per_inner_node()
                || NODE_HEADER_LEN + count * BLOCK_ID_LEN as u64 > block.len() as u64
            {
                return Err(FsError::WrongFormat(format!(
                    "inner node {id} claims {count} children, outside the valid range"
                )));
            }
            let mut children = Vec::with_capacity(count as usize);
            for i in 0..count as usize {
                let start = NODE_HEADER_LEN as usize + i * BLOCK_ID_LEN;
                children.push(
                    BlockId::from_slice(&block[start..start + BLOCK_ID_LEN])
                        .expect("slice is 16 bytes"),
                );
            }
            Ok(DataNode::Inner(DataInnerNode { id, depth, children }))
        }
    }

    /// Serialize to exactly the layout's node size.
    pub fn serialize(&self, layout: &NodeLayout) -> Vec<u8> {
        let mut out = vec![0u8; layout.node_size() as usize];
        match self {
            DataNode::Leaf(leaf) => {
                debug_assert!(leaf.data.len() as u64 <= layout.max_bytes_per_leaf());
                out[0] = 0;
                out[1..5].copy_from_slice(&(leaf.data.len() as u32).to_le_bytes());
                out[5..5 + leaf.data.len()].copy_from_slice(&leaf.data);
            }
            DataNode::Inner(inner) => {
                debug_assert!(inner.depth >= 1 && inner.depth <= MAX_DEPTH);
                debug_assert!(
                    !inner.children.is_empty()
                        && inner.children.len() as u64 <= layout.max_children_per_inner_node()
                );
                out[0] = inner.depth;
                out[1..5].copy_from_slice(&(inner.children.len() as u32).to_le_bytes());
                for (i, child) in inner.children.iter().enumerate() {
                    let start = 5 + i * BLOCK_ID_LEN;
                    out[start..start + BLOCK_ID_LEN].copy_from_slice(child.as_bytes());
                }
            }
        }
        out
    }
}

// ============================================================================
// Tests
// ============================================================================
