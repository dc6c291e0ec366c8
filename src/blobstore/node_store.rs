//! Load/store layer for tree nodes.
//!
//! Thin translation between [`DataNode`] values and blocks. Keeps no cache
//! of its own; the caching block store below does that.

use crate::blobstore::layout::NodeLayout;
use crate::blobstore::node::{DataInnerNode, DataLeafNode, DataNode};
use crate::blockstore::BlockStore;
use crate::core::{BlockId, FsError, FsResult};

/// Node store on top of a block store.
pub struct DataNodeStore<B> {
    blocks: B,
    layout: NodeLayout,
}

impl<B: BlockStore> DataNodeStore<B> {
    /// Create a node store whose nodes fill blocks of `physical_block_size`
    /// bytes after the lower layers' overhead.
    pub fn new(blocks: B, physical_block_size: u64) -> FsResult<Self> {
        let usable = blocks.block_size_from_physical_block_size(physical_block_size)?;
        Ok(Self {
            blocks,
            layout: NodeLayout::new(usable)?,
        })
    }

    /// Node geometry.
    #[inline]
    pub fn layout(&self) -> &NodeLayout {
        &self.layout
    }

    /// The wrapped block store.
    #[inline]
    pub fn blocks(&self) -> &B {
        &self.blocks
    }

    /// Load and parse a node.
    pub fn load(&self, id: &BlockId) -> FsResult<Option<DataNode>> {
        match self.blocks.load(id)? {
            None => Ok(None),
            Some(bytes) => DataNode::parse(*id, &bytes, &self.layout).map(Some),
        }
    }

    /// Create a new leaf under a fresh id.
    pub fn create_leaf(&self, data: Vec<u8>) -> FsResult<DataLeafNode> {
        debug_assert!(data.len() as u64 <= self.layout.max_bytes_per_leaf());
        let node = DataNode::Leaf(DataLeafNode {
            id: BlockId::null(), // patched below
            data,
        });
        let id = self.blocks.create(&node.serialize(&self.layout))?;
        let DataNode::Leaf(mut leaf) = node else {
            unreachable!("constructed as leaf")
        };
        leaf.id = id;
        Ok(leaf)
    }

    /// Create a new inner node under a fresh id.
    pub fn create_inner(&self, depth: u8, children: Vec<BlockId>) -> FsResult<DataInnerNode> {
        let node = DataInnerNode {
            id: BlockId::null(),
            depth,
            children,
        };
        let id = self
            .blocks
            .create(&DataNode::Inner(node.clone()).serialize(&self.layout))?;
        Ok(DataInnerNode { id, ..node })
    }

    /// Create a new block holding a byte-identical copy of `node`.
    pub fn create_copy_of(&self, node: &DataNode) -> FsResult<BlockId> {
        let mut copy = node.clone();
        match &mut copy {
            DataNode::Leaf(leaf) => leaf.id = BlockId::null(),
            DataNode::Inner(inner) => inner.id = BlockId::null(),
        }
        self.blocks.create(&copy.serialize(&self.layout))
    }

    /// Write a node back to its block.
    pub fn write(&self, node: &DataNode) -> FsResult<()> {
        self.blocks.store(&node.id(), &node.serialize(&self.layout))
    }

    /// Overwrite the block `id` with a leaf, without reading it first.
    pub fn overwrite_with_leaf(&self, id: BlockId, data: Vec<u8>) -> FsResult<()> {
        debug_assert!(data.len() as u64 <= self.layout.max_bytes_per_leaf());
        let node = DataNode::Leaf(DataLeafNode { id, data });
        self.blocks.store(&id, &node.serialize(&self.layout))
    }

    /// Overwrite the block `id` with an inner node.
    pub fn overwrite_with_inner(
        &self,
        id: BlockId,
        depth: u8,
        children: Vec<BlockId>,
    ) -> FsResult<()> {
        let node = DataNode::Inner(DataInnerNode { id, depth, children });
        self.blocks.store(&id, &node.serialize(&self.layout))
    }

    /// Remove a node's block. The node must exist.
    pub fn remove(&self, id: &BlockId) -> FsResult<()> {
        if self.blocks.remove(id)? {
            Ok(())
        } else {
            Err(FsError::NotFound)
        }
    }

    /// Number of nodes across all blobs.
    pub fn num_nodes(&self) -> FsResult<u64> {
        self.blocks.num_blocks()
    }

    /// Push write-back state down to the backend.
    pub fn flush(&self) -> FsResult<()> {
        self.blocks.flush()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockstore::inmemory::InMemoryBlockStore;

    fn store() -> DataNodeStore<InMemoryBlockStore> {
        DataNodeStore::new(InMemoryBlockStore::new(), 1024).unwrap()
    }

    #[test]
    fn created_leaf_can_be_loaded() {
        let store = store();
        let leaf = store.create_leaf(b"leaf data".to_vec()).unwrap();
        match store.load(&leaf.id).unwrap().unwrap() {
            DataNode::Leaf(loaded) => assert_eq!(loaded.data, b"leaf data"),
            other => panic!("expected leaf, got {other:?}"),
        }
    }

    #[test]
    fn created_inner_node_keeps_children() {
        let store = store();
        let a = store.create_leaf(vec![1]).unwrap();
        let b = store.create_leaf(vec![2]).unwrap();
        let inner = store.create_inner(1, vec![a.id, b.id]).unwrap();
        match store.load(&inner.id).unwrap().unwrap() {
            DataNode::Inner(loaded) => {
                assert_eq!(loaded.depth, 1);
                assert_eq!(loaded.children, vec![a.id, b.id]);
            }
            other => panic!("expected inner node, got {other:?}"),
        }
    }

    #[test]
    fn overwrite_switches_node_kind_in_place() {
        let store = store();
        let leaf = store.create_leaf(b"old".to_vec()).unwrap();
        let child = store.create_leaf(b"child".to_vec()).unwrap();
        store.overwrite_with_inner(leaf.id, 1, vec![child.id]).unwrap();
        assert!(matches!(
            store.load(&leaf.id).unwrap().unwrap(),
            DataNode::Inner(_)
        ));
    }

    #[test]
    fn copy_gets_fresh_id() {
        let store = store();
        let leaf = store.create_leaf(b"data".to_vec()).unwrap();
        let copy_id = store
            .create_copy_of(&DataNode::Leaf(leaf.clone()))
            .unwrap();
        assert_ne!(copy_id, leaf.id);
        match store.load(&copy_id).unwrap().unwrap() {
            DataNode::Leaf(loaded) => assert_eq!(loaded.data, b"data"),
            other => panic!("expected leaf, got {other:?}"),
        }
    }

    #[test]
    fn remove_missing_node_fails() {
        let store = store();
        assert!(matches!(
            store.remove(&BlockId::random()),
            Err(FsError::NotFound)
        ));
    }

    #[test]
    fn num_nodes_counts_blocks() {
        let store = store();
        assert_eq!(store.num_nodes().unwrap(), 0);
        let leaf = store.create_leaf(vec![]).unwrap();
        store.create_leaf(vec![]).unwrap();
        assert_eq!(store.num_nodes().unwrap(), 2);
        store.remove(&leaf.id).unwrap();
        assert_eq!(store.num_nodes().unwrap(), 1);
    }
}
