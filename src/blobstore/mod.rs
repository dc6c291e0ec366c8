//! Blob store: resizable random-access byte arrays on fixed-size blocks.
//!
//! A blob is a tree of blocks. Leaves carry the bytes; inner nodes carry
//! child ids. The root block's id is the blob's identity for its whole
//! lifetime, across any amount of growing and shrinking.
//!
//! ```text
//!                 ┌────────────┐
//!                 │ root/inner │          depth 2
//!                 └─────┬──────┘
//!          ┌───────────┼───────────┐
//!     ┌────┴───┐   ┌───┴────┐  ┌───┴────┐
//!     │ inner  │   │ inner  │  │ inner  │   depth 1
//!     └─┬─┬─┬──┘   └─┬─┬─┬──┘  └──┬─────┘
//!      leaves        leaves      leaves     depth 0
//! ```

pub mod layout;
pub mod node;
pub mod node_store;
pub mod tree;

use std::sync::Arc;

use crate::blockstore::BlockStore;
use crate::core::{BlockId, FsResult};

use node_store::DataNodeStore;
use tree::DataTree;

// ============================================================================
// Blob
// ============================================================================

/// One resizable byte array, identified by its root block id.
pub struct Blob<B: BlockStore + 'static> {
    nodes: Arc<DataNodeStore<B>>,
    id: BlockId,
}

impl<B: BlockStore + 'static> Blob<B> {
    /// The blob's identity.
    #[inline]
    pub fn id(&self) -> BlockId {
        self.id
    }

    fn tree(&self) -> DataTree<'_, B> {
        DataTree::new(&self.nodes, self.id)
    }

    /// Current size in bytes.
    pub fn size(&self) -> FsResult<u64> {
        self.tree().size()
    }

    /// Grow (zero-filling) or shrink to `new_size`.
    pub fn resize(&self, new_size: u64) -> FsResult<()> {
        self.tree().resize(new_size)
    }

    /// Read exactly `target.len()` bytes at `offset`.
    pub fn read(&self, offset: u64, target: &mut [u8]) -> FsResult<()> {
        self.tree().read(offset, target)
    }

    /// Read up to `target.len()` bytes at `offset`; returns bytes read.
    pub fn try_read(&self, offset: u64, target: &mut [u8]) -> FsResult<usize> {
        self.tree().try_read(offset, target)
    }

    /// The whole blob content.
    pub fn read_all(&self) -> FsResult<Vec<u8>> {
        let tree = self.tree();
        let size = tree.size()?;
        let mut data = vec![0u8; size as usize];
        tree.read(0, &mut data)?;
        Ok(data)
    }

    /// Write `source` at `offset`, growing as needed.
    pub fn write(&self, offset: u64, source: &[u8]) -> FsResult<()> {
        self.tree().write(offset, source)
    }

    /// Push all pending writes down to the backend.
    pub fn flush(&self) -> FsResult<()> {
        self.nodes.flush()
    }
}

// ============================================================================
// Blob Store
// ============================================================================

/// Creates, loads and removes blobs on a block store.
pub struct BlobStore<B: BlockStore + 'static> {
    nodes: Arc<DataNodeStore<B>>,
}

impl<B: BlockStore + 'static> BlobStore<B> {
    /// Build the store; `physical_block_size` is the configured block size
    /// of the filesystem, before the lower layers' overhead.
    pub fn new(blocks: B, physical_block_size: u64) -> FsResult<Self> {
        Ok(Self {
            nodes: Arc::new(DataNodeStore::new(blocks, physical_block_size)?),
        })
    }

    /// Create a new empty blob.
    pub fn create(&self) -> FsResult<Blob<B>> {
        let leaf = self.nodes.create_leaf(Vec::new())?;
        Ok(Blob {
            nodes: Arc::clone(&self.nodes),
            id: leaf.id,
        })
    }

    /// Load a blob by its root id.
    pub fn load(&self, id: &BlockId) -> FsResult<Option<Blob<B>>> {
        match self.nodes.load(id)? {
            Some(_) => Ok(Some(Blob {
                nodes: Arc::clone(&self.nodes),
                id: *id,
            })),
            None => Ok(None),
        }
    }

    /// Remove a loaded blob and all its nodes.
    pub fn remove(&self, blob: Blob<B>) -> FsResult<()> {
        DataTree::new(&self.nodes, blob.id).remove_all_nodes()
    }

    /// Remove a blob by id; fails with `NotFound` if it does not exist.
    pub fn remove_by_id(&self, id: &BlockId) -> FsResult<()> {
        DataTree::new(&self.nodes, *id).remove_all_nodes()
    }

    /// Number of nodes (blocks) across all blobs.
    pub fn num_nodes(&self) -> FsResult<u64> {
        self.nodes.num_nodes()
    }

    /// Rough free space underneath.
    pub fn estimate_space_for_num_bytes_left(&self) -> FsResult<u64> {
        self.nodes.blocks().estimate_num_free_bytes()
    }

    /// Push all pending writes down to the backend.
    pub fn flush(&self) -> FsResult<()> {
        self.nodes.flush()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockstore::inmemory::InMemoryBlockStore;
    use crate::blockstore::testutils::TrackingBlockStore;

    fn small_blob_store() -> BlobStore<InMemoryBlockStore> {
        // node size 53: max_bytes_per_leaf = 48, max_children = 3
        BlobStore::new(InMemoryBlockStore::new(), 53).unwrap()
    }

    #[test]
    fn created_blob_is_empty_and_loadable() {
        let store = small_blob_store();
        let blob = store.create().unwrap();
        assert_eq!(blob.size().unwrap(), 0);
        let reloaded = store.load(&blob.id()).unwrap().unwrap();
        assert_eq!(reloaded.size().unwrap(), 0);
    }

    #[test]
    fn blobs_get_distinct_ids() {
        let store = small_blob_store();
        let a = store.create().unwrap();
        let b = store.create().unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn load_missing_blob_is_none() {
        let store = small_blob_store();
        assert!(store.load(&BlockId::random()).unwrap().is_none());
    }

    #[test]
    fn write_then_read_roundtrip() {
        let store = small_blob_store();
        let blob = store.create().unwrap();
        let data: Vec<u8> = (0..500u32).map(|i| (i * 7 % 256) as u8).collect();
        blob.write(0, &data).unwrap();
        assert_eq!(blob.read_all().unwrap(), data);
    }

    #[test]
    fn removing_a_blob_frees_all_its_nodes() {
        let store = small_blob_store();
        let keep = store.create().unwrap();
        keep.write(0, &[1u8; 300]).unwrap();
        let nodes_with_keep_only = {
            let doomed = store.create().unwrap();
            doomed.write(0, &[2u8; 300]).unwrap();
            let total = store.num_nodes().unwrap();
            store.remove(doomed).unwrap();
            total
        };
        assert!(store.num_nodes().unwrap() < nodes_with_keep_only);
        // The kept blob is intact.
        assert_eq!(keep.read_all().unwrap(), vec![1u8; 300]);
    }

    #[test]
    fn remove_by_id_of_missing_blob_fails() {
        let store = small_blob_store();
        assert!(store.remove_by_id(&BlockId::random()).is_err());
    }

    #[test]
    fn resize_properties_hold() {
        let store = small_blob_store();
        let blob = store.create().unwrap();
        blob.write(0, &[7u8; 123]).unwrap();
        for &new_size in &[200u64, 48, 49, 0, 500] {
            let old = blob.read_all().unwrap();
            blob.resize(new_size).unwrap();
            assert_eq!(blob.size().unwrap(), new_size);
            let now = blob.read_all().unwrap();
            let preserved = old.len().min(new_size as usize);
            assert_eq!(&now[..preserved], &old[..preserved]);
            assert!(now[preserved..].iter().all(|&b| b == 0));
        }
    }

    // ------------------------------------------------------------------
    // Scenario: tree-depth promotion at a realistic block size
    // ------------------------------------------------------------------

    #[test]
    fn depth_promotion_keeps_root_id_at_4k_blocks() {
        use crate::blobstore::node::DataNode;
        let blocks = InMemoryBlockStore::new();
        let store = BlobStore::new(blocks, 4096).unwrap();
        let max_leaf = store.nodes.layout().max_bytes_per_leaf();
        assert_eq!(max_leaf, 4091);
        assert_eq!(store.nodes.layout().max_children_per_inner_node(), 255);

        let blob = store.create().unwrap();
        let id = blob.id();
        blob.write(0, &vec![0u8; max_leaf as usize]).unwrap();
        assert!(matches!(
            store.nodes.load(&id).unwrap().unwrap(),
            DataNode::Leaf(_)
        ));

        blob.write(max_leaf, b"x").unwrap();
        match store.nodes.load(&id).unwrap().unwrap() {
            DataNode::Inner(inner) => {
                assert_eq!(inner.depth, 1);
                assert_eq!(inner.children.len(), 2);
            }
            other => panic!("expected promoted root, got {other:?}"),
        }
        assert_eq!(blob.size().unwrap(), max_leaf + 1);
    }

    // ------------------------------------------------------------------
    // Performance contract (counted against the raw backend)
    // ------------------------------------------------------------------

    fn tracked_blob_store() -> (
        TrackingBlockStore<InMemoryBlockStore>,
        BlobStore<TrackingBlockStore<InMemoryBlockStore>>,
    ) {
        let tracking = TrackingBlockStore::new(InMemoryBlockStore::new());
        let store = BlobStore::new(tracking.clone(), 53).unwrap();
        (tracking, store)
    }

    /// A full two-level tree: root inner node with c = 3 full leaves.
    fn full_two_level_blob(
        store: &BlobStore<TrackingBlockStore<InMemoryBlockStore>>,
    ) -> Blob<TrackingBlockStore<InMemoryBlockStore>> {
        let blob = store.create().unwrap();
        blob.write(0, &[1u8; 3 * 48]).unwrap();
        blob
    }

    #[test]
    fn delete_full_tree_loads_no_leaves() {
        let (tracking, store) = tracked_blob_store();
        let blob = full_two_level_blob(&store);
        let id = blob.id();
        tracking.reset_counts();
        store.remove_by_id(&id).unwrap();
        // Only the root inner node is loaded; 1 + c blocks are removed.
        assert_eq!(tracking.loads(), 1);
        assert_eq!(tracking.removes(), 1 + 3);
        assert_eq!(store.num_nodes().unwrap(), 0);
    }

    #[test]
    fn read_full_tree_loads_each_leaf_once_plus_size_probe() {
        let (tracking, store) = tracked_blob_store();
        let blob = full_two_level_blob(&store);
        tracking.reset_counts();
        let mut buf = vec![0u8; 3 * 48];
        blob.read(0, &mut buf).unwrap();
        // Size probe: root + rightmost leaf. Traversal: root + c leaves.
        // Leaf loads: c + 1; inner loads: 2.
        assert_eq!(tracking.loads(), 2 + 1 + 3);
    }

    #[test]
    fn overwrite_full_tree_loads_at_most_the_rightmost_leaf() {
        let (tracking, store) = tracked_blob_store();
        let blob = full_two_level_blob(&store);
        tracking.reset_counts();
        blob.write(0, &[2u8; 3 * 48]).unwrap();
        // All leaves are fully covered: blind overwrites, only the root
        // inner node is loaded.
        assert_eq!(tracking.loads(), 1);
        assert_eq!(tracking.stores(), 3);
        assert_eq!(blob.read_all().unwrap(), vec![2u8; 3 * 48]);
    }

    #[test]
    fn overwrite_with_partial_tail_loads_exactly_the_rightmost_leaf() {
        let (tracking, store) = tracked_blob_store();
        let blob = store.create().unwrap();
        blob.write(0, &[1u8; 2 * 48 + 10]).unwrap();
        tracking.reset_counts();
        blob.write(0, &[2u8; 2 * 48 + 5]).unwrap();
        // Root inner node plus the rightmost (partial) leaf.
        assert_eq!(tracking.loads(), 2);
        let mut all = blob.read_all().unwrap();
        assert_eq!(all.len(), 2 * 48 + 10);
        assert!(all.drain(..2 * 48 + 5).all(|b| b == 2));
        assert!(all.iter().all(|&b| b == 1));
    }

    #[test]
    fn growing_one_byte_past_capacity_loads_only_the_old_last_leaf() {
        let (tracking, store) = tracked_blob_store();
        let blob = store.create().unwrap();
        blob.write(0, &[1u8; 48]).unwrap(); // single full leaf
        tracking.reset_counts();
        blob.write(48, b"x").unwrap();
        // Loads: the root (which is the old leaf) for the promotion, and
        // the migrated old leaf to verify it is grown to full size.
        assert_eq!(tracking.loads(), 2);
        assert_eq!(blob.size().unwrap(), 49);
    }
}
