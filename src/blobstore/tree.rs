//! Tree algorithms over blob nodes.
//!
//! All byte-level operations funnel through one leaf traversal working on
//! the leaf index range `[begin, end)`. The traversal
//!
//! * loads only inner nodes on the paths to that range,
//! * hands leaves out as lazily-loaded handles so a fully overwritten leaf
//!   is never read,
//! * grows the tree on demand: the root is promoted in place (keeping the
//!   blob's external id), the previously-last leaf is the only leaf that
//!   is ever loaded for growth, and everything else is created blind.
//!
//! Invariant kept throughout: all leaves sit at the same depth, and only
//! the rightmost path may be under-full.

use crate::blobstore::layout::MAX_DEPTH;
use crate::blobstore::node::{DataInnerNode, DataLeafNode, DataNode};
use crate::blobstore::node_store::DataNodeStore;
use crate::blockstore::BlockStore;
use crate::core::{BlockId, FsError, FsResult};

fn ceil_div(a: u64, b: u64) -> u64 {
    a.div_ceil(b)
}

// ============================================================================
// Leaf Handle
// ============================================================================

/// A leaf the traversal points a callback at. Loading is lazy so callers
/// that replace the whole leaf never read it; mutations are written back
/// when the traversal finishes the handle.
pub struct LeafHandle<'a, B> {
    store: &'a DataNodeStore<B>,
    id: BlockId,
    node: Option<DataLeafNode>,
    dirty: bool,
}

impl<'a, B: BlockStore> LeafHandle<'a, B> {
    fn new(store: &'a DataNodeStore<B>, id: BlockId) -> Self {
        Self {
            store,
            id,
            node: None,
            dirty: false,
        }
    }

    fn with_node(store: &'a DataNodeStore<B>, node: DataLeafNode) -> Self {
        let id = node.id;
        Self {
            store,
            id,
            node: Some(node),
            dirty: false,
        }
    }

    /// Block id of the leaf.
    pub fn id(&self) -> BlockId {
        self.id
    }

    fn ensure_loaded(&mut self) -> FsResult<()> {
        if self.node.is_some() {
            return Ok(());
        }
        match self.store.load(&self.id)? {
            Some(DataNode::Leaf(leaf)) => {
                self.node = Some(leaf);
                Ok(())
            }
            Some(DataNode::Inner(_)) => Err(FsError::WrongFormat(format!(
                "expected leaf at block {}, found an inner node",
                self.id
            ))),
            None => Err(FsError::NotFound),
        }
    }

    /// Leaf data, loading the leaf on first use.
    pub fn data(&mut self) -> FsResult<&[u8]> {
        self.ensure_loaded()?;
        match &self.node {
            Some(node) => Ok(&node.data),
            None => unreachable!("just loaded"),
        }
    }

    /// Mutable leaf data; marks the leaf for write-back.
    pub fn data_mut(&mut self) -> FsResult<&mut Vec<u8>> {
        self.ensure_loaded()?;
        self.dirty = true;
        match &mut self.node {
            Some(node) => Ok(&mut node.data),
            None => unreachable!("just loaded"),
        }
    }

    /// Replace the leaf content without reading its old bytes.
    pub fn overwrite(&mut self, data: Vec<u8>) {
        self.node = Some(DataLeafNode { id: self.id, data });
        self.dirty = true;
    }

    /// Zero-extend the leaf to `size` bytes if it is shorter.
    pub fn grow_to(&mut self, size: u64) -> FsResult<()> {
        if (self.data()?.len() as u64) < size {
            self.data_mut()?.resize(size as usize, 0);
        }
        Ok(())
    }

    /// Cut the leaf down to `size` bytes if it is longer.
    pub fn truncate_to(&mut self, size: u64) -> FsResult<()> {
        if (self.data()?.len() as u64) > size {
            self.data_mut()?.truncate(size as usize);
        }
        Ok(())
    }

    fn finish(self) -> FsResult<()> {
        if self.dirty {
            match self.node {
                Some(node) => self.store.write(&DataNode::Leaf(node)),
                None => unreachable!("dirty implies loaded"),
            }
        } else {
            Ok(())
        }
    }
}

/// Callback for leaves that already exist in the traversed range.
pub type OnExistingLeaf<'c, B> = &'c mut dyn FnMut(u64, &mut LeafHandle<'_, B>) -> FsResult<()>;

/// Callback producing the data of a leaf created inside the traversed
/// range. Must return full-size data except for the blob's last leaf.
pub type OnCreateLeaf<'c> = &'c mut dyn FnMut(u64) -> FsResult<Vec<u8>>;

// ============================================================================
// Data Tree
// ============================================================================

/// Tree of nodes rooted at one block, the storage of a single blob.
pub struct DataTree<'a, B> {
    nodes: &'a DataNodeStore<B>,
    root_id: BlockId,
}

impl<'a, B: BlockStore> DataTree<'a, B> {
    pub fn new(nodes: &'a DataNodeStore<B>, root_id: BlockId) -> Self {
        Self { nodes, root_id }
    }

    /// Root block id; the blob's identity.
    pub fn root_id(&self) -> BlockId {
        self.root_id
    }

    fn load_root(&self) -> FsResult<DataNode> {
        self.nodes.load(&self.root_id)?.ok_or(FsError::NotFound)
    }

    fn load_inner_child(&self, id: &BlockId) -> FsResult<DataInnerNode> {
        match self.nodes.load(id)? {
            Some(DataNode::Inner(inner)) => Ok(inner),
            Some(DataNode::Leaf(_)) => Err(FsError::WrongFormat(format!(
                "expected inner node at block {id}, found a leaf"
            ))),
            None => Err(FsError::NotFound),
        }
    }

    // ------------------------------------------------------------------
    // Size
    // ------------------------------------------------------------------

    /// Total bytes in the blob. Loads the rightmost path.
    pub fn size(&self) -> FsResult<u64> {
        let root = self.load_root()?;
        self.bytes_in_subtree(&root)
    }

    fn bytes_in_subtree(&self, node: &DataNode) -> FsResult<u64> {
        match node {
            DataNode::Leaf(leaf) => Ok(leaf.data.len() as u64),
            DataNode::Inner(inner) => {
                let layout = self.nodes.layout();
                let full_children = inner.children.len() as u64 - 1;
                let bytes_per_full_child = layout
                    .leaves_per_child(inner.depth)
                    .saturating_mul(layout.max_bytes_per_leaf());
                let last_id = inner.children[inner.children.len() - 1];
                let last = self.nodes.load(&last_id)?.ok_or(FsError::NotFound)?;
                Ok(full_children * bytes_per_full_child + self.bytes_in_subtree(&last)?)
            }
        }
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    /// Visit the leaves `[begin, end)`, growing the tree as needed.
    pub fn traverse_leaves(
        &self,
        begin: u64,
        end: u64,
        on_existing: OnExistingLeaf<'_, B>,
        on_create: OnCreateLeaf<'_>,
    ) -> FsResult<()> {
        if end <= begin {
            return Ok(());
        }
        let mut root = self.load_root()?;
        while self.nodes.layout().max_leaves_per_tree(root.depth()) < end {
            root = self.increase_tree_depth(root)?;
        }
        match root {
            DataNode::Leaf(leaf) => {
                // Depth fits `end`, so end == 1 and begin == 0 here.
                let mut handle = LeafHandle::with_node(self.nodes, leaf);
                on_existing(0, &mut handle)?;
                handle.finish()
            }
            DataNode::Inner(inner) => {
                self.traverse_existing_inner(inner, 0, begin, end, true, false, on_existing, on_create)
            }
        }
    }

    /// Promote the root in place: its content migrates to a fresh child
    /// block, the root block becomes an inner node above it. The blob's
    /// external id never changes.
    fn increase_tree_depth(&self, root: DataNode) -> FsResult<DataNode> {
        let new_depth = root.depth() + 1;
        if new_depth > MAX_DEPTH {
            return Err(FsError::Invalid(
                "blob grew deeper than the supported tree depth".to_string(),
            ));
        }
        let migrated = self.nodes.create_copy_of(&root)?;
        self.nodes
            .overwrite_with_inner(self.root_id, new_depth, vec![migrated])?;
        Ok(DataNode::Inner(DataInnerNode {
            id: self.root_id,
            depth: new_depth,
            children: vec![migrated],
        }))
    }

    /// Walk one existing inner node. `grow_full` demands the whole subtree
    /// end up at full capacity (a sibling will be appended after it);
    /// `is_right_border` marks the subtree containing the blob's end.
    #[allow(clippy::too_many_arguments)]
    fn traverse_existing_inner(
        &self,
        inner: DataInnerNode,
        first_leaf: u64,
        begin: u64,
        end: u64,
        is_right_border: bool,
        grow_full: bool,
        on_existing: OnExistingLeaf<'_, B>,
        on_create: OnCreateLeaf<'_>,
    ) -> FsResult<()> {
        let layout = self.nodes.layout();
        let lpc = layout.leaves_per_child(inner.depth);
        let max_children = layout.max_children_per_inner_node();
        let existing = inner.children.len() as u64;
        let target_children = if grow_full {
            max_children
        } else if is_right_border {
            debug_assert!(end > first_leaf);
            existing.max(ceil_div(end - first_leaf, lpc).min(max_children))
        } else {
            existing
        };

        let mut children = inner.children.clone();
        for i in 0..target_children {
            let child_first = first_leaf + i * lpc;
            let child_cap_end = child_first + lpc;
            if i < existing {
                let child_id = children[i as usize];
                let child_grow_full =
                    grow_full || (is_right_border && i == existing - 1 && target_children > existing);
                let child_is_right_border = is_right_border && i == target_children - 1;
                let intersects = child_cap_end > begin && child_first < end;
                if !intersects && !child_grow_full {
                    continue;
                }
                if inner.depth == 1 {
                    let mut handle = LeafHandle::new(self.nodes, child_id);
                    if intersects {
                        on_existing(child_first, &mut handle)?;
                    }
                    if child_grow_full {
                        handle.grow_to(layout.max_bytes_per_leaf())?;
                    }
                    handle.finish()?;
                } else {
                    let child = self.load_inner_child(&child_id)?;
                    self.traverse_existing_inner(
                        child,
                        child_first,
                        begin,
                        end,
                        child_is_right_border,
                        child_grow_full,
                        on_existing,
                        on_create,
                    )?;
                }
            } else {
                let is_last_overall = is_right_border && i == target_children - 1 && !grow_full;
                let child_id = self.create_subtree(
                    inner.depth - 1,
                    child_first,
                    begin,
                    end,
                    is_last_overall,
                    on_create,
                )?;
                children.push(child_id);
            }
        }

        if children.len() != inner.children.len() {
            self.nodes
                .overwrite_with_inner(inner.id, inner.depth, children)?;
        }
        Ok(())
    }

    /// Create a whole new subtree blind (no loads). Leaves inside
    /// `[begin, end)` get their data from the callback, leaves before the
    /// range are zero-filled at full size.
    fn create_subtree(
        &self,
        depth: u8,
        first_leaf: u64,
        begin: u64,
        end: u64,
        is_last_overall: bool,
        on_create: OnCreateLeaf<'_>,
    ) -> FsResult<BlockId> {
        let layout = self.nodes.layout();
        if depth == 0 {
            let data = if first_leaf >= begin && first_leaf < end {
                let data = on_create(first_leaf)?;
                debug_assert!(data.len() as u64 <= layout.max_bytes_per_leaf());
                data
            } else {
                debug_assert!(first_leaf < begin, "leaves are never created past the range");
                vec![0u8; layout.max_bytes_per_leaf() as usize]
            };
            Ok(self.nodes.create_leaf(data)?.id)
        } else {
            let lpc = layout.leaves_per_child(depth);
            let capacity = layout.max_leaves_per_tree(depth);
            let leaves_here = if is_last_overall {
                (end - first_leaf).min(capacity)
            } else {
                capacity
            };
            let num_children = ceil_div(leaves_here, lpc);
            let mut children = Vec::with_capacity(num_children as usize);
            for j in 0..num_children {
                let child_last = is_last_overall && j == num_children - 1;
                children.push(self.create_subtree(
                    depth - 1,
                    first_leaf + j * lpc,
                    begin,
                    end,
                    child_last,
                    on_create,
                )?);
            }
            Ok(self.nodes.create_inner(depth, children)?.id)
        }
    }

    // ------------------------------------------------------------------
    // Read / Write
    // ------------------------------------------------------------------

    /// Read exactly `target.len()` bytes at `offset`; fails past the end.
    pub fn read(&self, offset: u64, target: &mut [u8]) -> FsResult<()> {
        let size = self.size()?;
        let end = offset + target.len() as u64;
        if end > size {
            return Err(FsError::Invalid(format!(
                "read of {} bytes at offset {offset} exceeds blob size {size}",
                target.len()
            )));
        }
        self.read_in_range(offset, target)
    }

    /// Read up to `target.len()` bytes at `offset`, clamped to the blob
    /// size; returns the number of bytes read.
    pub fn try_read(&self, offset: u64, target: &mut [u8]) -> FsResult<usize> {
        let size = self.size()?;
        let readable = size.saturating_sub(offset).min(target.len() as u64) as usize;
        self.read_in_range(offset, &mut target[..readable])?;
        Ok(readable)
    }

    fn read_in_range(&self, offset: u64, target: &mut [u8]) -> FsResult<()> {
        if target.is_empty() {
            return Ok(());
        }
        let max_leaf = self.nodes.layout().max_bytes_per_leaf();
        let end = offset + target.len() as u64;
        let begin_leaf = offset / max_leaf;
        let end_leaf = ceil_div(end, max_leaf);
        self.traverse_leaves(
            begin_leaf,
            end_leaf,
            &mut |leaf_index, handle| {
                let leaf_begin = leaf_index * max_leaf;
                let data = handle.data()?;
                let copy_begin = offset.max(leaf_begin);
                let copy_end = end.min(leaf_begin + data.len() as u64);
                if copy_end > copy_begin {
                    target[(copy_begin - offset) as usize..(copy_end - offset) as usize]
                        .copy_from_slice(
                            &data[(copy_begin - leaf_begin) as usize
                                ..(copy_end - leaf_begin) as usize],
                        );
                }
                Ok(())
            },
            &mut |_| {
                Err(FsError::Invalid(
                    "read traversal tried to create a leaf".to_string(),
                ))
            },
        )
    }

    /// Write `source` at `offset`, growing the blob as needed.
    pub fn write(&self, offset: u64, source: &[u8]) -> FsResult<()> {
        if source.is_empty() {
            return Ok(());
        }
        let max_leaf = self.nodes.layout().max_bytes_per_leaf();
        let end = offset + source.len() as u64;
        let begin_leaf = offset / max_leaf;
        let end_leaf = ceil_div(end, max_leaf);
        self.traverse_leaves(
            begin_leaf,
            end_leaf,
            &mut |leaf_index, handle| {
                let leaf_begin = leaf_index * max_leaf;
                let write_begin = offset.max(leaf_begin);
                let write_end = end.min(leaf_begin + max_leaf);
                let source_range =
                    &source[(write_begin - offset) as usize..(write_end - offset) as usize];
                if write_begin == leaf_begin && write_end == leaf_begin + max_leaf {
                    // Full capacity covered: no read-modify-write.
                    handle.overwrite(source_range.to_vec());
                } else {
                    let data = handle.data_mut()?;
                    let needed = (write_end - leaf_begin) as usize;
                    if data.len() < needed {
                        data.resize(needed, 0);
                    }
                    data[(write_begin - leaf_begin) as usize..needed]
                        .copy_from_slice(source_range);
                }
                Ok(())
            },
            &mut |leaf_index| {
                let leaf_begin = leaf_index * max_leaf;
                let write_begin = offset.max(leaf_begin);
                let write_end = end.min(leaf_begin + max_leaf);
                let mut data = vec![0u8; (write_end - leaf_begin) as usize];
                data[(write_begin - leaf_begin) as usize..].copy_from_slice(
                    &source[(write_begin - offset) as usize..(write_end - offset) as usize],
                );
                Ok(data)
            },
        )
    }

    // ------------------------------------------------------------------
    // Resize
    // ------------------------------------------------------------------

    /// Grow or shrink the blob to `new_size` bytes; new bytes read as
    /// zero, cut bytes are gone and their nodes removed.
    pub fn resize(&self, new_size: u64) -> FsResult<()> {
        let old_size = self.size()?;
        if new_size > old_size {
            self.grow(new_size)
        } else if new_size < old_size {
            self.shrink(new_size)
        } else {
            Ok(())
        }
    }

    fn last_leaf_geometry(&self, size: u64) -> (u64, u64) {
        let max_leaf = self.nodes.layout().max_bytes_per_leaf();
        let num_leaves = if size == 0 { 1 } else { ceil_div(size, max_leaf) };
        let last_size = size - (num_leaves - 1) * max_leaf;
        (num_leaves, last_size)
    }

    fn grow(&self, new_size: u64) -> FsResult<()> {
        let (num_leaves, last_size) = self.last_leaf_geometry(new_size);
        self.traverse_leaves(
            num_leaves - 1,
            num_leaves,
            &mut |_, handle| handle.grow_to(last_size),
            &mut |_| Ok(vec![0u8; last_size as usize]),
        )
    }

    fn shrink(&self, new_size: u64) -> FsResult<()> {
        let (num_leaves, last_size) = self.last_leaf_geometry(new_size);
        let root = self.load_root()?;
        if let DataNode::Inner(inner) = root {
            self.trim_inner(inner, 0, num_leaves)?;
            self.collapse_root()?;
        }
        // Shorten the (new) last leaf.
        self.traverse_leaves(
            num_leaves - 1,
            num_leaves,
            &mut |_, handle| handle.truncate_to(last_size),
            &mut |_| {
                Err(FsError::Invalid(
                    "shrink traversal tried to create a leaf".to_string(),
                ))
            },
        )
    }

    /// Remove every child subtree not needed for the first `keep` leaves.
    fn trim_inner(&self, inner: DataInnerNode, first_leaf: u64, keep: u64) -> FsResult<()> {
        let layout = self.nodes.layout();
        let lpc = layout.leaves_per_child(inner.depth);
        let capacity = layout.max_leaves_per_tree(inner.depth);
        debug_assert!(keep > first_leaf);
        let keep_rel = (keep - first_leaf).min(capacity);
        let needed = ceil_div(keep_rel, lpc);
        let existing = inner.children.len() as u64;

        for i in needed..existing {
            self.remove_subtree_by_id(&inner.children[i as usize])?;
        }
        if needed < existing {
            self.nodes.overwrite_with_inner(
                inner.id,
                inner.depth,
                inner.children[..needed as usize].to_vec(),
            )?;
        }

        // Descend into the new last child if the cut lands inside it.
        let last_first = first_leaf + (needed - 1) * lpc;
        if keep < last_first + lpc && inner.depth > 1 {
            let child = self.load_inner_child(&inner.children[(needed - 1) as usize])?;
            self.trim_inner(child, last_first, keep)?;
        }
        Ok(())
    }

    /// While the root is an inner node with a single child, pull that
    /// child's content up into the root block and drop the child.
    fn collapse_root(&self) -> FsResult<()> {
        loop {
            let root = self.load_root()?;
            let DataNode::Inner(inner) = root else {
                return Ok(());
            };
            if inner.children.len() != 1 {
                return Ok(());
            }
            let child_id = inner.children[0];
            let child = self.nodes.load(&child_id)?.ok_or(FsError::NotFound)?;
            match child {
                DataNode::Leaf(leaf) => self.nodes.overwrite_with_leaf(self.root_id, leaf.data)?,
                DataNode::Inner(child_inner) => self.nodes.overwrite_with_inner(
                    self.root_id,
                    child_inner.depth,
                    child_inner.children,
                )?,
            }
            self.nodes.remove(&child_id)?;
        }
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Remove every node of the tree. Leaves are removed without being
    /// loaded; only inner nodes are read for their child lists.
    pub fn remove_all_nodes(&self) -> FsResult<()> {
        let root = self.load_root()?;
        self.remove_subtree(root)
    }

    fn remove_subtree_by_id(&self, id: &BlockId) -> FsResult<()> {
        let node = self.nodes.load(id)?.ok_or(FsError::NotFound)?;
        self.remove_subtree(node)
    }

    fn remove_subtree(&self, node: DataNode) -> FsResult<()> {
        match node {
            DataNode::Leaf(leaf) => self.nodes.remove(&leaf.id),
            DataNode::Inner(inner) => {
                for child in &inner.children {
                    if inner.depth == 1 {
                        self.nodes.remove(child)?;
                    } else {
                        self.remove_subtree_by_id(child)?;
                    }
                }
                self.nodes.remove(&inner.id)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockstore::inmemory::InMemoryBlockStore;

    // Small nodes: 53 bytes usable => max_bytes_per_leaf = 48,
    // max_children_per_inner_node = 3.
    fn small_store() -> DataNodeStore<InMemoryBlockStore> {
        DataNodeStore::new(InMemoryBlockStore::new(), 53).unwrap()
    }

    fn new_tree(store: &DataNodeStore<InMemoryBlockStore>) -> BlockId {
        store.create_leaf(Vec::new()).unwrap().id
    }

    #[test]
    fn small_layout_geometry() {
        let store = small_store();
        assert_eq!(store.layout().max_bytes_per_leaf(), 48);
        assert_eq!(store.layout().max_children_per_inner_node(), 3);
    }

    #[test]
    fn empty_tree_has_size_zero() {
        let store = small_store();
        let root = new_tree(&store);
        assert_eq!(DataTree::new(&store, root).size().unwrap(), 0);
    }

    #[test]
    fn single_leaf_write_and_read() {
        let store = small_store();
        let root = new_tree(&store);
        let tree = DataTree::new(&store, root);
        tree.write(0, b"hello").unwrap();
        assert_eq!(tree.size().unwrap(), 5);
        let mut buf = [0u8; 5];
        tree.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        // Root stayed a leaf.
        assert!(matches!(
            store.load(&root).unwrap().unwrap(),
            DataNode::Leaf(_)
        ));
    }

    #[test]
    fn growth_promotes_root_in_place() {
        let store = small_store();
        let root = new_tree(&store);
        let tree = DataTree::new(&store, root);
        let max_leaf = store.layout().max_bytes_per_leaf();
        tree.write(0, &vec![7u8; max_leaf as usize]).unwrap();
        assert!(matches!(
            store.load(&root).unwrap().unwrap(),
            DataNode::Leaf(_)
        ));
        tree.write(max_leaf, b"x").unwrap();
        // Same root id, now an inner node with two leaves.
        match store.load(&root).unwrap().unwrap() {
            DataNode::Inner(inner) => {
                assert_eq!(inner.depth, 1);
                assert_eq!(inner.children.len(), 2);
            }
            other => panic!("expected promoted root, got {other:?}"),
        }
        assert_eq!(tree.size().unwrap(), max_leaf + 1);
        let mut buf = [0u8; 1];
        tree.read(max_leaf, &mut buf).unwrap();
        assert_eq!(&buf, b"x");
    }

    #[test]
    fn write_read_roundtrip_across_many_leaves() {
        let store = small_store();
        let root = new_tree(&store);
        let tree = DataTree::new(&store, root);
        // 3 levels: > 9 leaves worth of data
        let data: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
        tree.write(0, &data).unwrap();
        assert_eq!(tree.size().unwrap(), 600);
        let mut buf = vec![0u8; 600];
        tree.read(0, &mut buf).unwrap();
        assert_eq!(buf, data);
        // Unaligned inner reads
        let mut buf = vec![0u8; 100];
        tree.read(37, &mut buf).unwrap();
        assert_eq!(buf, data[37..137]);
    }

    #[test]
    fn sparse_write_reads_zeros_in_gap() {
        let store = small_store();
        let root = new_tree(&store);
        let tree = DataTree::new(&store, root);
        tree.write(0, b"start").unwrap();
        tree.write(200, b"end").unwrap();
        assert_eq!(tree.size().unwrap(), 203);
        let mut buf = vec![0u8; 203];
        tree.read(0, &mut buf).unwrap();
        assert_eq!(&buf[0..5], b"start");
        assert!(buf[5..200].iter().all(|&b| b == 0));
        assert_eq!(&buf[200..], b"end");
    }

    #[test]
    fn overwrite_in_the_middle_keeps_rest() {
        let store = small_store();
        let root = new_tree(&store);
        let tree = DataTree::new(&store, root);
        let data = vec![1u8; 300];
        tree.write(0, &data).unwrap();
        tree.write(100, &[2u8; 50]).unwrap();
        let mut buf = vec![0u8; 300];
        tree.read(0, &mut buf).unwrap();
        assert!(buf[..100].iter().all(|&b| b == 1));
        assert!(buf[100..150].iter().all(|&b| b == 2));
        assert!(buf[150..].iter().all(|&b| b == 1));
        assert_eq!(tree.size().unwrap(), 300);
    }

    #[test]
    fn read_past_end_fails_but_try_read_clamps() {
        let store = small_store();
        let root = new_tree(&store);
        let tree = DataTree::new(&store, root);
        tree.write(0, b"0123456789").unwrap();
        let mut buf = [0u8; 8];
        assert!(tree.read(5, &mut buf).is_err());
        assert_eq!(tree.try_read(5, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"56789");
    }

    #[test]
    fn resize_grow_zero_fills() {
        let store = small_store();
        let root = new_tree(&store);
        let tree = DataTree::new(&store, root);
        tree.write(0, b"abc").unwrap();
        tree.resize(250).unwrap();
        assert_eq!(tree.size().unwrap(), 250);
        let mut buf = vec![0u8; 250];
        tree.read(0, &mut buf).unwrap();
        assert_eq!(&buf[..3], b"abc");
        assert!(buf[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn resize_shrink_preserves_prefix_and_frees_nodes() {
        let store = small_store();
        let root = new_tree(&store);
        let tree = DataTree::new(&store, root);
        let data: Vec<u8> = (0..255u8).collect();
        tree.write(0, &data).unwrap();
        let nodes_before = store.num_nodes().unwrap();
        tree.resize(10).unwrap();
        assert_eq!(tree.size().unwrap(), 10);
        let mut buf = [0u8; 10];
        tree.read(0, &mut buf).unwrap();
        assert_eq!(&buf, &data[..10]);
        assert!(store.num_nodes().unwrap() < nodes_before);
        // Fits a single leaf again: the tree collapsed back to a leaf root.
        assert!(matches!(
            store.load(&root).unwrap().unwrap(),
            DataNode::Leaf(_)
        ));
    }

    #[test]
    fn resize_to_zero_keeps_one_empty_leaf() {
        let store = small_store();
        let root = new_tree(&store);
        let tree = DataTree::new(&store, root);
        tree.write(0, &vec![1u8; 400]).unwrap();
        tree.resize(0).unwrap();
        assert_eq!(tree.size().unwrap(), 0);
        assert_eq!(store.num_nodes().unwrap(), 1);
    }

    #[test]
    fn shrink_then_grow_reads_zeros() {
        let store = small_store();
        let root = new_tree(&store);
        let tree = DataTree::new(&store, root);
        tree.write(0, &vec![9u8; 200]).unwrap();
        tree.resize(50).unwrap();
        tree.resize(200).unwrap();
        let mut buf = vec![0u8; 200];
        tree.read(0, &mut buf).unwrap();
        assert!(buf[..50].iter().all(|&b| b == 9));
        assert!(buf[50..].iter().all(|&b| b == 0));
    }

    #[test]
    fn remove_all_nodes_frees_every_block() {
        let store = small_store();
        let root = new_tree(&store);
        let tree = DataTree::new(&store, root);
        tree.write(0, &vec![1u8; 500]).unwrap();
        assert!(store.num_nodes().unwrap() > 1);
        tree.remove_all_nodes().unwrap();
        assert_eq!(store.num_nodes().unwrap(), 0);
    }

    #[test]
    fn leaf_sizes_follow_the_rightmost_invariant() {
        let store = small_store();
        let root = new_tree(&store);
        let tree = DataTree::new(&store, root);
        let max_leaf = store.layout().max_bytes_per_leaf();
        tree.write(0, &vec![1u8; (2 * max_leaf + 10) as usize]).unwrap();
        // Interior leaves full, last leaf holds the remainder.
        match store.load(&root).unwrap().unwrap() {
            DataNode::Inner(inner) => {
                assert_eq!(inner.children.len(), 3);
                for (i, child) in inner.children.iter().enumerate() {
                    match store.load(child).unwrap().unwrap() {
                        DataNode::Leaf(leaf) => {
                            let expected = if i < 2 { max_leaf } else { 10 };
                            assert_eq!(leaf.data.len() as u64, expected, "leaf {i}");
                        }
                        other => panic!("expected leaf, got {other:?}"),
                    }
                }
            }
            other => panic!("expected inner root, got {other:?}"),
        }
    }
}
