//! Test helpers for block store layers: a cloneable wrapper that counts
//! operations, so tests can assert how often a layer hit its backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::blockstore::BlockStore;
use crate::core::{BlockId, FsResult};

/// Cloneable block store wrapper counting loads, stores and removes.
pub(crate) struct TrackingBlockStore<B> {
    inner: Arc<TrackingInner<B>>,
}

struct TrackingInner<B> {
    base: B,
    loads: AtomicU64,
    stores: AtomicU64,
    removes: AtomicU64,
}

impl<B> Clone for TrackingBlockStore<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: BlockStore> TrackingBlockStore<B> {
    pub fn new(base: B) -> Self {
        Self {
            inner: Arc::new(TrackingInner {
                base,
                loads: AtomicU64::new(0),
                stores: AtomicU64::new(0),
                removes: AtomicU64::new(0),
            }),
        }
    }

    pub fn loads(&self) -> u64 {
        self.inner.loads.load(Ordering::SeqCst)
    }

    pub fn stores(&self) -> u64 {
        self.inner.stores.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> u64 {
        self.inner.removes.load(Ordering::SeqCst)
    }

    pub fn reset_counts(&self) {
        self.inner.loads.store(0, Ordering::SeqCst);
        self.inner.stores.store(0, Ordering::SeqCst);
        self.inner.removes.store(0, Ordering::SeqCst);
    }
}

impl<B: BlockStore> BlockStore for TrackingBlockStore<B> {
    fn try_create(&self, id: &BlockId, data: &[u8]) -> FsResult<bool> {
        self.inner.stores.fetch_add(1, Ordering::SeqCst);
        self.inner.base.try_create(id, data)
    }

    fn store(&self, id: &BlockId, data: &[u8]) -> FsResult<()> {
        self.inner.stores.fetch_add(1, Ordering::SeqCst);
        self.inner.base.store(id, data)
    }

    fn load(&self, id: &BlockId) -> FsResult<Option<Vec<u8>>> {
        self.inner.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.base.load(id)
    }

    fn remove(&self, id: &BlockId) -> FsResult<bool> {
        self.inner.removes.fetch_add(1, Ordering::SeqCst);
        self.inner.base.remove(id)
    }

    fn num_blocks(&self) -> FsResult<u64> {
        self.inner.base.num_blocks()
    }

    fn estimate_num_free_bytes(&self) -> FsResult<u64> {
        self.inner.base.estimate_num_free_bytes()
    }

    fn block_size_from_physical_block_size(&self, physical: u64) -> FsResult<u64> {
        self.inner.base.block_size_from_physical_block_size(physical)
    }

    fn for_each_block(&self, callback: &mut dyn FnMut(&BlockId) -> FsResult<()>) -> FsResult<()> {
        self.inner.base.for_each_block(callback)
    }

    fn flush(&self) -> FsResult<()> {
        self.inner.base.flush()
    }
}
