//! In-memory block store, the test backend for the upper layers.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::blockstore::BlockStore;
use crate::core::{BlockId, FsResult};

/// Block store holding all blocks in a hash map.
pub struct InMemoryBlockStore {
    blocks: Mutex<HashMap<BlockId, Vec<u8>>>,
}

impl InMemoryBlockStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            blocks: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryBlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore for InMemoryBlockStore {
    fn try_create(&self, id: &BlockId, data: &[u8]) -> FsResult<bool> {
        let mut blocks = self.blocks.lock();
        if blocks.contains_key(id) {
            return Ok(false);
        }
        blocks.insert(*id, data.to_vec());
        Ok(true)
    }

    fn store(&self, id: &BlockId, data: &[u8]) -> FsResult<()> {
        self.blocks.lock().insert(*id, data.to_vec());
        Ok(())
    }

    fn load(&self, id: &BlockId) -> FsResult<Option<Vec<u8>>> {
        Ok(self.blocks.lock().get(id).cloned())
    }

    fn remove(&self, id: &BlockId) -> FsResult<bool> {
        Ok(self.blocks.lock().remove(id).is_some())
    }

    fn num_blocks(&self) -> FsResult<u64> {
        Ok(self.blocks.lock().len() as u64)
    }

    fn estimate_num_free_bytes(&self) -> FsResult<u64> {
        // Memory-backed; report a generous bound instead of probing the
        // allocator.
        Ok(u64::MAX / 2)
    }

    fn block_size_from_physical_block_size(&self, physical: u64) -> FsResult<u64> {
        Ok(physical)
    }

    fn for_each_block(&self, callback: &mut dyn FnMut(&BlockId) -> FsResult<()>) -> FsResult<()> {
        let ids: Vec<BlockId> = self.blocks.lock().keys().copied().collect();
        for id in &ids {
            callback(id)?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockstore::store_tests;

    #[test]
    fn behaves_like_a_block_store() {
        store_tests::all(|| Box::new(InMemoryBlockStore::new()));
    }
}
