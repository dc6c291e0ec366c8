//! Directory blobs.
//!
//! A directory blob keeps its entry list in memory and serializes it back
//! into the underlying blob on flush. Mutations only touch memory until
//! then; dropping an unflushed directory flushes it as a safety net.

use crate::blockstore::BlockStore;
use crate::core::{BlockId, FsResult, Timespec};
use crate::fsblobstore::dir_entries::{AtimeUpdateBehavior, DirEntry, DirEntryList};
use crate::fsblobstore::fsblob::{BlobKind, FsBlob};

/// A loaded directory.
pub struct DirBlob<B: BlockStore + 'static> {
    // Consumed on removal; present for the whole normal lifetime.
    blob: Option<FsBlob<B>>,
    entries: DirEntryList,
    dirty: bool,
}

impl<B: BlockStore + 'static> DirBlob<B> {
    /// Wrap a freshly initialized (empty) dir blob.
    pub(crate) fn new_empty(blob: FsBlob<B>) -> Self {
        Self {
            blob: Some(blob),
            entries: DirEntryList::new(),
            dirty: false,
        }
    }

    /// Parse the entry list of an existing dir blob.
    pub(crate) fn load(blob: FsBlob<B>) -> FsResult<Self> {
        let payload = blob.read_payload_all()?;
        Ok(Self {
            blob: Some(blob),
            entries: DirEntryList::deserialize(&payload)?,
            dirty: false,
        })
    }

    fn blob(&self) -> &FsBlob<B> {
        self.blob.as_ref().expect("blob present until consumed")
    }

    pub(crate) fn into_fsblob(mut self) -> FsBlob<B> {
        self.blob.take().expect("blob present until consumed")
    }

    /// Blob id of this directory.
    pub fn id(&self) -> BlockId {
        self.blob().id()
    }

    /// Containing directory's blob id; null for the root.
    pub fn parent(&self) -> BlockId {
        self.blob().parent()
    }

    /// Re-point the parent reference.
    pub fn set_parent(&mut self, parent: BlockId) -> FsResult<()> {
        self.blob
            .as_mut()
            .expect("blob present until consumed")
            .set_parent(parent)
    }

    /// Serialize pending entry changes into the blob. The bytes land in
    /// the write-back cache; pushing them to the backend is fsync's job.
    pub fn flush(&mut self) -> FsResult<()> {
        if self.dirty {
            let serialized = self.entries.serialize();
            let blob = self.blob();
            blob.resize_payload(serialized.len() as u64)?;
            blob.write_payload(0, &serialized)?;
            self.dirty = false;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Entry access
    // ------------------------------------------------------------------

    /// Number of entries.
    pub fn num_children(&self) -> usize {
        self.entries.len()
    }

    /// Is the directory empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in stored order.
    pub fn entries(&self) -> &[DirEntry] {
        self.entries.entries()
    }

    /// Look up by name.
    pub fn get_child(&self, name: &str) -> Option<&DirEntry> {
        self.entries.get(name)
    }

    /// Look up by child blob id.
    pub fn get_child_by_id(&self, id: &BlockId) -> Option<&DirEntry> {
        self.entries.get_by_id(id)
    }

    // ------------------------------------------------------------------
    // Entry mutation
    // ------------------------------------------------------------------

    /// Add an entry for a new child.
    pub fn add_child(
        &mut self,
        name: &str,
        id: BlockId,
        kind: BlobKind,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> FsResult<()> {
        self.entries.add(name, id, kind, mode, uid, gid)?;
        self.dirty = true;
        Ok(())
    }

    /// Move a complete entry in (from another directory), keeping its
    /// metadata.
    pub fn insert_child(&mut self, entry: DirEntry) -> FsResult<()> {
        self.entries.insert(entry)?;
        self.dirty = true;
        Ok(())
    }

    /// Remove the entry called `name`; returns it.
    pub fn remove_child_by_name(&mut self, name: &str) -> FsResult<DirEntry> {
        let entry = self.entries.remove_by_name(name)?;
        self.dirty = true;
        Ok(entry)
    }

    /// Remove the entry for child `id`; returns it.
    pub fn remove_child_by_id(&mut self, id: &BlockId) -> FsResult<DirEntry> {
        let entry = self.entries.remove_by_id(id)?;
        self.dirty = true;
        Ok(entry)
    }

    /// Rename a child within this directory (see
    /// [`DirEntryList::rename`] for the overwrite rules).
    pub fn rename_child(
        &mut self,
        id: &BlockId,
        new_name: &str,
        on_overwritten: &mut dyn FnMut(&BlockId) -> FsResult<()>,
    ) -> FsResult<()> {
        self.entries.rename(id, new_name, on_overwritten)?;
        self.dirty = true;
        Ok(())
    }

    /// chmod on a child entry.
    pub fn set_mode_of_child(&mut self, id: &BlockId, mode: u32) -> FsResult<()> {
        self.entries.set_mode(id, mode)?;
        self.dirty = true;
        Ok(())
    }

    /// chown on a child entry.
    pub fn set_uid_gid_of_child(
        &mut self,
        id: &BlockId,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> FsResult<()> {
        self.entries.set_uid_gid(id, uid, gid)?;
        self.dirty = true;
        Ok(())
    }

    /// utimens on a child entry.
    pub fn set_access_times_of_child(
        &mut self,
        id: &BlockId,
        atime: Option<Timespec>,
        mtime: Option<Timespec>,
    ) -> FsResult<()> {
        self.entries.set_access_times(id, atime, mtime)?;
        self.dirty = true;
        Ok(())
    }

    /// atime bump after a read; no-op under `noatime` or a fresh relatime
    /// timestamp.
    pub fn update_access_timestamp_of_child(
        &mut self,
        id: &BlockId,
        behavior: AtimeUpdateBehavior,
    ) -> FsResult<()> {
        if self.entries.update_access_timestamp(id, behavior)? {
            self.dirty = true;
        }
        Ok(())
    }

    /// mtime/ctime bump after a content write.
    pub fn update_modification_timestamp_of_child(&mut self, id: &BlockId) -> FsResult<()> {
        self.entries.update_modification_timestamp(id)?;
        self.dirty = true;
        Ok(())
    }
}

impl<B: BlockStore + 'static> Drop for DirBlob<B> {
    fn drop(&mut self) {
        if self.blob.is_some() && self.dirty {
            if let Err(e) = self.flush() {
                log::error!("failed to flush directory blob on drop: {e}");
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
    use crate::blobstore::BlobStore;
    use crate::blockstore::inmemory::InMemoryBlockStore;
    use crate::fsblobstore::FsBlobStore;

    fn fs_blob_store() -> FsBlobStore<InMemoryBlockStore> {
        FsBlobStore::new(BlobStore::new(InMemoryBlockStore::new(), 512).unwrap())
    }

    #[test]
    fn fresh_dir_is_empty() {
        let store = fs_blob_store();
        let dir = store.create_dir_blob(&BlockId::null()).unwrap();
        assert!(dir.is_empty());
        assert_eq!(dir.num_children(), 0);
    }

    #[test]
    fn entries_survive_flush_and_reload() {
        let store = fs_blob_store();
        let mut dir = store.create_dir_blob(&BlockId::null()).unwrap();
        let child_id = BlockId::random();
        dir.add_child("file.txt", child_id, BlobKind::File, 0o644, 1000, 1000)
            .unwrap();
        dir.flush().unwrap();
        let id = dir.id();
        drop(dir);

        let reloaded = store.load(&id).unwrap().unwrap().into_dir().unwrap();
        let entry = reloaded.get_child("file.txt").unwrap();
        assert_eq!(entry.block_id, child_id);
        assert_eq!(entry.mode, 0o644);
    }

    #[test]
    fn drop_flushes_dirty_entries() {
        let store = fs_blob_store();
        let mut dir = store.create_dir_blob(&BlockId::null()).unwrap();
        let id = dir.id();
        dir.add_child("a", BlockId::random(), BlobKind::File, 0o644, 0, 0)
            .unwrap();
        drop(dir); // no explicit flush

        let reloaded = store.load(&id).unwrap().unwrap().into_dir().unwrap();
        assert_eq!(reloaded.num_children(), 1);
    }
}
