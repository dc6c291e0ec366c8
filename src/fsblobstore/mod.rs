//! Filesystem blob layer: directories, files and symlinks on blobs.
//!
//! Every filesystem node is one blob with an fs-header (kind + parent
//! pointer). A per-blob-id lock pool serializes loads: at most one live
//! handle per blob exists at any time, and a second `load` of the same id
//! blocks until the first handle is dropped.

pub mod dir_blob;
pub mod dir_entries;
pub mod file_blob;
pub mod fsblob;
pub mod symlink_blob;

use std::sync::Arc;

use crate::blobstore::BlobStore;
use crate::blockstore::BlockStore;
use crate::cache::lock_pool::LockPool;
use crate::core::{BlockId, FsError, FsResult};

pub use dir_blob::DirBlob;
pub use dir_entries::{AtimeUpdateBehavior, DirEntry, DirEntryList};
pub use file_blob::FileBlob;
pub use fsblob::{BlobKind, FsBlob};
pub use symlink_blob::SymlinkBlob;

// ============================================================================
// AnyFsBlob
// ============================================================================

/// A loaded filesystem blob of whichever kind the header says.
pub enum AnyFsBlob<B: BlockStore + 'static> {
    Dir(DirBlob<B>),
    File(FileBlob<B>),
    Symlink(SymlinkBlob<B>),
}

impl<B: BlockStore + 'static> AnyFsBlob<B> {
    /// Blob id.
    pub fn id(&self) -> BlockId {
        match self {
            AnyFsBlob::Dir(dir) => dir.id(),
            AnyFsBlob::File(file) => file.id(),
            AnyFsBlob::Symlink(link) => link.id(),
        }
    }

    /// Containing directory's blob id.
    pub fn parent(&self) -> BlockId {
        match self {
            AnyFsBlob::Dir(dir) => dir.parent(),
            AnyFsBlob::File(file) => file.parent(),
            AnyFsBlob::Symlink(link) => link.parent(),
        }
    }

    /// Kind tag.
    pub fn kind(&self) -> BlobKind {
        match self {
            AnyFsBlob::Dir(_) => BlobKind::Dir,
            AnyFsBlob::File(_) => BlobKind::File,
            AnyFsBlob::Symlink(_) => BlobKind::Symlink,
        }
    }

    /// Re-point the parent reference.
    pub fn set_parent(&mut self, parent: BlockId) -> FsResult<()> {
        match self {
            AnyFsBlob::Dir(dir) => dir.set_parent(parent),
            AnyFsBlob::File(file) => file.set_parent(parent),
            AnyFsBlob::Symlink(link) => link.set_parent(parent),
        }
    }

    /// Unwrap as directory or fail with `NotADirectory`.
    pub fn into_dir(self) -> FsResult<DirBlob<B>> {
        match self {
            AnyFsBlob::Dir(dir) => Ok(dir),
            _ => Err(FsError::NotADirectory),
        }
    }

    /// Unwrap as file; directories answer `IsADirectory`.
    pub fn into_file(self) -> FsResult<FileBlob<B>> {
        match self {
            AnyFsBlob::File(file) => Ok(file),
            AnyFsBlob::Dir(_) => Err(FsError::IsADirectory),
            AnyFsBlob::Symlink(_) => Err(FsError::Invalid(
                "expected a file, found a symlink".to_string(),
            )),
        }
    }

    /// Unwrap as symlink.
    pub fn into_symlink(self) -> FsResult<SymlinkBlob<B>> {
        match self {
            AnyFsBlob::Symlink(link) => Ok(link),
            AnyFsBlob::Dir(_) => Err(FsError::IsADirectory),
            AnyFsBlob::File(_) => Err(FsError::Invalid(
                "expected a symlink, found a file".to_string(),
            )),
        }
    }

    fn into_fsblob(self) -> FsBlob<B> {
        match self {
            AnyFsBlob::Dir(dir) => dir.into_fsblob(),
            AnyFsBlob::File(file) => file.into_fsblob(),
            AnyFsBlob::Symlink(link) => link.into_fsblob(),
        }
    }
}

// ============================================================================
// FsBlobStore
// ============================================================================

/// Creates, loads and removes filesystem blobs.
pub struct FsBlobStore<B: BlockStore + 'static> {
    blobs: BlobStore<B>,
    locks: Arc<LockPool<BlockId>>,
}

impl<B: BlockStore + 'static> FsBlobStore<B> {
    /// Wrap a blob store.
    pub fn new(blobs: BlobStore<B>) -> Self {
        Self {
            blobs,
            locks: Arc::new(LockPool::new()),
        }
    }

    /// Create an empty directory blob.
    pub fn create_dir_blob(&self, parent: &BlockId) -> FsResult<DirBlob<B>> {
        let blob = self.blobs.create()?;
        let lock = self.locks.lock_owned(blob.id());
        let fsblob = FsBlob::initialize(blob, BlobKind::Dir, *parent, Some(lock))?;
        Ok(DirBlob::new_empty(fsblob))
    }

    /// Create an empty file blob.
    pub fn create_file_blob(&self, parent: &BlockId) -> FsResult<FileBlob<B>> {
        let blob = self.blobs.create()?;
        let lock = self.locks.lock_owned(blob.id());
        let fsblob = FsBlob::initialize(blob, BlobKind::File, *parent, Some(lock))?;
        Ok(FileBlob::new(fsblob))
    }

    /// Create a symlink blob pointing at `target`.
    pub fn create_symlink_blob(&self, parent: &BlockId, target: &str) -> FsResult<SymlinkBlob<B>> {
        let blob = self.blobs.create()?;
        let lock = self.locks.lock_owned(blob.id());
        let fsblob = FsBlob::initialize(blob, BlobKind::Symlink, *parent, Some(lock))?;
        SymlinkBlob::create(fsblob, target)
    }

    /// Load a blob. Blocks while another handle for the same id is alive;
    /// the returned handle holds the per-id lock until dropped.
    pub fn load(&self, id: &BlockId) -> FsResult<Option<AnyFsBlob<B>>> {
        let lock = self.locks.lock_owned(*id);
        let Some(blob) = self.blobs.load(id)? else {
            return Ok(None);
        };
        let fsblob = FsBlob::parse(blob, Some(lock))?;
        Ok(Some(match fsblob.kind() {
            BlobKind::Dir => AnyFsBlob::Dir(DirBlob::load(fsblob)?),
            BlobKind::File => AnyFsBlob::File(FileBlob::new(fsblob)),
            BlobKind::Symlink => AnyFsBlob::Symlink(SymlinkBlob::load(fsblob)?),
        }))
    }

    /// Remove a loaded blob; the per-id lock is held until the blocks are
    /// gone.
    pub fn remove(&self, blob: AnyFsBlob<B>) -> FsResult<()> {
        let (blob, lock) = blob.into_fsblob().into_parts();
        let result = self.blobs.remove(blob);
        drop(lock);
        result
    }

    /// Remove a blob that is not currently loaded, by id.
    pub fn remove_by_id(&self, id: &BlockId) -> FsResult<()> {
        let lock = self.locks.lock_owned(*id);
        let result = self.blobs.remove_by_id(id);
        drop(lock);
        result
    }

    /// Number of blocks underneath.
    pub fn num_blocks(&self) -> FsResult<u64> {
        self.blobs.num_nodes()
    }

    /// Rough free space underneath.
    pub fn estimate_space_for_num_bytes_left(&self) -> FsResult<u64> {
        self.blobs.estimate_space_for_num_bytes_left()
    }

    /// Push all pending writes down to the backend.
    pub fn flush(&self) -> FsResult<()> {
        self.blobs.flush()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockstore::inmemory::InMemoryBlockStore;
    use std::time::Duration;

    fn store() -> FsBlobStore<InMemoryBlockStore> {
        FsBlobStore::new(BlobStore::new(InMemoryBlockStore::new(), 512).unwrap())
    }

    #[test]
    fn load_dispatches_on_kind() {
        let store = store();
        let parent = BlockId::random();
        let dir_id = store.create_dir_blob(&parent).unwrap().id();
        let file_id = store.create_file_blob(&parent).unwrap().id();
        let link_id = store.create_symlink_blob(&parent, "/t").unwrap().id();

        assert!(matches!(
            store.load(&dir_id).unwrap().unwrap(),
            AnyFsBlob::Dir(_)
        ));
        assert!(matches!(
            store.load(&file_id).unwrap().unwrap(),
            AnyFsBlob::File(_)
        ));
        assert!(matches!(
            store.load(&link_id).unwrap().unwrap(),
            AnyFsBlob::Symlink(_)
        ));
    }

    #[test]
    fn load_missing_is_none() {
        let store = store();
        assert!(store.load(&BlockId::random()).unwrap().is_none());
    }

    #[test]
    fn kind_mismatch_unwraps_fail_typed() {
        let store = store();
        let dir_id = store.create_dir_blob(&BlockId::null()).unwrap().id();
        let loaded = store.load(&dir_id).unwrap().unwrap();
        assert!(matches!(loaded.into_file(), Err(FsError::IsADirectory)));
        let loaded = store.load(&dir_id).unwrap().unwrap();
        assert!(matches!(
            loaded.into_symlink(),
            Err(FsError::IsADirectory)
        ));
    }

    #[test]
    fn remove_frees_blocks() {
        let store = store();
        let file = store.create_file_blob(&BlockId::null()).unwrap();
        file.write(0, &[1u8; 2000]).unwrap();
        let id = file.id();
        drop(file);
        assert!(store.num_blocks().unwrap() > 0);
        let loaded = store.load(&id).unwrap().unwrap();
        store.remove(loaded).unwrap();
        assert_eq!(store.num_blocks().unwrap(), 0);
        assert!(store.load(&id).unwrap().is_none());
    }

    #[test]
    fn concurrent_loads_of_same_blob_serialize() {
        let store = Arc::new(store());
        let file = store.create_file_blob(&BlockId::null()).unwrap();
        file.write(0, b"shared").unwrap();
        let id = file.id();
        drop(file);

        let first = store.load(&id).unwrap().unwrap();
        let loader = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                // Blocks until `first` is dropped.
                let blob = store.load(&id).unwrap().unwrap();
                blob.id()
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(!loader.is_finished());
        drop(first);
        assert_eq!(loader.join().unwrap(), id);
    }
}
