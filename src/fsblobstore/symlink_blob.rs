//! Symlink blobs: the fs-header followed by the target path bytes.

use crate::blockstore::BlockStore;
use crate::core::{BlockId, FsError, FsResult};
use crate::fsblobstore::fsblob::FsBlob;

/// A loaded symlink. The target is read once at load time.
pub struct SymlinkBlob<B: BlockStore + 'static> {
    blob: FsBlob<B>,
    target: String,
}

impl<B: BlockStore + 'static> SymlinkBlob<B> {
    pub(crate) fn create(blob: FsBlob<B>, target: &str) -> FsResult<Self> {
        blob.write_payload(0, target.as_bytes())?;
        Ok(Self {
            blob,
            target: target.to_string(),
        })
    }

    pub(crate) fn load(blob: FsBlob<B>) -> FsResult<Self> {
        let payload = blob.read_payload_all()?;
        let target = String::from_utf8(payload).map_err(|_| {
            FsError::WrongFormat(format!("symlink {} target is not UTF-8", blob.id()))
        })?;
        Ok(Self { blob, target })
    }

    pub(crate) fn into_fsblob(self) -> FsBlob<B> {
        self.blob
    }

    /// Blob id of this symlink.
    pub fn id(&self) -> BlockId {
        self.blob.id()
    }

    /// Containing directory's blob id.
    pub fn parent(&self) -> BlockId {
        self.blob.parent()
    }

    /// Re-point the parent reference.
    pub fn set_parent(&mut self, parent: BlockId) -> FsResult<()> {
        self.blob.set_parent(parent)
    }

    /// The link target path.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Flush down to the backend.
    pub fn flush(&self) -> FsResult<()> {
        self.blob.flush()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use crate::blobstore::BlobStore;
    use crate::blockstore::inmemory::InMemoryBlockStore;
    use crate::core::BlockId;
    use crate::fsblobstore::FsBlobStore;

    fn fs_blob_store() -> FsBlobStore<InMemoryBlockStore> {
        FsBlobStore::new(BlobStore::new(InMemoryBlockStore::new(), 512).unwrap())
    }

    #[test]
    fn target_survives_reload() {
        let store = fs_blob_store();
        let link = store
            .create_symlink_blob(&BlockId::random(), "/some/where/else")
            .unwrap();
        let id = link.id();
        drop(link);

        let link = store.load(&id).unwrap().unwrap().into_symlink().unwrap();
        assert_eq!(link.target(), "/some/where/else");
    }

    #[test]
    fn relative_target() {
        let store = fs_blob_store();
        let link = store
            .create_symlink_blob(&BlockId::random(), "../sibling")
            .unwrap();
        assert_eq!(link.target(), "../sibling");
    }
}
