//! File blobs: the fs-header followed by raw file bytes.

use crate::blockstore::BlockStore;
use crate::core::{BlockId, FsResult};
use crate::fsblobstore::fsblob::FsBlob;

/// A loaded regular file.
pub struct FileBlob<B: BlockStore + 'static> {
    blob: FsBlob<B>,
}

impl<B: BlockStore + 'static> FileBlob<B> {
    pub(crate) fn new(blob: FsBlob<B>) -> Self {
        Self { blob }
    }

    pub(crate) fn into_fsblob(self) -> FsBlob<B> {
        self.blob
    }

    /// Blob id of this file.
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

    /// Logical file size.
    pub fn size(&self) -> FsResult<u64> {
        self.blob.payload_size()
    }

    /// Read up to `target.len()` bytes at `offset`; short reads at EOF.
    pub fn read(&self, offset: u64, target: &mut [u8]) -> FsResult<usize> {
        self.blob.try_read_payload(offset, target)
    }

    /// Write at `offset`, growing the file (zero gap) as needed.
    pub fn write(&self, offset: u64, source: &[u8]) -> FsResult<()> {
        self.blob.write_payload(offset, source)
    }

    /// truncate/ftruncate.
    pub fn resize(&self, new_size: u64) -> FsResult<()> {
        self.blob.resize_payload(new_size)
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
    fn fresh_file_is_empty() {
        let store = fs_blob_store();
        let file = store.create_file_blob(&BlockId::random()).unwrap();
        assert_eq!(file.size().unwrap(), 0);
    }

    #[test]
    fn write_read_roundtrip_across_reload() {
        let store = fs_blob_store();
        let parent = BlockId::random();
        let file = store.create_file_blob(&parent).unwrap();
        let id = file.id();
        file.write(0, b"file contents").unwrap();
        drop(file);

        let file = store.load(&id).unwrap().unwrap().into_file().unwrap();
        assert_eq!(file.size().unwrap(), 13);
        assert_eq!(file.parent(), parent);
        let mut buf = [0u8; 13];
        assert_eq!(file.read(0, &mut buf).unwrap(), 13);
        assert_eq!(&buf, b"file contents");
    }

    #[test]
    fn read_at_eof_is_short() {
        let store = fs_blob_store();
        let file = store.create_file_blob(&BlockId::random()).unwrap();
        file.write(0, b"short").unwrap();
        let mut buf = [0u8; 10];
        assert_eq!(file.read(3, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"rt");
        assert_eq!(file.read(99, &mut buf).unwrap(), 0);
    }

    #[test]
    fn truncate_and_sparse_write() {
        let store = fs_blob_store();
        let file = store.create_file_blob(&BlockId::random()).unwrap();
        file.write(1000, b"tail").unwrap();
        assert_eq!(file.size().unwrap(), 1004);
        let mut buf = [0u8; 4];
        file.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 4]);
        file.resize(2).unwrap();
        assert_eq!(file.size().unwrap(), 2);
    }
}
