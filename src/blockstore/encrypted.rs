//! Encrypting block store layer.
//!
//! Each block is sealed individually with the filesystem's cipher; the
//! block id is bound as associated data, so a ciphertext moved to another
//! id fails authentication even though the id is not part of the stored
//! bytes. Stored layout: `format_version:u16 LE | sealed`.

use crate::blockstore::BlockStore;
use crate::core::{BlockId, FsError, FsResult};
use crate::crypto::{CipherSuite, EncryptionKey};

/// Version of the on-disk block format written by this layer.
const FORMAT_VERSION: u16 = 1;

/// Length of the format version header.
const HEADER_LEN: usize = 2;

/// Block store encrypting every block with one filesystem-wide key.
pub struct EncryptedBlockStore<B> {
    base: B,
    suite: CipherSuite,
    key: EncryptionKey,
}

impl<B: BlockStore> EncryptedBlockStore<B> {
    /// Wrap `base`, sealing all blocks with `suite` under `key`.
    pub fn new(base: B, suite: CipherSuite, key: EncryptionKey) -> FsResult<Self> {
        if key.len() != suite.key_len() {
            return Err(FsError::WrongFormat(format!(
                "cipher {} needs a {}-byte key, got {} bytes",
                suite.name(),
                suite.key_len(),
                key.len()
            )));
        }
        Ok(Self { base, suite, key })
    }

    fn seal(&self, id: &BlockId, plaintext: &[u8]) -> FsResult<Vec<u8>> {
        let sealed = self
            .suite
            .seal(&self.key, plaintext, id.as_bytes())
            .ok_or_else(|| FsError::WrongFormat("encryption failed".to_string()))?;
        let mut out = Vec::with_capacity(HEADER_LEN + sealed.len());
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn open(&self, id: &BlockId, stored: &[u8]) -> FsResult<Vec<u8>> {
        if stored.len() < HEADER_LEN {
            return Err(FsError::WrongFormat(format!(
                "block {id} too short for a format header"
            )));
        }
        let version = u16::from_le_bytes(stored[..HEADER_LEN].try_into().expect("len checked"));
        if version != FORMAT_VERSION {
            return Err(FsError::WrongFormat(format!(
                "block {id} has unknown format version {version}"
            )));
        }
        self.suite
            .open(&self.key, &stored[HEADER_LEN..], id.as_bytes())
            .ok_or(FsError::DecryptionFailed { block_id: *id })
    }
}

impl<B: BlockStore> BlockStore for EncryptedBlockStore<B> {
    fn try_create(&self, id: &BlockId, data: &[u8]) -> FsResult<bool> {
        let sealed = self.seal(id, data)?;
        self.base.try_create(id, &sealed)
    }

    fn store(&self, id: &BlockId, data: &[u8]) -> FsResult<()> {
        let sealed = self.seal(id, data)?;
        self.base.store(id, &sealed)
    }

    fn load(&self, id: &BlockId) -> FsResult<Option<Vec<u8>>> {
        match self.base.load(id)? {
            None => Ok(None),
            Some(stored) => self.open(id, &stored).map(Some),
        }
    }

    fn remove(&self, id: &BlockId) -> FsResult<bool> {
        self.base.remove(id)
    }

    fn num_blocks(&self) -> FsResult<u64> {
        self.base.num_blocks()
    }

    fn estimate_num_free_bytes(&self) -> FsResult<u64> {
        self.base.estimate_num_free_bytes()
    }

    fn block_size_from_physical_block_size(&self, physical: u64) -> FsResult<u64> {
        let below = self.base.block_size_from_physical_block_size(physical)?;
        let overhead = (HEADER_LEN + self.suite.overhead()) as u64;
        below.checked_sub(overhead).ok_or_else(|| {
            FsError::Invalid(format!(
                "physical block size {physical} is too small for the encryption overhead"
            ))
        })
    }

    fn for_each_block(&self, callback: &mut dyn FnMut(&BlockId) -> FsResult<()>) -> FsResult<()> {
        self.base.for_each_block(callback)
    }

    fn flush(&self) -> FsResult<()> {
        self.base.flush()
    }
}

// ============================================================================
// Tests
// ============================================================================
