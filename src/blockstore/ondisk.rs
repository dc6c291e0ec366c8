//! On-disk block store: one file per block in a host directory.
//!
//! The file for a block lives at `<basedir>/<p>/<rest>` where `p` is the
//! first two hex characters of the block id and `rest` the remaining 30,
//! so no single directory accumulates millions of entries. Writes go to a
//! temporary file in the same subdirectory and are moved into place with a
//! rename, so a block file is never observed half-written.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rand::RngCore;

use crate::blockstore::BlockStore;
use crate::core::types::BLOCK_ID_HEX_LEN;
use crate::core::{BlockId, FsResult};

/// Length of the sharding prefix in hex characters.
const PREFIX_LEN: usize = 2;

/// Block store persisting each block as a file.
pub struct OnDiskBlockStore {
    base_dir: PathBuf,
}

impl OnDiskBlockStore {
    /// Open a store rooted at `base_dir`; the directory is created if
    /// missing.
    pub fn new(base_dir: PathBuf) -> FsResult<Self> {
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Directory the store persists into.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn block_path(&self, id: &BlockId) -> PathBuf {
        let hex = id.to_hex();
        self.base_dir.join(&hex[..PREFIX_LEN]).join(&hex[PREFIX_LEN..])
    }

    /// Write `data` to a fresh temp file next to `target` and rename it
    /// into place.
    fn write_atomically(target: &Path, data: &[u8]) -> FsResult<()> {
        let dir = target.parent().expect("block path has a parent");
        fs::create_dir_all(dir)?;
        let tmp = dir.join(format!(".tmp.{:08x}", rand::thread_rng().next_u32()));
        let result = (|| -> io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_data()?;
            fs::rename(&tmp, target)
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result.map_err(Into::into)
    }

    fn parse_block_file(prefix: &str, file_name: &str) -> Option<BlockId> {
        if prefix.len() != PREFIX_LEN || file_name.len() != BLOCK_ID_HEX_LEN - PREFIX_LEN {
            return None;
        }
        BlockId::from_hex(&format!("{prefix}{file_name}")).ok()
    }
}

impl BlockStore for OnDiskBlockStore {
    fn try_create(&self, id: &BlockId, data: &[u8]) -> FsResult<bool> {
        let path = self.block_path(id);
        if path.exists() {
            return Ok(false);
        }
        Self::write_atomically(&path, data)?;
        Ok(true)
    }

    fn store(&self, id: &BlockId, data: &[u8]) -> FsResult<()> {
        Self::write_atomically(&self.block_path(id), data)
    }

    fn load(&self, id: &BlockId) -> FsResult<Option<Vec<u8>>> {
        match fs::read(self.block_path(id)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, id: &BlockId) -> FsResult<bool> {
        match fs::remove_file(self.block_path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn num_blocks(&self) -> FsResult<u64> {
        let mut count = 0u64;
        self.for_each_block(&mut |_| {
            count += 1;
            Ok(())
        })?;
        Ok(count)
    }

    #[cfg(unix)]
    fn estimate_num_free_bytes(&self) -> FsResult<u64> {
        use std::os::unix::ffi::OsStrExt;
        let path = std::ffi::CString::new(self.base_dir.as_os_str().as_bytes())
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        // SAFETY: statvfs writes into the zeroed out-param on success only.
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(path.as_ptr(), &mut stat) };
        if rc != 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
    }

    #[cfg(not(unix))]
    fn estimate_num_free_bytes(&self) -> FsResult<u64> {
        Ok(0)
    }

    fn block_size_from_physical_block_size(&self, physical: u64) -> FsResult<u64> {
        Ok(physical)
    }

    fn for_each_block(&self, callback: &mut dyn FnMut(&BlockId) -> FsResult<()>) -> FsResult<()> {
        let top = match fs::read_dir(&self.base_dir) {
            Ok(iter) => iter,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in top {
            let entry = entry?;
            let prefix = entry.file_name();
            let Some(prefix) = prefix.to_str().map(str::to_string) else {
                continue;
            };
            if prefix.len() != PREFIX_LEN || !entry.path().is_dir() {
                continue; // config file or other foreign content
            }
            let sub = match fs::read_dir(entry.path()) {
                Ok(iter) => iter,
                // Tolerate concurrent removal of a whole shard.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for file in sub {
                let file = file?;
                let name = file.file_name();
                let Some(name) = name.to_str() else { continue };
                if let Some(id) = Self::parse_block_file(&prefix, name) {
                    callback(&id)?;
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
