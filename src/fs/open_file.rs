//! The per-device open-file table.
//!
//! Handles are plain monotonically increasing integers. An entry records
//! which file blob a handle refers to and with which access mode; the
//! blob itself is loaded per operation, so an open handle never holds the
//! per-blob lock between calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::core::{BlockId, FsError, FsResult};
use crate::fs::OpenFlags;

/// One open file handle's state.
#[derive(Clone, Copy, Debug)]
pub struct OpenFile {
    /// The file blob
    pub file_id: BlockId,
    /// Directory blob holding the file's entry (for timestamp updates)
    pub parent_id: BlockId,
    /// Access mode
    pub flags: OpenFlags,
}

/// Handle table of a device.
pub struct OpenFileList {
    files: Mutex<HashMap<u64, OpenFile>>,
    next_handle: AtomicU64,
}

impl OpenFileList {
    /// Empty table.
    pub fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Register an open file; returns its handle.
    pub fn open(&self, file: OpenFile) -> u64 {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.files.lock().insert(handle, file);
        handle
    }

    /// Look a handle up.
    pub fn get(&self, handle: u64) -> FsResult<OpenFile> {
        self.files
            .lock()
            .get(&handle)
            .copied()
            .ok_or_else(|| FsError::Invalid(format!("unknown file handle {handle}")))
    }

    /// Drop a handle.
    pub fn close(&self, handle: u64) -> FsResult<()> {
        self.files
            .lock()
            .remove(&handle)
            .map(|_| ())
            .ok_or_else(|| FsError::Invalid(format!("unknown file handle {handle}")))
    }

    /// Number of open handles.
    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    /// Is the table empty
    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }
}

impl Default for OpenFileList {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn some_file() -> OpenFile {
        OpenFile {
            file_id: BlockId::random(),
            parent_id: BlockId::random(),
            flags: OpenFlags::read_only(),
        }
    }

    #[test]
    fn handles_are_distinct_and_resolvable() {
        let list = OpenFileList::new();
        let file_a = some_file();
        let file_b = some_file();
        let a = list.open(file_a);
        let b = list.open(file_b);
        assert_ne!(a, b);
        assert_eq!(list.get(a).unwrap().file_id, file_a.file_id);
        assert_eq!(list.get(b).unwrap().file_id, file_b.file_id);
    }

    #[test]
    fn close_invalidates_handle() {
        let list = OpenFileList::new();
        let handle = list.open(some_file());
        list.close(handle).unwrap();
        assert!(list.get(handle).is_err());
        assert!(list.close(handle).is_err());
        assert!(list.is_empty());
    }

    #[test]
    fn handles_are_not_reused_after_close() {
        let list = OpenFileList::new();
        let first = list.open(some_file());
        list.close(first).unwrap();
        let second = list.open(some_file());
        assert_ne!(first, second);
    }
}
