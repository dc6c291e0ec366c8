//! The device: path resolution and the POSIX-facing operation set.
//!
//! One `Device` is one mounted filesystem. Paths arrive absolute and
//! already normalized (the bridge resolves `.`/`..`); every operation
//! loads the blobs it needs for just that call, which keeps the per-blob
//! lock discipline simple: locks are only ever held for the duration of
//! one operation, and wherever two directories must be held at once they
//! are acquired in ascending block-id order.

use crate::blockstore::BlockStore;
use crate::core::{BlockId, FsError, FsResult, Timespec};
use crate::fs::node::{Node, NodeKind};
use crate::fs::open_file::{OpenFile, OpenFileList};
use crate::fs::{mode, Context, FsStatInfo, OpenFlags};
use crate::fsblobstore::{BlobKind, DirBlob, DirEntry, FileBlob, FsBlobStore, SymlinkBlob};

/// Longest allowed name of a single path component.
pub const MAX_NAME_LEN: usize = 255;

/// A mounted filesystem.
pub struct Device<B: BlockStore + 'static> {
    fsblobs: FsBlobStore<B>,
    root_id: BlockId,
    blocksize: u64,
    context: Context,
    open_files: OpenFileList,
}

impl<B: BlockStore + 'static> Device<B> {
    /// Create a brand-new filesystem: writes the root directory blob.
    pub fn create_new(fsblobs: FsBlobStore<B>, blocksize: u64, context: Context) -> FsResult<Self> {
        let root = fsblobs.create_dir_blob(&BlockId::null())?;
        let root_id = root.id();
        drop(root);
        Ok(Self {
            fsblobs,
            root_id,
            blocksize,
            context,
            open_files: OpenFileList::new(),
        })
    }

    /// Open an existing filesystem rooted at `root_id`.
    pub fn load_existing(
        fsblobs: FsBlobStore<B>,
        root_id: BlockId,
        blocksize: u64,
        context: Context,
    ) -> FsResult<Self> {
        let device = Self {
            fsblobs,
            root_id,
            blocksize,
            context,
            open_files: OpenFileList::new(),
        };
        // The root must exist and be a directory.
        device.load_dir(&root_id)?;
        Ok(device)
    }

    /// Root directory blob id.
    #[inline]
    pub fn root_id(&self) -> BlockId {
        self.root_id
    }

    // ------------------------------------------------------------------
    // Blob loading helpers
    // ------------------------------------------------------------------

    pub(crate) fn load_dir(&self, id: &BlockId) -> FsResult<DirBlob<B>> {
        self.fsblobs
            .load(id)?
            .ok_or(FsError::NotFound)?
            .into_dir()
    }

    pub(crate) fn load_file(&self, id: &BlockId) -> FsResult<FileBlob<B>> {
        self.fsblobs
            .load(id)?
            .ok_or(FsError::NotFound)?
            .into_file()
    }

    pub(crate) fn load_symlink(&self, id: &BlockId) -> FsResult<SymlinkBlob<B>> {
        self.fsblobs
            .load(id)?
            .ok_or(FsError::NotFound)?
            .into_symlink()
    }

    // ------------------------------------------------------------------
    // Path resolution
    // ------------------------------------------------------------------

    fn split_path<'p>(&self, path: &'p str) -> FsResult<Vec<&'p str>> {
        if !path.starts_with('/') {
            return Err(FsError::Invalid(format!("path {path:?} is not absolute")));
        }
        let mut components = Vec::new();
        for component in path.split('/') {
            match component {
                "" | "." => {}
                ".." => {
                    return Err(FsError::Invalid(
                        "paths must arrive with `..` resolved".to_string(),
                    ))
                }
                name => {
                    if name.len() > MAX_NAME_LEN {
                        return Err(FsError::Invalid(format!("name too long: {name:?}")));
                    }
                    components.push(name);
                }
            }
        }
        Ok(components)
    }

    /// Walk a component list from the root; every component must resolve
    /// to a directory entry, every non-final component to a directory.
    fn resolve_components(&self, components: &[&str]) -> FsResult<Node<'_, B>> {
        let mut current_id = self.root_id;
        let mut current_kind = NodeKind::Dir;
        let mut parent = None;
        for component in components {
            if current_kind != NodeKind::Dir {
                return Err(FsError::NotADirectory);
            }
            let dir = self.load_dir(&current_id)?;
            let entry = dir.get_child(component).ok_or(FsError::NotFound)?;
            parent = Some(current_id);
            current_kind = entry.kind.into();
            current_id = entry.block_id;
        }
        Ok(Node::new(self, current_kind, current_id, parent))
    }

    /// Resolve a path to a node.
    pub fn load(&self, path: &str) -> FsResult<Node<'_, B>> {
        let components = self.split_path(path)?;
        self.resolve_components(&components)
    }

    /// Resolve the parent directory of `path`; returns its blob id and the
    /// final name. Fails with `Busy` for the root itself.
    fn resolve_parent<'p>(&self, path: &'p str) -> FsResult<(BlockId, &'p str)> {
        let components = self.split_path(path)?;
        let Some((&name, parent_components)) = components.split_last() else {
            return Err(FsError::Busy);
        };
        let parent = self.resolve_components(parent_components)?;
        if parent.kind() != NodeKind::Dir {
            return Err(FsError::NotADirectory);
        }
        Ok((parent.id(), name))
    }

    // ------------------------------------------------------------------
    // Directory operations
    // ------------------------------------------------------------------

    /// mkdir.
    pub fn mkdir(&self, path: &str, dir_mode: u32, uid: u32, gid: u32) -> FsResult<()> {
        let (parent_id, name) = self.resolve_parent(path)?;
        let mut parent = self.load_dir(&parent_id)?;
        if parent.get_child(name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let blob = self.fsblobs.create_dir_blob(&parent_id)?;
        let id = blob.id();
        drop(blob);
        parent.add_child(
            name,
            id,
            BlobKind::Dir,
            mode::with_type(mode::DIR, dir_mode),
            uid,
            gid,
        )?;
        parent.flush()
    }

    /// rmdir; fails with `NotEmpty` on a non-empty directory.
    pub fn rmdir(&self, path: &str) -> FsResult<()> {
        let (parent_id, name) = self.resolve_parent(path)?;
        let mut parent = self.load_dir(&parent_id)?;
        let entry = parent.get_child(name).ok_or(FsError::NotFound)?;
        if entry.kind != BlobKind::Dir {
            return Err(FsError::NotADirectory);
        }
        let dir_id = entry.block_id;
        self.ensure_dir_empty(&dir_id)?;
        parent.remove_child_by_name(name)?;
        parent.flush()?;
        drop(parent);
        self.fsblobs.remove_by_id(&dir_id)
    }

    fn ensure_dir_empty(&self, id: &BlockId) -> FsResult<()> {
        let dir = self.load_dir(id)?;
        if dir.is_empty() {
            Ok(())
        } else {
            Err(FsError::NotEmpty)
        }
    }

    /// readdir. Entries are returned sorted by name; the stored order
    /// (by child block id) is an implementation detail.
    pub fn readdir(&self, path: &str) -> FsResult<Vec<(String, NodeKind)>> {
        let node = self.load(path)?;
        if node.kind() != NodeKind::Dir {
            return Err(FsError::NotADirectory);
        }
        let dir = self.load_dir(&node.id())?;
        let mut entries: Vec<(String, NodeKind)> = dir
            .entries()
            .iter()
            .map(|entry| (entry.name.clone(), entry.kind.into()))
            .collect();
        entries.sort();
        Ok(entries)
    }

    // ------------------------------------------------------------------
    // File operations
    // ------------------------------------------------------------------

    /// create (O_CREAT|O_EXCL).
    pub fn create_file(&self, path: &str, file_mode: u32, uid: u32, gid: u32) -> FsResult<()> {
        let (parent_id, name) = self.resolve_parent(path)?;
        let mut parent = self.load_dir(&parent_id)?;
        if parent.get_child(name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let blob = self.fsblobs.create_file_blob(&parent_id)?;
        let id = blob.id();
        drop(blob);
        parent.add_child(
            name,
            id,
            BlobKind::File,
            mode::with_type(mode::FILE, file_mode),
            uid,
            gid,
        )?;
        parent.flush()
    }

    /// unlink.
    pub fn unlink(&self, path: &str) -> FsResult<()> {
        let (parent_id, name) = self.resolve_parent(path)?;
        let mut parent = self.load_dir(&parent_id)?;
        let entry = parent.get_child(name).ok_or(FsError::NotFound)?;
        if entry.kind == BlobKind::Dir {
            return Err(FsError::IsADirectory);
        }
        let id = entry.block_id;
        parent.remove_child_by_name(name)?;
        parent.flush()?;
        drop(parent);
        self.fsblobs.remove_by_id(&id)
    }

    /// open; returns a handle for the read/write/truncate calls.
    pub fn open(&self, path: &str, flags: OpenFlags) -> FsResult<u64> {
        let node = self.load(path)?;
        match node.kind() {
            NodeKind::File => {}
            NodeKind::Dir => return Err(FsError::IsADirectory),
            NodeKind::Symlink => {
                return Err(FsError::Invalid(
                    "symlinks must be resolved before open".to_string(),
                ))
            }
        }
        let parent_id = node.parent_id().ok_or(FsError::IsADirectory)?;
        Ok(self.open_files.open(OpenFile {
            file_id: node.id(),
            parent_id,
            flags,
        }))
    }

    /// close.
    pub fn release(&self, handle: u64) -> FsResult<()> {
        self.open_files.close(handle)
    }

    /// read; updates atime per the mount's policy.
    pub fn read(&self, handle: u64, offset: u64, target: &mut [u8]) -> FsResult<usize> {
        let open_file = self.open_files.get(handle)?;
        if !open_file.flags.contains(OpenFlags::READ) {
            return Err(FsError::Invalid("handle not open for reading".to_string()));
        }
        let read = {
            let file = self.load_file(&open_file.file_id)?;
            file.read(offset, target)?
        };
        let mut parent = self.load_dir(&open_file.parent_id)?;
        parent
            .update_access_timestamp_of_child(&open_file.file_id, self.context.atime_behavior)?;
        parent.flush()?;
        Ok(read)
    }

    /// write; zero-fills any gap past EOF.
    pub fn write(&self, handle: u64, offset: u64, source: &[u8]) -> FsResult<usize> {
        let open_file = self.open_files.get(handle)?;
        if !open_file.flags.contains(OpenFlags::WRITE) {
            return Err(FsError::Invalid("handle not open for writing".to_string()));
        }
        {
            let file = self.load_file(&open_file.file_id)?;
            file.write(offset, source)?;
        }
        let mut parent = self.load_dir(&open_file.parent_id)?;
        parent.update_modification_timestamp_of_child(&open_file.file_id)?;
        parent.flush()?;
        Ok(source.len())
    }

    /// ftruncate.
    pub fn ftruncate(&self, handle: u64, new_size: u64) -> FsResult<()> {
        let open_file = self.open_files.get(handle)?;
        if !open_file.flags.contains(OpenFlags::WRITE) {
            return Err(FsError::Invalid("handle not open for writing".to_string()));
        }
        {
            let file = self.load_file(&open_file.file_id)?;
            file.resize(new_size)?;
        }
        let mut parent = self.load_dir(&open_file.parent_id)?;
        parent.update_modification_timestamp_of_child(&open_file.file_id)?;
        parent.flush()
    }

    /// truncate by path.
    pub fn truncate(&self, path: &str, new_size: u64) -> FsResult<()> {
        let node = self.load(path)?;
        if node.kind() != NodeKind::File {
            return match node.kind() {
                NodeKind::Dir => Err(FsError::IsADirectory),
                _ => Err(FsError::Invalid("truncate needs a file".to_string())),
            };
        }
        {
            let file = self.load_file(&node.id())?;
            file.resize(new_size)?;
        }
        let parent_id = node.parent_id().ok_or(FsError::IsADirectory)?;
        let mut parent = self.load_dir(&parent_id)?;
        parent.update_modification_timestamp_of_child(&node.id())?;
        parent.flush()
    }

    /// fsync: push everything down to the backend.
    pub fn fsync(&self, handle: u64) -> FsResult<()> {
        self.open_files.get(handle)?;
        self.fsblobs.flush()
    }

    /// fdatasync. No separate metadata channel exists down the stack, so
    /// this is the same barrier as fsync.
    pub fn fdatasync(&self, handle: u64) -> FsResult<()> {
        self.fsync(handle)
    }

    // ------------------------------------------------------------------
    // Symlinks
    // ------------------------------------------------------------------

    /// symlink.
    pub fn symlink(&self, target: &str, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        let (parent_id, name) = self.resolve_parent(path)?;
        let mut parent = self.load_dir(&parent_id)?;
        if parent.get_child(name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let blob = self.fsblobs.create_symlink_blob(&parent_id, target)?;
        let id = blob.id();
        drop(blob);
        parent.add_child(
            name,
            id,
            BlobKind::Symlink,
            mode::with_type(mode::SYMLINK, 0o777),
            uid,
            gid,
        )?;
        parent.flush()
    }

    /// readlink.
    pub fn readlink(&self, path: &str) -> FsResult<String> {
        let node = self.load(path)?;
        if node.kind() != NodeKind::Symlink {
            return Err(FsError::Invalid("not a symlink".to_string()));
        }
        let link = self.load_symlink(&node.id())?;
        Ok(link.target().to_string())
    }

    // ------------------------------------------------------------------
    // Rename
    // ------------------------------------------------------------------

    /// rename. POSIX semantics: overwrites a compatible existing target
    /// (a directory only overwrites an empty directory), refuses to move
    /// the root or to move a directory into its own subtree.
    pub fn rename(&self, old_path: &str, new_path: &str) -> FsResult<()> {
        let old_components = self.split_path(old_path)?;
        let new_components = self.split_path(new_path)?;
        if old_components.is_empty() || new_components.is_empty() {
            return Err(FsError::Busy);
        }
        if new_components.len() > old_components.len()
            && new_components[..old_components.len()] == old_components[..]
        {
            return Err(FsError::Invalid(
                "cannot move a directory into its own subtree".to_string(),
            ));
        }

        let (&old_name, old_parent_components) =
            old_components.split_last().expect("checked non-empty");
        let (&new_name, new_parent_components) =
            new_components.split_last().expect("checked non-empty");
        let old_parent_id = {
            let node = self.resolve_components(old_parent_components)?;
            if node.kind() != NodeKind::Dir {
                return Err(FsError::NotADirectory);
            }
            node.id()
        };
        let new_parent_id = {
            let node = self.resolve_components(new_parent_components)?;
            if node.kind() != NodeKind::Dir {
                return Err(FsError::NotADirectory);
            }
            node.id()
        };

        if old_parent_id == new_parent_id {
            self.rename_within_dir(&old_parent_id, old_name, new_name)
        } else {
            self.rename_across_dirs(&old_parent_id, old_name, &new_parent_id, new_name)
        }
    }

    fn rename_within_dir(&self, dir_id: &BlockId, old_name: &str, new_name: &str) -> FsResult<()> {
        let mut dir = self.load_dir(dir_id)?;
        let source_id = dir.get_child(old_name).ok_or(FsError::NotFound)?.block_id;
        if let Some(existing) = dir.get_child(new_name) {
            if existing.block_id != source_id && existing.kind == BlobKind::Dir {
                self.ensure_dir_empty(&existing.block_id)?;
            }
        }
        dir.rename_child(&source_id, new_name, &mut |evicted| {
            self.fsblobs.remove_by_id(evicted)
        })?;
        dir.flush()
    }

    fn rename_across_dirs(
        &self,
        old_parent_id: &BlockId,
        old_name: &str,
        new_parent_id: &BlockId,
        new_name: &str,
    ) -> FsResult<()> {
        // Acquire the two directories in ascending id order so concurrent
        // renames cannot deadlock against each other. Only the load order
        // depends on the ids; source stays source.
        let (mut source_dir, mut target_dir) = if old_parent_id < new_parent_id {
            let source = self.load_dir(old_parent_id)?;
            let target = self.load_dir(new_parent_id)?;
            (source, target)
        } else {
            let target = self.load_dir(new_parent_id)?;
            let source = self.load_dir(old_parent_id)?;
            (source, target)
        };

        let entry = source_dir
            .get_child(old_name)
            .ok_or(FsError::NotFound)?
            .clone();

        if let Some(existing) = target_dir.get_child(new_name) {
            let existing_id = existing.block_id;
            let existing_kind = existing.kind;
            match (existing_kind, entry.kind) {
                (BlobKind::Dir, BlobKind::Dir) => self.ensure_dir_empty(&existing_id)?,
                (BlobKind::Dir, _) => return Err(FsError::IsADirectory),
                (_, BlobKind::Dir) => return Err(FsError::NotADirectory),
                _ => {}
            }
            target_dir.remove_child_by_id(&existing_id)?;
            self.fsblobs.remove_by_id(&existing_id)?;
        }

        source_dir.remove_child_by_name(old_name)?;
        target_dir.insert_child(DirEntry {
            name: new_name.to_string(),
            ctime: Timespec::now(),
            ..entry
        })?;

        // Re-point the moved blob's parent reference.
        let mut moved = self
            .fsblobs
            .load(&entry.block_id)?
            .ok_or(FsError::NotFound)?;
        moved.set_parent(*new_parent_id)?;
        drop(moved);

        target_dir.flush()?;
        source_dir.flush()
    }

    // ------------------------------------------------------------------
    // Whole-filesystem operations
    // ------------------------------------------------------------------

    /// statfs.
    pub fn statfs(&self) -> FsResult<FsStatInfo> {
        let num_used_blocks = self.fsblobs.num_blocks()?;
        let free_bytes = self.fsblobs.estimate_space_for_num_bytes_left()?;
        Ok(FsStatInfo {
            blocksize: self.blocksize,
            num_used_blocks,
            num_free_blocks: free_bytes / self.blocksize,
            max_filename_length: MAX_NAME_LEN as u64,
        })
    }

    /// access: existence check; permission bits are the kernel's business.
    pub fn access(&self, path: &str) -> FsResult<()> {
        self.load(path).map(|_| ())
    }

    /// Push every pending write down to the backend.
    pub fn flush(&self) -> FsResult<()> {
        self.fsblobs.flush()
    }

    /// Parent-pointer self check, for tests: the alleged parent directory
    /// must contain an entry for the blob.
    pub fn check_parent_pointer(&self, path: &str) -> FsResult<()> {
        let node = self.load(path)?;
        let blob = self
            .fsblobs
            .load(&node.id())?
            .ok_or(FsError::NotFound)?;
        let stored_parent = blob.parent();
        drop(blob);
        match node.parent_id() {
            None => {
                if stored_parent.is_null() {
                    Ok(())
                } else {
                    Err(FsError::Invalid(
                        "root blob has a non-null parent pointer".to_string(),
                    ))
                }
            }
            Some(expected) => {
                if stored_parent != expected {
                    return Err(FsError::Invalid(format!(
                        "parent pointer of {path} points at {stored_parent}, expected {expected}"
                    )));
                }
                let parent = self.load_dir(&expected)?;
                if parent.get_child_by_id(&node.id()).is_none() {
                    return Err(FsError::Invalid(format!(
                        "parent of {path} has no entry for it"
                    )));
                }
                Ok(())
            }
        }
    }
}

impl<B: BlockStore + 'static> Drop for Device<B> {
    fn drop(&mut self) {
        if let Err(e) = self.fsblobs.flush() {
            log::error!("failed to flush filesystem on teardown: {e}");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
