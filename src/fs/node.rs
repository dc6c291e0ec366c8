//! Filesystem nodes.
//!
//! A node is a light handle: device reference, blob id, parent directory
//! blob id and kind. It holds no blob open between operations; every
//! operation loads what it needs and releases it again, serialized by the
//! blob store's per-id locks.

use crate::blockstore::BlockStore;
use crate::core::{BlockId, FsError, FsResult, Timespec};
use crate::fs::device::Device;
use crate::fs::{mode, NodeAttrs, DIR_LSTAT_SIZE, STAT_BLOCK_SIZE};
use crate::fsblobstore::BlobKind;

// ============================================================================
// Node Kind
// ============================================================================

/// What a node is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeKind {
    Dir,
    File,
    Symlink,
}

impl From<BlobKind> for NodeKind {
    fn from(kind: BlobKind) -> Self {
        match kind {
            BlobKind::Dir => NodeKind::Dir,
            BlobKind::File => NodeKind::File,
            BlobKind::Symlink => NodeKind::Symlink,
        }
    }
}

impl NodeKind {
    /// The mode type bits for this kind.
    pub fn type_bits(&self) -> u32 {
        match self {
            NodeKind::Dir => mode::DIR,
            NodeKind::File => mode::FILE,
            NodeKind::Symlink => mode::SYMLINK,
        }
    }
}

// ============================================================================
// Node
// ============================================================================

/// A resolved path: one filesystem node.
pub struct Node<'d, B: BlockStore + 'static> {
    device: &'d Device<B>,
    kind: NodeKind,
    id: BlockId,
    /// Directory blob holding this node's entry; None for the root.
    parent: Option<BlockId>,
}

impl<'d, B: BlockStore + 'static> Node<'d, B> {
    pub(crate) fn new(
        device: &'d Device<B>,
        kind: NodeKind,
        id: BlockId,
        parent: Option<BlockId>,
    ) -> Self {
        Self {
            device,
            kind,
            id,
            parent,
        }
    }

    /// Node kind.
    #[inline]
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Blob id of this node.
    #[inline]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Parent directory blob id; None for the root directory.
    #[inline]
    pub fn parent_id(&self) -> Option<BlockId> {
        self.parent
    }

    /// Is this the filesystem root
    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    fn size(&self) -> FsResult<u64> {
        match self.kind {
            NodeKind::Dir => Ok(DIR_LSTAT_SIZE),
            NodeKind::File => {
                let file = self.device.load_file(&self.id)?;
                file.size()
            }
            NodeKind::Symlink => {
                let link = self.device.load_symlink(&self.id)?;
                Ok(link.target().len() as u64)
            }
        }
    }

    /// stat.
    pub fn getattr(&self) -> FsResult<NodeAttrs> {
        let size = self.size()?;
        let blocks = size.div_ceil(STAT_BLOCK_SIZE);
        match self.parent {
            None => {
                // The root has no containing entry; synthesize its metadata.
                let now = Timespec::now();
                Ok(NodeAttrs {
                    nlink: 1,
                    mode: mode::with_type(mode::DIR, 0o755),
                    uid: 0,
                    gid: 0,
                    size,
                    blocks,
                    atime: now,
                    mtime: now,
                    ctime: now,
                })
            }
            Some(parent_id) => {
                let parent = self.device.load_dir(&parent_id)?;
                let entry = parent.get_child_by_id(&self.id).ok_or(FsError::NotFound)?;
                Ok(NodeAttrs {
                    nlink: 1,
                    mode: entry.mode,
                    uid: entry.uid,
                    gid: entry.gid,
                    size,
                    blocks,
                    atime: entry.atime,
                    mtime: entry.mtime,
                    ctime: entry.ctime,
                })
            }
        }
    }

    /// chmod. The root directory has no entry to store mode bits in; its
    /// metadata is synthesized and a chmod on it is ignored.
    pub fn chmod(&self, new_mode: u32) -> FsResult<()> {
        let Some(parent_id) = self.parent else {
            log::debug!("ignoring chmod on the root directory");
            return Ok(());
        };
        let mut parent = self.device.load_dir(&parent_id)?;
        parent.set_mode_of_child(&self.id, mode::with_type(self.kind.type_bits(), new_mode))?;
        parent.flush()
    }

    /// chown; `None` keeps the current owner/group.
    pub fn chown(&self, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        let Some(parent_id) = self.parent else {
            log::debug!("ignoring chown on the root directory");
            return Ok(());
        };
        let mut parent = self.device.load_dir(&parent_id)?;
        parent.set_uid_gid_of_child(&self.id, uid, gid)?;
        parent.flush()
    }

    /// utimens; `None` keeps the respective timestamp.
    pub fn utimens(&self, atime: Option<Timespec>, mtime: Option<Timespec>) -> FsResult<()> {
        let Some(parent_id) = self.parent else {
            log::debug!("ignoring utimens on the root directory");
            return Ok(());
        };
        let mut parent = self.device.load_dir(&parent_id)?;
        parent.set_access_times_of_child(&self.id, atime, mtime)?;
        parent.flush()
    }
}
