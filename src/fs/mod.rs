//! The filesystem surface: device, nodes and the open-file table.
//!
//! This is what a FUSE-style bridge talks to. Paths come in absolute and
//! normalized; results and errors are typed ([`crate::core::FsError`]
//! carries the errno mapping). Permission enforcement is the kernel's job,
//! not ours; ownership and mode bits are stored and reported only.

pub mod device;
pub mod node;
pub mod open_file;

use bitflags::bitflags;

use crate::core::Timespec;
use crate::fsblobstore::AtimeUpdateBehavior;

pub use device::Device;
pub use node::{Node, NodeKind};
pub use open_file::OpenFileList;

// ============================================================================
// Constants
// ============================================================================

/// Size reported by `stat` for directories.
pub const DIR_LSTAT_SIZE: u64 = 4096;

/// Block unit used for the `st_blocks` field.
pub const STAT_BLOCK_SIZE: u64 = 512;

/// Mode bits: file type and permission handling.
pub mod mode {
    /// Mask of the file type bits.
    pub const TYPE_MASK: u32 = 0o170000;
    /// Directory
    pub const DIR: u32 = 0o040000;
    /// Regular file
    pub const FILE: u32 = 0o100000;
    /// Symbolic link
    pub const SYMLINK: u32 = 0o120000;

    /// Combine a type with the permission bits of `mode`.
    pub fn with_type(file_type: u32, mode: u32) -> u32 {
        file_type | (mode & !TYPE_MASK)
    }
}

// ============================================================================
// Context
// ============================================================================

/// Per-mount settings handed to the device at mount time.
#[derive(Clone, Copy, Debug, Default)]
pub struct Context {
    /// When reads bump the access timestamp.
    pub atime_behavior: AtimeUpdateBehavior,
}

// ============================================================================
// Open Flags
// ============================================================================

bitflags! {
    /// Access mode of an open file handle.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        /// Handle may read
        const READ = 1 << 0;
        /// Handle may write
        const WRITE = 1 << 1;
    }
}

impl OpenFlags {
    /// Read-only handle.
    pub const fn read_only() -> Self {
        OpenFlags::READ
    }

    /// Read-write handle.
    pub const fn read_write() -> Self {
        OpenFlags::READ.union(OpenFlags::WRITE)
    }
}

// ============================================================================
// Attributes
// ============================================================================

/// stat-style node attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeAttrs {
    /// Link count; hard links are unsupported, so always 1
    pub nlink: u32,
    /// Type and permission bits
    pub mode: u32,
    /// Owner
    pub uid: u32,
    /// Group
    pub gid: u32,
    /// Logical size in bytes
    pub size: u64,
    /// 512-byte units backing the node
    pub blocks: u64,
    /// Last access
    pub atime: Timespec,
    /// Last content modification
    pub mtime: Timespec,
    /// Last metadata change
    pub ctime: Timespec,
}

/// statfs-style filesystem attributes.
#[derive(Clone, Copy, Debug)]
pub struct FsStatInfo {
    /// Configured block size in bytes
    pub blocksize: u64,
    /// Blocks currently used
    pub num_used_blocks: u64,
    /// Estimate of blocks still available underneath
    pub num_free_blocks: u64,
    /// Longest allowed file name
    pub max_filename_length: u64,
}
