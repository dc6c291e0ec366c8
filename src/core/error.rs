//! Error taxonomy.
//!
//! A closed set of error kinds shared by the whole stack. The block-store
//! layers never swallow an error; the device layer is the last point that
//! still sees typed errors, and the bridge above it translates them to
//! errno values via [`FsError::errno`].

use std::io;

use thiserror::Error;

use crate::core::types::BlockId;

/// Result alias used throughout the crate.
pub type FsResult<T> = Result<T, FsError>;

// ============================================================================
// Integrity Violations
// ============================================================================

/// The observable ways a block can deviate from what this client knows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntegrityViolationKind {
    /// AEAD tag mismatch; ciphertext was modified.
    Decryption,
    /// The id inside the integrity envelope differs from the id the block
    /// was stored under.
    IdMismatch,
    /// The envelope version counter went backwards.
    Rollback,
    /// A block this client has seen before is gone from the store.
    MissingBlock,
    /// The envelope was written by a client other than the configured
    /// exclusive one.
    ForeignClient,
}

impl IntegrityViolationKind {
    /// Short human-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decryption => "decryption",
            Self::IdMismatch => "id-mismatch",
            Self::Rollback => "rollback",
            Self::MissingBlock => "missing-block",
            Self::ForeignClient => "foreign-client",
        }
    }
}

// ============================================================================
// Error Kinds
// ============================================================================

/// Closed error taxonomy of the filesystem stack.
#[derive(Error, Debug)]
pub enum FsError {
    /// Host filesystem failure underneath the block store.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Block id or path component not present.
    #[error("not found")]
    NotFound,

    /// Create collided with an existing block or directory entry.
    #[error("already exists")]
    AlreadyExists,

    /// A persisted structure has an unknown layout or version.
    #[error("wrong format: {0}")]
    WrongFormat(String),

    /// AEAD authentication failed for a block.
    #[error("decryption of block {block_id} failed")]
    DecryptionFailed {
        /// Block the failure was observed on
        block_id: BlockId,
    },

    /// Rollback, replacement, omission or foreign-client write detected.
    #[error("integrity violation ({}) on block {block_id}", kind.as_str())]
    IntegrityViolation {
        /// What kind of deviation was observed
        kind: IntegrityViolationKind,
        /// Block the violation was observed on
        block_id: BlockId,
    },

    /// Directory removal attempted on a non-empty directory.
    #[error("directory not empty")]
    NotEmpty,

    /// Operation needs a non-directory but found a directory.
    #[error("is a directory")]
    IsADirectory,

    /// Operation needs a directory but found something else.
    #[error("not a directory")]
    NotADirectory,

    /// Rename involving the filesystem root.
    #[error("resource busy")]
    Busy,

    /// Structurally invalid request, e.g. rename into an own descendant.
    #[error("invalid operation: {0}")]
    Invalid(String),

    /// Only emitted during teardown races; callers ignore it.
    #[error("operation would block")]
    WouldBlock,
}

impl FsError {
    /// Translate to the errno the FUSE-facing bridge should return.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::Io(e) => match e.kind() {
                io::ErrorKind::NotFound => libc::ENOENT,
                io::ErrorKind::PermissionDenied => libc::EACCES,
                _ => libc::EIO,
            },
            FsError::NotFound => libc::ENOENT,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::WrongFormat(_) => libc::EIO,
            FsError::DecryptionFailed { .. } => libc::EIO,
            FsError::IntegrityViolation { .. } => libc::EIO,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::IsADirectory => libc::EISDIR,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::Busy => libc::EBUSY,
            FsError::Invalid(_) => libc::EINVAL,
            FsError::WouldBlock => libc::EWOULDBLOCK,
        }
    }

    /// Whether this error reports an integrity violation (including a bare
    /// AEAD failure, which the integrity layer reports as one).
    #[inline]
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            FsError::IntegrityViolation { .. } | FsError::DecryptionFailed { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(FsError::NotFound.errno(), libc::ENOENT);
        assert_eq!(FsError::AlreadyExists.errno(), libc::EEXIST);
        assert_eq!(FsError::NotEmpty.errno(), libc::ENOTEMPTY);
        assert_eq!(FsError::IsADirectory.errno(), libc::EISDIR);
        assert_eq!(FsError::NotADirectory.errno(), libc::ENOTDIR);
        assert_eq!(FsError::Busy.errno(), libc::EBUSY);
        assert_eq!(FsError::Invalid("x".into()).errno(), libc::EINVAL);
    }

    #[test]
    fn io_errno_keeps_not_found() {
        let err = FsError::Io(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(err.errno(), libc::ENOENT);
    }

    #[test]
    fn violation_predicate() {
        let v = FsError::IntegrityViolation {
            kind: IntegrityViolationKind::Rollback,
            block_id: BlockId::null(),
        };
        assert!(v.is_integrity_violation());
        assert!(!FsError::NotFound.is_integrity_violation());
    }
}
