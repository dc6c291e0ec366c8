//! Core types shared by every subsystem.
//!
//! Keeps the vocabulary of the crate in one place: block identifiers,
//! timestamps, client/filesystem ids and the error taxonomy.

pub mod error;
pub mod types;

pub use error::{FsError, FsResult, IntegrityViolationKind};
pub use types::{BlockId, ClientId, FilesystemId, Timespec, BLOCK_ID_LEN};
