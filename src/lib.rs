//! # vaultfs - Encrypted Block-Backed Virtual Filesystem
//!
//! vaultfs exposes a POSIX-style directory tree whose contents are
//! persisted as a large set of small, fixed-size, individually encrypted,
//! content-opaque blocks in a host directory. File contents, file names,
//! directory structure and file sizes are confidential; tampering,
//! rollback, replacement and deletion of blocks are detected.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  FUSE bridge (external)                                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Device / Node / OpenFileList          POSIX semantics      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  FsBlobStore   DirBlob / FileBlob / SymlinkBlob             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  BlobStore     resizable byte arrays as trees of blocks     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CachingBlockStore      write-back cache, async eviction    │
//! │  IntegrityBlockStore    version counters + known blocks     │
//! │  EncryptedBlockStore    one AEAD envelope per block         │
//! │  OnDiskBlockStore       one file per block, sharded         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use vaultfs::mount::{create_filesystem, CreateOptions};
//! use std::path::Path;
//!
//! let device = create_filesystem(
//!     Path::new("/var/lib/vault/data"),
//!     Path::new("/home/user/.local/share/vaultfs"),
//!     "correct horse battery staple",
//!     CreateOptions::default(),
//! )?;
//! device.mkdir("/documents", 0o755, 1000, 1000)?;
//! # Ok::<(), vaultfs::FsError>(())
//! ```
//!
//! Out of scope here and implemented by collaborators on top: the FUSE
//! kernel bridge, CLI argument handling, interactive password prompting
//! and log sink installation.

pub mod blobstore;
pub mod blockstore;
pub mod cache;
pub mod config;
pub mod core;
pub mod crypto;
pub mod fs;
pub mod fsblobstore;
pub mod mount;

pub use crate::core::{BlockId, FsError, FsResult, IntegrityViolationKind};
pub use crate::fs::{Context, Device, Node, NodeKind, OpenFlags};
pub use crate::mount::{create_filesystem, open_filesystem, CreateOptions, OpenOptions};

/// Crate version, persisted in the filesystem config.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
