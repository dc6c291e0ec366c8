//! Assembling a mountable filesystem from a basedir and a password.
//!
//! Builds the full store stack bottom-up, exactly one way:
//!
//! ```text
//! Device ── FsBlobStore ── BlobStore
//!                             │
//!                      CachingBlockStore
//!                             │
//!                     IntegrityBlockStore ── local state dir
//!                             │
//!                     EncryptedBlockStore ── key from the config
//!                             │
//!                      OnDiskBlockStore ── <basedir>/<shard>/<block>
//! ```
//!
//! The CLI and the FUSE bridge live outside this crate; they call
//! [`create_filesystem`] / [`open_filesystem`] and then drive the
//! returned [`Device`].

use std::path::Path;

use crate::blobstore::BlobStore;
use crate::blockstore::caching::CachingBlockStore;
use crate::blockstore::encrypted::EncryptedBlockStore;
use crate::blockstore::integrity::{IntegrityBlockStore, IntegrityConfig, ViolationObserver};
use crate::blockstore::ondisk::OnDiskBlockStore;
use crate::config::file as config_file;
use crate::config::local_state;
use crate::config::Config;
use crate::core::{FsError, FsResult};
use crate::crypto::key::EncryptionKey;
use crate::crypto::{CipherSuite, ScryptSettings};
use crate::fs::{Context, Device};
use crate::fsblobstore::FsBlobStore;

/// The block store stack a mounted filesystem runs on.
pub type DeviceBlockStore =
    CachingBlockStore<IntegrityBlockStore<EncryptedBlockStore<OnDiskBlockStore>>>;

/// A device over the full stack.
pub type DefaultDevice = Device<DeviceBlockStore>;

// ============================================================================
// Options
// ============================================================================

/// Settings for creating a filesystem.
pub struct CreateOptions {
    /// Block cipher for all blocks.
    pub cipher: CipherSuite,
    /// Physical block size in bytes.
    pub blocksize_bytes: u64,
    /// Persisted policy: deleting a known block is a violation.
    pub missing_block_is_integrity_violation: bool,
    /// Persisted policy: only this client may write.
    pub exclusive_client_id: Option<u32>,
    /// scrypt cost for the config file.
    pub scrypt: ScryptSettings,
    /// Mount-time context.
    pub context: Context,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            cipher: CipherSuite::DEFAULT,
            blocksize_bytes: crate::config::DEFAULT_BLOCKSIZE_BYTES,
            missing_block_is_integrity_violation: true,
            exclusive_client_id: None,
            scrypt: ScryptSettings::new_default(),
            context: Context::default(),
        }
    }
}

/// Settings for opening an existing filesystem.
pub struct OpenOptions {
    /// Log violations instead of failing operations.
    pub allow_integrity_violations: bool,
    /// Mount-time context.
    pub context: Context,
    /// Invoked once on the first integrity violation of this mount.
    pub on_integrity_violation: Option<ViolationObserver>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            allow_integrity_violations: false,
            context: Context::default(),
            on_integrity_violation: None,
        }
    }
}

// ============================================================================
// Assembly
// ============================================================================

fn build_device(
    basedir: &Path,
    state_root: &Path,
    config: &Config,
    allow_integrity_violations: bool,
    observer: ViolationObserver,
    context: Context,
) -> FsResult<(DefaultDevice, bool)> {
    let cipher = config.cipher()?;
    let key = EncryptionKey::from_hex(&config.encryption_key)?;
    let state_dir = local_state::filesystem_state_dir(state_root, &config.filesystem_id()?);

    let ondisk = OnDiskBlockStore::new(basedir.to_path_buf())?;
    let encrypted = EncryptedBlockStore::new(ondisk, cipher, key)?;
    let integrity = IntegrityBlockStore::new(
        encrypted,
        &state_dir,
        IntegrityConfig {
            allow_integrity_violations,
            missing_block_is_integrity_violation: config.missing_block_is_integrity_violation,
            exclusive_client_id: config.exclusive_client_id,
            on_integrity_violation: observer,
        },
    )?;
    let caching = CachingBlockStore::new(integrity);
    let fsblobs = FsBlobStore::new(BlobStore::new(caching, config.blocksize_bytes)?);

    let create_root = config.root_blob.is_empty();
    let device = if create_root {
        Device::create_new(fsblobs, config.blocksize_bytes, context)?
    } else {
        Device::load_existing(fsblobs, config.root_blob_id()?, config.blocksize_bytes, context)?
    };
    Ok((device, create_root))
}

/// Create a fresh filesystem in `basedir` and return the mounted device.
pub fn create_filesystem(
    basedir: &Path,
    state_root: &Path,
    password: &str,
    options: CreateOptions,
) -> FsResult<DefaultDevice> {
    std::fs::create_dir_all(basedir)?;
    let config_path = basedir.join(config_file::CONFIG_FILE_NAME);
    if config_path.exists() {
        return Err(FsError::AlreadyExists);
    }
    let mut config = Config::create(
        options.cipher,
        options.blocksize_bytes,
        options.missing_block_is_integrity_violation,
        options.exclusive_client_id,
    )?;
    local_state::check_and_register_basedir(state_root, basedir, &config.filesystem_id()?)?;

    let (device, created_root) = build_device(
        basedir,
        state_root,
        &config,
        false,
        Box::new(|_| {}),
        options.context,
    )?;
    debug_assert!(created_root);
    config.root_blob = device.root_id().to_hex();
    config_file::save(&config, &config_path, password, &options.scrypt)?;
    log::debug!(
        "created filesystem {} in {}",
        config.filesystem_id,
        basedir.display()
    );
    Ok(device)
}

/// Open the filesystem in `basedir` and return the mounted device.
pub fn open_filesystem(
    basedir: &Path,
    state_root: &Path,
    password: &str,
    options: OpenOptions,
) -> FsResult<DefaultDevice> {
    let config_path = basedir.join(config_file::CONFIG_FILE_NAME);
    let (mut config, scrypt) = config_file::load(&config_path, password)?;
    config.validate_for_open()?;
    local_state::check_and_register_basedir(state_root, basedir, &config.filesystem_id()?)?;

    let observer = options
        .on_integrity_violation
        .unwrap_or_else(|| Box::new(|_| {}));
    let (device, _) = build_device(
        basedir,
        state_root,
        &config,
        options.allow_integrity_violations,
        observer,
        options.context,
    )?;

    if config.last_opened_with_version != env!("CARGO_PKG_VERSION") {
        config.last_opened_with_version = env!("CARGO_PKG_VERSION").to_string();
        config_file::save(&config, &config_path, password, &scrypt)?;
    }
    log::debug!(
        "opened filesystem {} from {}",
        config.filesystem_id,
        basedir.display()
    );
    Ok(device)
}

// ============================================================================
// Tests
// ============================================================================
