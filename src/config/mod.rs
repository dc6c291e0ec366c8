//! Filesystem configuration.
//!
//! The config describes one filesystem: cipher, encryption key, root blob
//! id, block size, identity and format-feature flags. It is persisted
//! inside the basedir as an encrypted file (see [`file`]); the encryption
//! key for that file is derived from the user's password with scrypt.

pub mod file;
pub mod local_state;

use serde::{Deserialize, Serialize};

use crate::core::{BlockId, FilesystemId, FsError, FsResult};
use crate::crypto::CipherSuite;

/// Smallest permitted block size; anything lower cannot hold two child
/// ids per inner tree node once the crypto layers took their overhead.
pub const MIN_BLOCKSIZE_BYTES: u64 = 128;

/// Default block size for new filesystems.
pub const DEFAULT_BLOCKSIZE_BYTES: u64 = 32 * 1024;

// ============================================================================
// Config
// ============================================================================

/// The persisted per-filesystem configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Cipher suite name, e.g. `aes-256-gcm`
    #[serde(rename = "Cipher")]
    pub cipher: String,
    /// Block encryption key, hex
    #[serde(rename = "EncryptionKey")]
    pub encryption_key: String,
    /// Root directory blob id, hex
    #[serde(rename = "RootBlob")]
    pub root_blob: String,
    /// Physical block size in bytes
    #[serde(rename = "BlocksizeBytes")]
    pub blocksize_bytes: u64,
    /// Filesystem identity, hex
    #[serde(rename = "FilesystemId")]
    pub filesystem_id: String,
    /// Version that created the filesystem
    #[serde(rename = "CreatedWithVersion")]
    pub created_with_version: String,
    /// Version that last opened the filesystem
    #[serde(rename = "LastOpenedWithVersion")]
    pub last_opened_with_version: String,
    /// If set, only this client id may write blocks
    #[serde(rename = "ExclusiveClientId")]
    pub exclusive_client_id: Option<u32>,
    /// Deleting a known block is an integrity violation
    #[serde(rename = "MissingBlockIsIntegrityViolation")]
    pub missing_block_is_integrity_violation: bool,
    /// Blobs carry parent pointers (always true for this format)
    #[serde(rename = "HasParentPointers")]
    pub has_parent_pointers: bool,
    /// Blocks carry version counters (always true for this format)
    #[serde(rename = "HasVersionNumbers")]
    pub has_version_numbers: bool,
}

impl Config {
    /// Build the config for a filesystem about to be created. The root
    /// blob id is filled in once the root directory exists.
    pub fn create(
        cipher: CipherSuite,
        blocksize_bytes: u64,
        missing_block_is_integrity_violation: bool,
        exclusive_client_id: Option<u32>,
    ) -> FsResult<Self> {
        if blocksize_bytes < MIN_BLOCKSIZE_BYTES {
            return Err(FsError::Invalid(format!(
                "block size {blocksize_bytes} is below the minimum of {MIN_BLOCKSIZE_BYTES}"
            )));
        }
        Ok(Self {
            cipher: cipher.name().to_string(),
            encryption_key: cipher.generate_key().to_hex(),
            root_blob: String::new(),
            blocksize_bytes,
            filesystem_id: FilesystemId::random().to_hex(),
            created_with_version: env!("CARGO_PKG_VERSION").to_string(),
            last_opened_with_version: env!("CARGO_PKG_VERSION").to_string(),
            exclusive_client_id,
            missing_block_is_integrity_violation,
            has_parent_pointers: true,
            has_version_numbers: true,
        })
    }

    /// Parse and validate the cipher name.
    pub fn cipher(&self) -> FsResult<CipherSuite> {
        CipherSuite::from_name(&self.cipher)
            .ok_or_else(|| FsError::WrongFormat(format!("unknown cipher {:?}", self.cipher)))
    }

    /// Parse the root blob id.
    pub fn root_blob_id(&self) -> FsResult<BlockId> {
        BlockId::from_hex(&self.root_blob)
    }

    /// Parse the filesystem id.
    pub fn filesystem_id(&self) -> FsResult<FilesystemId> {
        FilesystemId::from_hex(&self.filesystem_id)
    }

    /// Checks run when an existing filesystem is opened.
    pub fn validate_for_open(&self) -> FsResult<()> {
        let cipher = self.cipher()?;
        let key_len = self.encryption_key.len() / 2;
        if key_len != cipher.key_len() {
            return Err(FsError::WrongFormat(format!(
                "key length {} does not fit cipher {}",
                key_len,
                self.cipher
            )));
        }
        if self.blocksize_bytes < MIN_BLOCKSIZE_BYTES {
            return Err(FsError::WrongFormat(format!(
                "block size {} is below the supported minimum",
                self.blocksize_bytes
            )));
        }
        if !self.has_parent_pointers || !self.has_version_numbers {
            return Err(FsError::WrongFormat(
                "filesystem was created by an older format and needs an upgrade first".to_string(),
            ));
        }
        self.root_blob_id()?;
        self.filesystem_id()?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_fills_defaults() {
        let config = Config::create(CipherSuite::Aes256Gcm, 32768, true, None).unwrap();
        assert_eq!(config.cipher, "aes-256-gcm");
        assert_eq!(config.encryption_key.len(), 64); // 32 bytes hex
        assert!(config.has_parent_pointers && config.has_version_numbers);
        assert_eq!(config.created_with_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn rejects_tiny_blocksize() {
        assert!(Config::create(CipherSuite::Aes256Gcm, 64, true, None).is_err());
    }

    #[test]
    fn validate_for_open_catches_problems() {
        let mut config = Config::create(CipherSuite::Aes256Gcm, 32768, true, None).unwrap();
        config.root_blob = BlockId::random().to_hex();
        config.validate_for_open().unwrap();

        let mut bad = config.clone();
        bad.cipher = "rot13".to_string();
        assert!(bad.validate_for_open().is_err());

        let mut bad = config.clone();
        bad.encryption_key = "aabb".to_string();
        assert!(bad.validate_for_open().is_err());

        let mut bad = config.clone();
        bad.has_version_numbers = false;
        assert!(bad.validate_for_open().is_err());

        let mut bad = config;
        bad.root_blob = String::new();
        assert!(bad.validate_for_open().is_err());
    }

    #[test]
    fn serde_roundtrip_uses_stable_field_names() {
        let mut config = Config::create(CipherSuite::Aes128Gcm, 4096, false, Some(7)).unwrap();
        config.root_blob = BlockId::random().to_hex();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"Cipher\""));
        assert!(json.contains("\"EncryptionKey\""));
        assert!(json.contains("\"RootBlob\""));
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
