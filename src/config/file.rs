//! The encrypted config file inside the basedir.
//!
//! ```text
//! | "cryfs.config;1;scrypt" | scrypt settings | sealed config JSON |
//! ```
//!
//! The sealed part is AES-256-GCM with a key derived from the user's
//! password; the magic header doubles as associated data, so a file with
//! a doctored header fails authentication rather than mis-parsing.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::config::Config;
use crate::core::{BlockId, FsError, FsResult};
use crate::crypto::key::EncryptionKey;
use crate::crypto::{CipherSuite, ScryptSettings};

/// File name of the config inside the basedir.
pub const CONFIG_FILE_NAME: &str = "cryfs.config";

/// Magic header of the config file format.
pub const CONFIG_HEADER: &[u8] = b"cryfs.config;1;scrypt";

/// Cipher used for the config file itself (independent of the block
/// cipher configured for the filesystem).
const CONFIG_CIPHER: CipherSuite = CipherSuite::Aes256Gcm;

/// Encrypt and write the config.
pub fn save(config: &Config, path: &Path, password: &str, settings: &ScryptSettings) -> FsResult<()> {
    let plaintext = serde_json::to_vec(config)
        .map_err(|e| FsError::WrongFormat(format!("cannot serialize config: {e}")))?;
    let derived = settings.derive(password, CONFIG_CIPHER.key_len())?;
    let key = EncryptionKey::from_bytes(derived.to_vec());
    let sealed = CONFIG_CIPHER
        .seal(&key, &plaintext, CONFIG_HEADER)
        .ok_or_else(|| FsError::WrongFormat("config encryption failed".to_string()))?;

    let mut out = Vec::with_capacity(CONFIG_HEADER.len() + sealed.len() + 64);
    out.extend_from_slice(CONFIG_HEADER);
    out.extend_from_slice(&settings.serialize());
    out.extend_from_slice(&sealed);

    let tmp = path.with_extension("tmp");
    let result = (|| -> io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&out)?;
        file.sync_data()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result.map_err(Into::into)
}

/// Read and decrypt the config. Returns the scrypt settings alongside so
/// the caller can re-save without re-choosing parameters. A wrong
/// password surfaces as `DecryptionFailed`.
pub fn load(path: &Path, password: &str) -> FsResult<(Config, ScryptSettings)> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(FsError::NotFound),
        Err(e) => return Err(e.into()),
    };
    let Some(rest) = raw.strip_prefix(CONFIG_HEADER) else {
        return Err(FsError::WrongFormat(
            "config file has an unknown header".to_string(),
        ));
    };
    let (settings, consumed) = ScryptSettings::deserialize(rest)?;
    let sealed = &rest[consumed..];

    let derived = settings.derive(password, CONFIG_CIPHER.key_len())?;
    let key = EncryptionKey::from_bytes(derived.to_vec());
    let plaintext = CONFIG_CIPHER
        .open(&key, sealed, CONFIG_HEADER)
        .ok_or(FsError::DecryptionFailed {
            block_id: BlockId::null(),
        })?;
    let config: Config = serde_json::from_slice(&plaintext)
        .map_err(|e| FsError::WrongFormat(format!("corrupt config content: {e}")))?;
    Ok((config, settings))
}

// ============================================================================
// Tests
// ============================================================================
