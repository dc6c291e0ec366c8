//! Encryption key material.

use std::fmt;

use rand::RngCore;
use zeroize::Zeroizing;

use crate::core::{FsError, FsResult};

/// A symmetric key. The backing bytes are wiped on drop and never appear
/// in `Debug` output; the hex form only exists inside the encrypted config.
#[derive(Clone)]
pub struct EncryptionKey(Zeroizing<Vec<u8>>);

impl EncryptionKey {
    /// Generate `len` random key bytes.
    pub fn generate(len: usize) -> Self {
        let mut bytes = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(Zeroizing::new(bytes))
    }

    /// Wrap existing key bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Parse the hex form stored in the config.
    pub fn from_hex(s: &str) -> FsResult<Self> {
        let bytes = hex::decode(s)
            .map_err(|_| FsError::WrongFormat("invalid hex in encryption key".to_string()))?;
        Ok(Self(Zeroizing::new(bytes)))
    }

    /// Hex form for the config.
    pub fn to_hex(&self) -> String {
        hex::encode(&*self.0)
    }

    /// Raw key bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Key length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Is the key empty (never valid for a real cipher)
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey({} bytes)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let key = EncryptionKey::generate(32);
        let restored = EncryptionKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key.as_bytes(), restored.as_bytes());
    }

    #[test]
    fn generate_draws_distinct_keys() {
        let a = EncryptionKey::generate(32);
        let b = EncryptionKey::generate(32);
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn debug_does_not_leak_bytes() {
        let key = EncryptionKey::generate(16);
        let debug = format!("{key:?}");
        assert!(!debug.contains(&key.to_hex()));
    }

    #[test]
    fn rejects_bad_hex() {
        assert!(EncryptionKey::from_hex("zz").is_err());
    }
}
