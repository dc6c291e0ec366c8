//! Password-based key derivation for the config file.
//!
//! scrypt with per-filesystem random salt. The settings are serialized
//! into the config file header so a filesystem can be opened with the
//! settings it was created with.

use rand::RngCore;
use zeroize::Zeroizing;

use crate::core::{FsError, FsResult};

/// Salt length in bytes.
pub const SALT_LEN: usize = 32;

/// scrypt cost settings plus the salt, as persisted in the config header.
///
/// Serialized layout: `log_n:u8 | r:u32 LE | p:u32 LE | salt_len:u32 LE | salt`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScryptSettings {
    /// log2 of the CPU/memory cost parameter N
    pub log_n: u8,
    /// Block size parameter
    pub r: u32,
    /// Parallelization parameter
    pub p: u32,
    /// Random per-filesystem salt
    pub salt: Vec<u8>,
}

impl ScryptSettings {
    /// Default cost for new filesystems (N = 2^18, ~100ms class).
    pub fn new_default() -> Self {
        Self::with_cost(18, 8, 1)
    }

    /// Cheap settings for tests.
    pub fn new_test() -> Self {
        Self::with_cost(10, 1, 1)
    }

    fn with_cost(log_n: u8, r: u32, p: u32) -> Self {
        let mut salt = vec![0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        Self { log_n, r, p, salt }
    }

    /// Derive `out_len` key bytes from `password`.
    pub fn derive(&self, password: &str, out_len: usize) -> FsResult<Zeroizing<Vec<u8>>> {
        let params = scrypt::Params::new(self.log_n, self.r, self.p, out_len)
            .map_err(|e| FsError::WrongFormat(format!("invalid scrypt parameters: {e}")))?;
        let mut out = Zeroizing::new(vec![0u8; out_len]);
        scrypt::scrypt(password.as_bytes(), &self.salt, &params, &mut out)
            .map_err(|e| FsError::WrongFormat(format!("scrypt failed: {e}")))?;
        Ok(out)
    }

    /// Serialize into the config header form.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(13 + self.salt.len());
        out.push(self.log_n);
        out.extend_from_slice(&self.r.to_le_bytes());
        out.extend_from_slice(&self.p.to_le_bytes());
        out.extend_from_slice(&(self.salt.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.salt);
        out
    }

    /// Parse from the config header; returns the settings and the number
    /// of bytes consumed.
    pub fn deserialize(data: &[u8]) -> FsResult<(Self, usize)> {
        if data.len() < 13 {
            return Err(FsError::WrongFormat("truncated scrypt settings".to_string()));
        }
        let log_n = data[0];
        let r = u32::from_le_bytes(data[1..5].try_into().expect("len checked"));
        let p = u32::from_le_bytes(data[5..9].try_into().expect("len checked"));
        let salt_len = u32::from_le_bytes(data[9..13].try_into().expect("len checked")) as usize;
        if data.len() < 13 + salt_len {
            return Err(FsError::WrongFormat("truncated scrypt salt".to_string()));
        }
        let salt = data[13..13 + salt_len].to_vec();
        Ok((Self { log_n, r, p, salt }, 13 + salt_len))
    }
}

// ============================================================================
// Tests
// ============================================================================
