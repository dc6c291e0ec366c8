//! Identifier and timestamp types.
//!
//! Block ids are 128-bit opaque values compared bytewise. They never carry
//! structure; the null id is reserved as the "no parent" sentinel of the
//! root directory blob.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;

use crate::core::error::{FsError, FsResult};

// ============================================================================
// Constants
// ============================================================================

/// Length of a block id in bytes.
pub const BLOCK_ID_LEN: usize = 16;

/// Length of a block id in hex characters.
pub const BLOCK_ID_HEX_LEN: usize = 2 * BLOCK_ID_LEN;

// ============================================================================
// Block Id
// ============================================================================

/// 128-bit opaque block identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId([u8; BLOCK_ID_LEN]);

impl BlockId {
    /// Wrap raw id bytes.
    pub const fn from_bytes(bytes: [u8; BLOCK_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// The reserved "no parent" sentinel (all zero bytes).
    pub const fn null() -> Self {
        Self([0; BLOCK_ID_LEN])
    }

    /// Draw a fresh id, uniform over 128 bits.
    pub fn random() -> Self {
        let mut bytes = [0u8; BLOCK_ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw id bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; BLOCK_ID_LEN] {
        &self.0
    }

    /// Is this the null sentinel
    #[inline]
    pub fn is_null(&self) -> bool {
        self.0 == [0; BLOCK_ID_LEN]
    }

    /// Lowercase hex form, used for on-disk file names.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 32-character hex string.
    pub fn from_hex(s: &str) -> FsResult<Self> {
        if s.len() != BLOCK_ID_HEX_LEN {
            return Err(FsError::WrongFormat(format!(
                "block id must be {} hex chars, got {}",
                BLOCK_ID_HEX_LEN,
                s.len()
            )));
        }
        let mut bytes = [0u8; BLOCK_ID_LEN];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| FsError::WrongFormat(format!("invalid hex in block id: {s}")))?;
        Ok(Self(bytes))
    }

    /// Parse from a 16-byte slice.
    pub fn from_slice(data: &[u8]) -> FsResult<Self> {
        let bytes: [u8; BLOCK_ID_LEN] = data
            .try_into()
            .map_err(|_| FsError::WrongFormat("block id must be 16 bytes".to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.to_hex())
    }
}

// ============================================================================
// Client and Filesystem Ids
// ============================================================================

/// Per-host client identifier, randomly chosen on first mount.
pub type ClientId = u32;

/// 128-bit filesystem identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilesystemId(pub [u8; 16]);

impl FilesystemId {
    /// Draw a fresh filesystem id.
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 32-character hex string.
    pub fn from_hex(s: &str) -> FsResult<Self> {
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| FsError::WrongFormat(format!("invalid filesystem id: {s}")))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for FilesystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FilesystemId({})", self.to_hex())
    }
}

// ============================================================================
// Timestamps
// ============================================================================

/// Second/nanosecond timestamp, serialized as 12 bytes (i64 + u32, LE).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timespec {
    /// Seconds since the epoch
    pub secs: i64,
    /// Nanosecond part, < 1_000_000_000
    pub nanos: u32,
}

impl Timespec {
    /// Serialized size in bytes.
    pub const SERIALIZED_LEN: usize = 12;

    /// The epoch.
    pub const ZERO: Timespec = Timespec { secs: 0, nanos: 0 };

    /// Current wall-clock time.
    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => Timespec {
                secs: d.as_secs() as i64,
                nanos: d.subsec_nanos(),
            },
            // Clock before the epoch; clamp rather than fail.
            Err(e) => Timespec {
                secs: -(e.duration().as_secs() as i64),
                nanos: 0,
            },
        }
    }

    /// Serialize into 12 bytes.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.secs.to_le_bytes());
        out.extend_from_slice(&self.nanos.to_le_bytes());
    }

    /// Parse from the first 12 bytes of `data`.
    pub fn read_from(data: &[u8]) -> FsResult<Self> {
        if data.len() < Self::SERIALIZED_LEN {
            return Err(FsError::WrongFormat("truncated timestamp".to_string()));
        }
        let secs = i64::from_le_bytes(data[0..8].try_into().expect("len checked"));
        let nanos = u32::from_le_bytes(data[8..12].try_into().expect("len checked"));
        Ok(Timespec { secs, nanos })
    }

    /// Seconds elapsed from `earlier` to `self`, saturating at zero.
    pub fn secs_since(&self, earlier: &Timespec) -> u64 {
        if self <= earlier {
            0
        } else {
            (self.secs - earlier.secs) as u64
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
