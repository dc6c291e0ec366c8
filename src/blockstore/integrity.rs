//! Integrity-checking block store layer.
//!
//! Detects rollback, replacement, omission and foreign writes. Every block
//! carries an envelope inside the encrypted plaintext:
//!
//! ```text
//! | block_id:16 | format_version:u8 | client_id:u32 LE | version:u64 LE | payload |
//! ```
//!
//! The id inside the envelope must match the id the block is stored under
//! (an id swap survives even a defeated AEAD binding); the version counter
//! must never go backwards with respect to the client-local known-versions
//! state. A violation poisons the block id: until remount, operations on
//! it keep failing.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::blockstore::known_versions::KnownBlockVersions;
use crate::blockstore::BlockStore;
use crate::core::{BlockId, ClientId, FsError, FsResult, IntegrityViolationKind};

/// Version of the envelope layout.
const ENVELOPE_FORMAT_VERSION: u8 = 1;

/// Envelope bytes preceding the payload.
pub const ENVELOPE_LEN: usize = 16 + 1 + 4 + 8;

/// Callback invoked (once per mount) on the first integrity violation.
pub type ViolationObserver = Box<dyn Fn(&FsError) + Send + Sync>;

// ============================================================================
// Policy
// ============================================================================

/// Integrity policy flags for a mount.
pub struct IntegrityConfig {
    /// Log violations instead of failing the operation.
    pub allow_integrity_violations: bool,
    /// Treat a missing known block as a violation (deletion detection).
    pub missing_block_is_integrity_violation: bool,
    /// If set, blocks written by any other client are violations.
    pub exclusive_client_id: Option<ClientId>,
    /// Invoked on the first violation of the mount.
    pub on_integrity_violation: ViolationObserver,
}

impl IntegrityConfig {
    /// Strict default policy with a no-op observer.
    pub fn strict() -> Self {
        Self {
            allow_integrity_violations: false,
            missing_block_is_integrity_violation: true,
            exclusive_client_id: None,
            on_integrity_violation: Box::new(|_| {}),
        }
    }
}

// ============================================================================
// Integrity Block Store
// ============================================================================

/// Block store enforcing the envelope and version rules.
pub struct IntegrityBlockStore<B> {
    base: B,
    known_versions: KnownBlockVersions,
    config: IntegrityConfig,
    observer_fired: AtomicBool,
    poisoned: Mutex<HashMap<BlockId, IntegrityViolationKind>>,
}

impl<B: BlockStore> IntegrityBlockStore<B> {
    /// Wrap `base`, keeping local state in `state_dir`.
    pub fn new(base: B, state_dir: &Path, config: IntegrityConfig) -> FsResult<Self> {
        let known_versions = KnownBlockVersions::load_or_create(state_dir)?;
        Ok(Self {
            base,
            known_versions,
            config,
            observer_fired: AtomicBool::new(false),
            poisoned: Mutex::new(HashMap::new()),
        })
    }

    /// This mount's client id.
    pub fn my_client_id(&self) -> ClientId {
        self.known_versions.my_client_id()
    }

    fn build_envelope(&self, id: &BlockId, payload: &[u8]) -> Vec<u8> {
        let version = self.known_versions.increment_version(*id);
        let mut out = Vec::with_capacity(ENVELOPE_LEN + payload.len());
        out.extend_from_slice(id.as_bytes());
        out.push(ENVELOPE_FORMAT_VERSION);
        out.extend_from_slice(&self.known_versions.my_client_id().to_le_bytes());
        out.extend_from_slice(&version.to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    /// Record a violation: poison the id, fire the observer once, and
    /// either fail or (in allow mode) log and let the caller continue.
    fn violation(&self, kind: IntegrityViolationKind, id: &BlockId) -> FsResult<()> {
        let error = FsError::IntegrityViolation {
            kind,
            block_id: *id,
        };
        if !self.observer_fired.swap(true, Ordering::SeqCst) {
            (self.config.on_integrity_violation)(&error);
        }
        if self.config.allow_integrity_violations {
            log::warn!("ignoring integrity violation: {error}");
            Ok(())
        } else {
            log::error!("{error}");
            self.poisoned.lock().insert(*id, kind);
            Err(error)
        }
    }

    fn check_not_poisoned(&self, id: &BlockId) -> FsResult<()> {
        if let Some(&kind) = self.poisoned.lock().get(id) {
            return Err(FsError::IntegrityViolation {
                kind,
                block_id: *id,
            });
        }
        Ok(())
    }

    /// Parse an envelope and run all checks. Returns the payload; in allow
    /// mode a violating block's payload is still returned.
    fn check_envelope(&self, id: &BlockId, plaintext: &[u8]) -> FsResult<Vec<u8>> {
        if plaintext.len() < ENVELOPE_LEN {
            return Err(FsError::WrongFormat(format!(
                "block {id} is shorter than the integrity envelope"
            )));
        }
        let envelope_id = BlockId::from_slice(&plaintext[0..16]).expect("slice is 16 bytes");
        let format_version = plaintext[16];
        if format_version != ENVELOPE_FORMAT_VERSION {
            return Err(FsError::WrongFormat(format!(
                "block {id} has unknown envelope version {format_version}"
            )));
        }
        let client_id = u32::from_le_bytes(plaintext[17..21].try_into().expect("len checked"));
        let version = u64::from_le_bytes(plaintext[21..29].try_into().expect("len checked"));

        if envelope_id != *id {
            self.violation(IntegrityViolationKind::IdMismatch, id)?;
        } else {
            if let Some(exclusive) = self.config.exclusive_client_id {
                if client_id != exclusive {
                    self.violation(IntegrityViolationKind::ForeignClient, id)?;
                }
            }
            if self
                .known_versions
                .check_and_update(client_id, *id, version)
                .is_err()
            {
                self.violation(IntegrityViolationKind::Rollback, id)?;
            }
        }
        Ok(plaintext[ENVELOPE_LEN..].to_vec())
    }
}

impl<B: BlockStore> BlockStore for IntegrityBlockStore<B> {
    fn try_create(&self, id: &BlockId, data: &[u8]) -> FsResult<bool> {
        self.check_not_poisoned(id)?;
        let enveloped = self.build_envelope(id, data);
        self.base.try_create(id, &enveloped)
    }

    fn store(&self, id: &BlockId, data: &[u8]) -> FsResult<()> {
        self.check_not_poisoned(id)?;
        let enveloped = self.build_envelope(id, data);
        self.base.store(id, &enveloped)
    }

    fn load(&self, id: &BlockId) -> FsResult<Option<Vec<u8>>> {
        self.check_not_poisoned(id)?;
        match self.base.load(id) {
            Ok(Some(plaintext)) => self.check_envelope(id, &plaintext).map(Some),
            Ok(None) => {
                if self.config.missing_block_is_integrity_violation
                    && self.known_versions.is_known(id)
                {
                    self.violation(IntegrityViolationKind::MissingBlock, id)?;
                }
                Ok(None)
            }
            Err(FsError::DecryptionFailed { block_id }) => {
                // The layer below could not authenticate the block; treat
                // as tamper. There is no payload to hand out, so even in
                // allow mode the block reads as missing.
                self.violation(IntegrityViolationKind::Decryption, &block_id)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn remove(&self, id: &BlockId) -> FsResult<bool> {
        self.check_not_poisoned(id)?;
        let removed = self.base.remove(id)?;
        if removed {
            self.known_versions.mark_removed(id);
        }
        Ok(removed)
    }

    fn num_blocks(&self) -> FsResult<u64> {
        self.base.num_blocks()
    }

    fn estimate_num_free_bytes(&self) -> FsResult<u64> {
        self.base.estimate_num_free_bytes()
    }

    fn block_size_from_physical_block_size(&self, physical: u64) -> FsResult<u64> {
        let below = self.base.block_size_from_physical_block_size(physical)?;
        below.checked_sub(ENVELOPE_LEN as u64).ok_or_else(|| {
            FsError::Invalid(format!(
                "physical block size {physical} is too small for the integrity envelope"
            ))
        })
    }

    fn for_each_block(&self, callback: &mut dyn FnMut(&BlockId) -> FsResult<()>) -> FsResult<()> {
        self.base.for_each_block(callback)
    }

    fn flush(&self) -> FsResult<()> {
        self.known_versions.save()?;
        self.base.flush()
    }
}

// ============================================================================
// Tests
// ============================================================================
