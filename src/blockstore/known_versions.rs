//! Client-local record of block versions.
//!
//! For every `(client id, block id)` pair the highest version counter ever
//! observed is remembered, plus the set of all block ids this client has
//! ever seen. The state lives next to the filesystem in the local state
//! directory (never inside the basedir, where an attacker could roll it
//! back together with the blocks) and is guarded by an advisory file lock
//! so only one mount per host can use a filesystem at a time.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::{BlockId, ClientId, FsError, FsResult};

/// File name of the persisted state inside the filesystem's state dir.
pub const STATE_FILE_NAME: &str = "integritydata";

/// File name of the persisted client id.
pub const CLIENT_ID_FILE_NAME: &str = "client_id";

// ============================================================================
// Persisted form
// ============================================================================

#[derive(Serialize, Deserialize)]
struct SerializedVersionEntry {
    client_id: ClientId,
    block_id: String,
    version: u64,
}

#[derive(Serialize, Deserialize)]
struct SerializedState {
    versions: Vec<SerializedVersionEntry>,
    known_blocks: Vec<String>,
}

// ============================================================================
// Known Block Versions
// ============================================================================

struct State {
    versions: HashMap<(ClientId, BlockId), u64>,
    known_blocks: HashSet<BlockId>,
    dirty: bool,
}

/// The per-(client, filesystem) version bookkeeping, persisted on flush.
pub struct KnownBlockVersions {
    state_path: PathBuf,
    my_client_id: ClientId,
    state: Mutex<State>,
    // Held for the lifetime of the mount; advisory lock against a second
    // mount on the same host.
    _lock_file: fs::File,
}

impl KnownBlockVersions {
    /// Load (or initialize) the state in `state_dir`.
    pub fn load_or_create(state_dir: &Path) -> FsResult<Self> {
        fs::create_dir_all(state_dir)?;
        let lock_file = Self::acquire_lock(state_dir)?;
        let my_client_id = Self::load_or_create_client_id(state_dir)?;
        let state_path = state_dir.join(STATE_FILE_NAME);
        let state = match fs::read(&state_path) {
            Ok(bytes) => Self::parse_state(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => State {
                versions: HashMap::new(),
                known_blocks: HashSet::new(),
                dirty: false,
            },
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            state_path,
            my_client_id,
            state: Mutex::new(state),
            _lock_file: lock_file,
        })
    }

    fn acquire_lock(state_dir: &Path) -> FsResult<fs::File> {
        let lock_path = state_dir.join(format!("{STATE_FILE_NAME}.lock"));
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if rc != 0 {
                log::error!(
                    "local state {} is locked; is the filesystem mounted twice?",
                    lock_path.display()
                );
                return Err(FsError::Busy);
            }
        }
        Ok(file)
    }

    fn load_or_create_client_id(state_dir: &Path) -> FsResult<ClientId> {
        let path = state_dir.join(CLIENT_ID_FILE_NAME);
        match fs::read_to_string(&path) {
            Ok(text) => text
                .trim()
                .parse::<ClientId>()
                .map_err(|_| FsError::WrongFormat(format!("corrupt client id file {}", path.display()))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Client id 0 is reserved so an all-zero envelope never
                // looks legitimate.
                let mut id: ClientId = 0;
                while id == 0 {
                    id = rand::random();
                }
                atomic_write(&path, id.to_string().as_bytes())?;
                Ok(id)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn parse_state(bytes: &[u8]) -> FsResult<State> {
        let parsed: SerializedState = serde_json::from_slice(bytes)
            .map_err(|e| FsError::WrongFormat(format!("corrupt integrity state: {e}")))?;
        let mut versions = HashMap::with_capacity(parsed.versions.len());
        for entry in parsed.versions {
            let block_id = BlockId::from_hex(&entry.block_id)?;
            versions.insert((entry.client_id, block_id), entry.version);
        }
        let mut known_blocks = HashSet::with_capacity(parsed.known_blocks.len());
        for hex in parsed.known_blocks {
            known_blocks.insert(BlockId::from_hex(&hex)?);
        }
        Ok(State {
            versions,
            known_blocks,
            dirty: false,
        })
    }

    /// This client's stable id.
    #[inline]
    pub fn my_client_id(&self) -> ClientId {
        self.my_client_id
    }

    /// Next version for a block this client is about to write; also marks
    /// the block as known.
    pub fn increment_version(&self, block_id: BlockId) -> u64 {
        let mut state = self.state.lock();
        let counter = state
            .versions
            .entry((self.my_client_id, block_id))
            .or_insert(0);
        *counter += 1;
        let version = *counter;
        state.known_blocks.insert(block_id);
        state.dirty = true;
        version
    }

    /// Validate a version read from a block envelope; remembers the new
    /// version and marks the block as known on success.
    pub fn check_and_update(
        &self,
        client_id: ClientId,
        block_id: BlockId,
        version: u64,
    ) -> Result<(), ()> {
        let mut state = self.state.lock();
        let stored = state.versions.entry((client_id, block_id)).or_insert(0);
        if version < *stored {
            return Err(());
        }
        *stored = version;
        state.known_blocks.insert(block_id);
        state.dirty = true;
        Ok(())
    }

    /// Has this client ever seen the block
    pub fn is_known(&self, block_id: &BlockId) -> bool {
        self.state.lock().known_blocks.contains(block_id)
    }

    /// Forget a block after it was legitimately removed, so a later miss
    /// for its id is not a violation.
    pub fn mark_removed(&self, block_id: &BlockId) {
        let mut state = self.state.lock();
        if state.known_blocks.remove(block_id) {
            state.dirty = true;
        }
    }

    /// Persist if anything changed since the last save.
    pub fn save(&self) -> FsResult<()> {
        let mut state = self.state.lock();
        if !state.dirty {
            return Ok(());
        }
        let mut versions: Vec<SerializedVersionEntry> = state
            .versions
            .iter()
            .map(|(&(client_id, block_id), &version)| SerializedVersionEntry {
                client_id,
                block_id: block_id.to_hex(),
                version,
            })
            .collect();
        versions.sort_by(|a, b| (a.client_id, &a.block_id).cmp(&(b.client_id, &b.block_id)));
        let mut known_blocks: Vec<String> =
            state.known_blocks.iter().map(BlockId::to_hex).collect();
        known_blocks.sort();
        let serialized = serde_json::to_vec_pretty(&SerializedState {
            versions,
            known_blocks,
        })
        .map_err(|e| FsError::WrongFormat(format!("cannot serialize integrity state: {e}")))?;
        atomic_write(&self.state_path, &serialized)?;
        state.dirty = false;
        Ok(())
    }
}

impl Drop for KnownBlockVersions {
    fn drop(&mut self) {
        if let Err(e) = self.save() {
            log::error!("failed to persist integrity state on teardown: {e}");
        }
    }
}

/// Write a file via temp-and-rename so readers never see it half-written.
fn atomic_write(path: &Path, data: &[u8]) -> FsResult<()> {
    let dir = path.parent().ok_or_else(|| {
        FsError::Invalid(format!("state path {} has no parent", path.display()))
    })?;
    let tmp = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("state")
    ));
    let result = (|| -> io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_data()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result.map_err(Into::into)
}

// ============================================================================
// Tests
// ============================================================================
