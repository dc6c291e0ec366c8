//! Client-local state directory layout.
//!
//! ```text
//! <state-root>/
//!   basedirs                 JSON: basedir path -> filesystem id (hex)
//!   <filesystem_id>/
//!     integritydata          known versions + known blocks
//!     integritydata.lock     advisory single-mount lock
//!     client_id              stable per-host client id
//! ```
//!
//! The basedirs registry detects a whole-filesystem swap: if a basedir
//! suddenly carries a config with a different filesystem id than the one
//! this client saw there before, opening fails instead of silently
//! trusting the replacement.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::core::{FilesystemId, FsError, FsResult};

/// File name of the basedir registry inside the state root.
pub const BASEDIRS_FILE_NAME: &str = "basedirs";

/// State directory for one filesystem.
pub fn filesystem_state_dir(state_root: &Path, filesystem_id: &FilesystemId) -> PathBuf {
    state_root.join(filesystem_id.to_hex())
}

fn read_registry(path: &Path) -> FsResult<BTreeMap<String, String>> {
    match fs::read(path) {
        Ok(raw) => serde_json::from_slice(&raw)
            .map_err(|e| FsError::WrongFormat(format!("corrupt basedir registry: {e}"))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(e.into()),
    }
}

fn registry_key(basedir: &Path) -> String {
    basedir.to_string_lossy().into_owned()
}

/// Record that `basedir` holds the filesystem `id`, failing closed if the
/// registry remembers a different filesystem there.
pub fn check_and_register_basedir(
    state_root: &Path,
    basedir: &Path,
    id: &FilesystemId,
) -> FsResult<()> {
    fs::create_dir_all(state_root)?;
    let path = state_root.join(BASEDIRS_FILE_NAME);
    let mut registry = read_registry(&path)?;
    let key = registry_key(basedir);
    let hex = id.to_hex();
    if let Some(known) = registry.get(&key) {
        if *known != hex {
            log::error!(
                "basedir {} used to hold filesystem {known}, now claims {hex}",
                basedir.display()
            );
            return Err(FsError::WrongFormat(format!(
                "the filesystem in {} was replaced by a different one",
                basedir.display()
            )));
        }
        return Ok(());
    }
    registry.insert(key, hex);
    let serialized = serde_json::to_vec_pretty(&registry)
        .map_err(|e| FsError::WrongFormat(format!("cannot serialize basedir registry: {e}")))?;
    fs::write(&path, serialized)?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn registering_same_filesystem_twice_is_fine() {
        let state = TempDir::new().unwrap();
        let basedir = PathBuf::from("/mnt/data");
        let id = FilesystemId::random();
        check_and_register_basedir(state.path(), &basedir, &id).unwrap();
        check_and_register_basedir(state.path(), &basedir, &id).unwrap();
    }

    #[test]
    fn replaced_filesystem_is_detected() {
        let state = TempDir::new().unwrap();
        let basedir = PathBuf::from("/mnt/data");
        check_and_register_basedir(state.path(), &basedir, &FilesystemId::random()).unwrap();
        assert!(matches!(
            check_and_register_basedir(state.path(), &basedir, &FilesystemId::random()),
            Err(FsError::WrongFormat(_))
        ));
    }

    #[test]
    fn different_basedirs_are_independent() {
        let state = TempDir::new().unwrap();
        check_and_register_basedir(state.path(), Path::new("/a"), &FilesystemId::random())
            .unwrap();
        check_and_register_basedir(state.path(), Path::new("/b"), &FilesystemId::random())
            .unwrap();
    }

    #[test]
    fn state_dir_is_per_filesystem() {
        let id_a = FilesystemId::random();
        let id_b = FilesystemId::random();
        let root = Path::new("/state");
        assert_ne!(
            filesystem_state_dir(root, &id_a),
            filesystem_state_dir(root, &id_b)
        );
        assert!(filesystem_state_dir(root, &id_a).starts_with(root));
    }
}
