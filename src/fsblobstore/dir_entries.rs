//! Directory entries and the in-memory entry list.
//!
//! A directory blob's payload is the concatenation of its entries, stored
//! in ascending child-block-id order with names unique per directory:
//!
//! ```text
//! | entry_type:u8 | mode:u32 | uid:u32 | gid:u32
//! | atime:12 | mtime:12 | ctime:12
//! | name (NUL-terminated UTF-8) | child_block_id:16 |
//! ```
//!
//! Node metadata lives here, in the containing directory, not in the child
//! blob itself; every metadata operation is an entry-list operation.

use crate::core::types::BLOCK_ID_LEN;
use crate::core::{BlockId, FsError, FsResult, Timespec};
use crate::fsblobstore::fsblob::BlobKind;

/// Seconds after which relatime updates an unmodified file's atime anyway.
const RELATIME_MAX_AGE_SECS: u64 = 24 * 60 * 60;

// ============================================================================
// Access Time Policy
// ============================================================================

/// When a read should update the access timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AtimeUpdateBehavior {
    /// Never update atime on reads.
    Noatime,
    /// Update atime if it lags mtime/ctime or is older than a day.
    #[default]
    Relatime,
    /// Update atime on every read.
    Strictatime,
}

impl AtimeUpdateBehavior {
    /// Decide whether a read at `now` should bump `atime`.
    pub fn should_update(&self, atime: Timespec, mtime: Timespec, ctime: Timespec, now: Timespec) -> bool {
        match self {
            Self::Noatime => false,
            Self::Strictatime => true,
            Self::Relatime => {
                atime < mtime || atime < ctime || now.secs_since(&atime) >= RELATIME_MAX_AGE_SECS
            }
        }
    }
}

// ============================================================================
// Directory Entry
// ============================================================================

/// One entry of a directory: a named link to a child blob plus the child's
/// metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    /// Kind of the child blob
    pub kind: BlobKind,
    /// Name within this directory; unique
    pub name: String,
    /// Root block id of the child blob
    pub block_id: BlockId,
    /// POSIX mode bits (type and permissions)
    pub mode: u32,
    /// Owner
    pub uid: u32,
    /// Group
    pub gid: u32,
    /// Last access
    pub atime: Timespec,
    /// Last content modification
    pub mtime: Timespec,
    /// Last metadata change
    pub ctime: Timespec,
}

impl DirEntry {
    fn serialized_len(&self) -> usize {
        1 + 4 + 4 + 4 + 3 * Timespec::SERIALIZED_LEN + self.name.len() + 1 + BLOCK_ID_LEN
    }

    fn serialize_into(&self, out: &mut Vec<u8>) {
        out.push(self.kind as u8);
        out.extend_from_slice(&self.mode.to_le_bytes());
        out.extend_from_slice(&self.uid.to_le_bytes());
        out.extend_from_slice(&self.gid.to_le_bytes());
        self.atime.write_to(out);
        self.mtime.write_to(out);
        self.ctime.write_to(out);
        out.extend_from_slice(self.name.as_bytes());
        out.push(0);
        out.extend_from_slice(self.block_id.as_bytes());
    }

    fn deserialize(data: &[u8]) -> FsResult<(DirEntry, usize)> {
        const FIXED_PREFIX: usize = 1 + 4 + 4 + 4 + 3 * Timespec::SERIALIZED_LEN;
        if data.len() < FIXED_PREFIX + 1 + BLOCK_ID_LEN {
            return Err(FsError::WrongFormat("truncated directory entry".to_string()));
        }
        let kind = BlobKind::from_raw(data[0]).ok_or_else(|| {
            FsError::WrongFormat(format!("unknown directory entry type {}", data[0]))
        })?;
        let mode = u32::from_le_bytes(data[1..5].try_into().expect("len checked"));
        let uid = u32::from_le_bytes(data[5..9].try_into().expect("len checked"));
        let gid = u32::from_le_bytes(data[9..13].try_into().expect("len checked"));
        let atime = Timespec::read_from(&data[13..])?;
        let mtime = Timespec::read_from(&data[25..])?;
        let ctime = Timespec::read_from(&data[37..])?;
        let name_start = FIXED_PREFIX;
        let nul = data[name_start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| FsError::WrongFormat("unterminated entry name".to_string()))?;
        let name = std::str::from_utf8(&data[name_start..name_start + nul])
            .map_err(|_| FsError::WrongFormat("entry name is not UTF-8".to_string()))?
            .to_string();
        let id_start = name_start + nul + 1;
        if data.len() < id_start + BLOCK_ID_LEN {
            return Err(FsError::WrongFormat("truncated directory entry id".to_string()));
        }
        let block_id =
            BlockId::from_slice(&data[id_start..id_start + BLOCK_ID_LEN]).expect("16 bytes");
        Ok((
            DirEntry {
                kind,
                name,
                block_id,
                mode,
                uid,
                gid,
                atime,
                mtime,
                ctime,
            },
            id_start + BLOCK_ID_LEN,
        ))
    }
}

// ============================================================================
// Directory Entry List
// ============================================================================

/// The mutable in-memory form of a directory's payload.
#[derive(Debug, Default)]
pub struct DirEntryList {
    // Ascending block id; names unique.
    entries: Vec<DirEntry>,
}

impl DirEntryList {
    /// Empty list.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Serialize all entries in their stored order.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(self.entries.iter().map(DirEntry::serialized_len).sum());
        for entry in &self.entries {
            entry.serialize_into(&mut out);
        }
        out
    }

    /// Parse a directory payload.
    pub fn deserialize(data: &[u8]) -> FsResult<Self> {
        let mut entries: Vec<DirEntry> = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let (entry, consumed) = DirEntry::deserialize(&data[pos..])?;
            if let Some(last) = entries.last() {
                if last.block_id > entry.block_id {
                    return Err(FsError::WrongFormat(
                        "directory entries out of order".to_string(),
                    ));
                }
            }
            entries.push(entry);
            pos += consumed;
        }
        Ok(Self { entries })
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Is the directory empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in stored (block id) order.
    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    fn insert_position(&self, id: &BlockId) -> usize {
        self.entries
            .partition_point(|entry| entry.block_id <= *id)
    }

    /// Look an entry up by name. Linear scan.
    pub fn get(&self, name: &str) -> Option<&DirEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Look an entry up by child block id.
    pub fn get_by_id(&self, id: &BlockId) -> Option<&DirEntry> {
        self.entries
            .binary_search_by(|entry| entry.block_id.cmp(id))
            .ok()
            .map(|idx| &self.entries[idx])
    }

    fn index_by_id(&self, id: &BlockId) -> FsResult<usize> {
        self.entries
            .binary_search_by(|entry| entry.block_id.cmp(id))
            .map_err(|_| FsError::NotFound)
    }

    /// Add a fresh entry; timestamps start at `now`.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        name: &str,
        block_id: BlockId,
        kind: BlobKind,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> FsResult<()> {
        let now = Timespec::now();
        self.insert(DirEntry {
            kind,
            name: name.to_string(),
            block_id,
            mode,
            uid,
            gid,
            atime: now,
            mtime: now,
            ctime: now,
        })
    }

    /// Insert a complete entry, keeping order and name uniqueness. Used
    /// both by `add` and when an entry moves between directories.
    pub fn insert(&mut self, entry: DirEntry) -> FsResult<()> {
        if entry.name.is_empty() || entry.name.contains(['/', '\0']) {
            return Err(FsError::Invalid(format!(
                "invalid directory entry name {:?}",
                entry.name
            )));
        }
        if self.get(&entry.name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let pos = self.insert_position(&entry.block_id);
        self.entries.insert(pos, entry);
        Ok(())
    }

    /// Remove by name; returns the removed entry.
    pub fn remove_by_name(&mut self, name: &str) -> FsResult<DirEntry> {
        let idx = self
            .entries
            .iter()
            .position(|entry| entry.name == name)
            .ok_or(FsError::NotFound)?;
        Ok(self.entries.remove(idx))
    }

    /// Remove by child block id; returns the removed entry.
    pub fn remove_by_id(&mut self, id: &BlockId) -> FsResult<DirEntry> {
        let idx = self.index_by_id(id)?;
        Ok(self.entries.remove(idx))
    }

    /// Rename the entry for `id` to `new_name`. If another entry of that
    /// name exists, POSIX overwrite rules apply: only compatible kinds may
    /// overwrite each other, and the evicted child id is reported through
    /// `on_overwritten` so the caller can delete its blob. The caller has
    /// already verified that an overwritten directory is empty.
    pub fn rename(
        &mut self,
        id: &BlockId,
        new_name: &str,
        on_overwritten: &mut dyn FnMut(&BlockId) -> FsResult<()>,
    ) -> FsResult<()> {
        let renamed_kind = self.entries[self.index_by_id(id)?].kind;
        let conflict = self.get(new_name).map(|e| (e.block_id, e.kind));
        if let Some((evicted_id, evicted_kind)) = conflict {
            if evicted_id != *id {
                match (evicted_kind, renamed_kind) {
                    (BlobKind::Dir, BlobKind::Dir) => {}
                    (BlobKind::Dir, _) => return Err(FsError::IsADirectory),
                    (_, BlobKind::Dir) => return Err(FsError::NotADirectory),
                    _ => {}
                }
                on_overwritten(&evicted_id)?;
                self.remove_by_id(&evicted_id)?;
            }
        }
        let idx = self.index_by_id(id)?;
        let entry = &mut self.entries[idx];
        entry.name = new_name.to_string();
        entry.ctime = Timespec::now();
        Ok(())
    }

    /// chmod.
    pub fn set_mode(&mut self, id: &BlockId, mode: u32) -> FsResult<()> {
        let idx = self.index_by_id(id)?;
        self.entries[idx].mode = mode;
        self.entries[idx].ctime = Timespec::now();
        Ok(())
    }

    /// chown; `None` keeps the current value.
    pub fn set_uid_gid(&mut self, id: &BlockId, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        let idx = self.index_by_id(id)?;
        let entry = &mut self.entries[idx];
        if let Some(uid) = uid {
            entry.uid = uid;
        }
        if let Some(gid) = gid {
            entry.gid = gid;
        }
        if uid.is_some() || gid.is_some() {
            entry.ctime = Timespec::now();
        }
        Ok(())
    }

    /// utimens; `None` keeps the current value, ctime always bumps.
    pub fn set_access_times(
        &mut self,
        id: &BlockId,
        atime: Option<Timespec>,
        mtime: Option<Timespec>,
    ) -> FsResult<()> {
        let idx = self.index_by_id(id)?;
        let entry = &mut self.entries[idx];
        if let Some(atime) = atime {
            entry.atime = atime;
        }
        if let Some(mtime) = mtime {
            entry.mtime = mtime;
        }
        entry.ctime = Timespec::now();
        Ok(())
    }

    /// Bump atime after a read, subject to the mount's policy. Returns
    /// whether the entry changed.
    pub fn update_access_timestamp(
        &mut self,
        id: &BlockId,
        behavior: AtimeUpdateBehavior,
    ) -> FsResult<bool> {
        let idx = self.index_by_id(id)?;
        let entry = &mut self.entries[idx];
        let now = Timespec::now();
        if behavior.should_update(entry.atime, entry.mtime, entry.ctime, now) {
            entry.atime = now;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Bump mtime (and ctime) after a content write.
    pub fn update_modification_timestamp(&mut self, id: &BlockId) -> FsResult<()> {
        let idx = self.index_by_id(id)?;
        let now = Timespec::now();
        self.entries[idx].mtime = now;
        self.entries[idx].ctime = now;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> BlockId {
        BlockId::from_bytes([byte; 16])
    }

    fn list_with(names_and_ids: &[(&str, u8)]) -> DirEntryList {
        let mut list = DirEntryList::new();
        for &(name, b) in names_and_ids {
            list.add(name, id(b), BlobKind::File, 0o644, 1000, 1000)
                .unwrap();
        }
        list
    }

    #[test]
    fn entries_are_ordered_by_block_id() {
        let list = list_with(&[("b", 9), ("a", 3), ("c", 5)]);
        let ids: Vec<BlockId> = list.entries().iter().map(|e| e.block_id).collect();
        assert_eq!(ids, vec![id(3), id(5), id(9)]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut list = list_with(&[("a", 1)]);
        assert!(matches!(
            list.add("a", id(2), BlobKind::File, 0o644, 0, 0),
            Err(FsError::AlreadyExists)
        ));
    }

    #[test]
    fn invalid_names_are_rejected() {
        let mut list = DirEntryList::new();
        assert!(list.add("", id(1), BlobKind::File, 0, 0, 0).is_err());
        assert!(list.add("a/b", id(1), BlobKind::File, 0, 0, 0).is_err());
        assert!(list.add("a\0b", id(1), BlobKind::File, 0, 0, 0).is_err());
    }

    #[test]
    fn serialization_roundtrip() {
        let list = list_with(&[("hello", 7), ("world", 2), ("köln", 4)]);
        let parsed = DirEntryList::deserialize(&list.serialize()).unwrap();
        assert_eq!(parsed.entries(), list.entries());
    }

    #[test]
    fn deserialize_rejects_out_of_order() {
        let list_a = list_with(&[("a", 9)]);
        let list_b = list_with(&[("b", 3)]);
        let mut bytes = list_a.serialize();
        bytes.extend_from_slice(&list_b.serialize());
        assert!(DirEntryList::deserialize(&bytes).is_err());
    }

    #[test]
    fn lookup_by_name_and_id() {
        let list = list_with(&[("a", 3), ("b", 5)]);
        assert_eq!(list.get("a").unwrap().block_id, id(3));
        assert_eq!(list.get_by_id(&id(5)).unwrap().name, "b");
        assert!(list.get("missing").is_none());
        assert!(list.get_by_id(&id(9)).is_none());
    }

    #[test]
    fn remove_by_name_and_id() {
        let mut list = list_with(&[("a", 3), ("b", 5)]);
        assert_eq!(list.remove_by_name("a").unwrap().block_id, id(3));
        assert!(matches!(
            list.remove_by_name("a"),
            Err(FsError::NotFound)
        ));
        list.remove_by_id(&id(5)).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn rename_without_conflict() {
        let mut list = list_with(&[("old", 3)]);
        list.rename(&id(3), "new", &mut |_| panic!("nothing overwritten"))
            .unwrap();
        assert!(list.get("old").is_none());
        assert_eq!(list.get("new").unwrap().block_id, id(3));
    }

    #[test]
    fn rename_overwrites_compatible_entry() {
        let mut list = list_with(&[("a", 3), ("b", 5)]);
        let mut overwritten = Vec::new();
        list.rename(&id(3), "b", &mut |evicted| {
            overwritten.push(*evicted);
            Ok(())
        })
        .unwrap();
        assert_eq!(overwritten, vec![id(5)]);
        assert_eq!(list.len(), 1);
        assert_eq!(list.get("b").unwrap().block_id, id(3));
    }

    #[test]
    fn rename_onto_itself_is_a_no_op() {
        let mut list = list_with(&[("a", 3)]);
        list.rename(&id(3), "a", &mut |_| panic!("nothing overwritten"))
            .unwrap();
        assert_eq!(list.get("a").unwrap().block_id, id(3));
    }

    #[test]
    fn rename_kind_mismatch_is_rejected() {
        let mut list = DirEntryList::new();
        list.add("dir", id(3), BlobKind::Dir, 0o755, 0, 0).unwrap();
        list.add("file", id(5), BlobKind::File, 0o644, 0, 0).unwrap();

        // file over directory
        assert!(matches!(
            list.rename(&id(5), "dir", &mut |_| Ok(())),
            Err(FsError::IsADirectory)
        ));
        // directory over file
        assert!(matches!(
            list.rename(&id(3), "file", &mut |_| Ok(())),
            Err(FsError::NotADirectory)
        ));
        // both still present
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn metadata_setters_bump_ctime() {
        let mut list = list_with(&[("a", 3)]);
        let before = list.get("a").unwrap().ctime;
        std::thread::sleep(std::time::Duration::from_millis(5));
        list.set_mode(&id(3), 0o600).unwrap();
        let entry = list.get("a").unwrap();
        assert_eq!(entry.mode, 0o600);
        assert!(entry.ctime > before);
    }

    #[test]
    fn utimens_sets_selected_times() {
        let mut list = list_with(&[("a", 3)]);
        let t = Timespec {
            secs: 42,
            nanos: 7,
        };
        list.set_access_times(&id(3), Some(t), None).unwrap();
        let entry = list.get("a").unwrap();
        assert_eq!(entry.atime, t);
        assert_ne!(entry.mtime, t);
    }

    #[test]
    fn relatime_updates_only_when_stale() {
        let behavior = AtimeUpdateBehavior::Relatime;
        let old = Timespec { secs: 100, nanos: 0 };
        let newer = Timespec { secs: 200, nanos: 0 };
        let now = Timespec { secs: 300, nanos: 0 };
        // atime behind mtime: update
        assert!(behavior.should_update(old, newer, old, now));
        // atime fresh: no update
        assert!(!behavior.should_update(now, old, old, now));
        // atime older than a day: update
        let day_later = Timespec {
            secs: old.secs + RELATIME_MAX_AGE_SECS as i64 + 1,
            nanos: 0,
        };
        assert!(behavior.should_update(old, old, old, day_later));
    }

    #[test]
    fn noatime_and_strictatime() {
        let t = Timespec { secs: 1, nanos: 0 };
        assert!(!AtimeUpdateBehavior::Noatime.should_update(t, t, t, t));
        assert!(AtimeUpdateBehavior::Strictatime.should_update(t, t, t, t));
    }
}
