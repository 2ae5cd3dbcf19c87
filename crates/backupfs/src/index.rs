//! The `BaseInfoIndex`: an in-memory record of "what did this path look
//! like before the overlay touched it", plus its JSON wire format.

use std::collections::HashMap;
use std::collections::hash_map;
use std::path::{Path, PathBuf};

use serde::de::Error as DeError;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use backupfs_common::Result;

use crate::fs::{FileInfo, FileKind, FileMetadata};

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;
const S_IFREG: u32 = 0o100000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Directory,
    Symlink,
    Other,
}

/// A snapshot of a path's metadata at the moment the overlay first observed
/// it, independent of any particular `Fs` implementation's `FileInfo` type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub kind: EntryKind,
    pub mode: u32,
    pub mtime_ns: i128,
    pub size: u64,
    pub uid: i32,
    pub gid: i32,
}

impl IndexEntry {
    pub fn from_file_info(info: &FileInfo) -> Self {
        let kind = match info.kind {
            FileKind::Regular => EntryKind::Regular,
            FileKind::Directory => EntryKind::Directory,
            FileKind::Symlink => EntryKind::Symlink,
            FileKind::Other => EntryKind::Other,
        };
        Self {
            kind,
            mode: info.meta.mode,
            mtime_ns: info.meta.mtime_ns,
            size: info.meta.size,
            uid: info.meta.uid,
            gid: info.meta.gid,
        }
    }

    pub fn to_file_info(self) -> FileInfo {
        let kind = match self.kind {
            EntryKind::Regular => FileKind::Regular,
            EntryKind::Directory => FileKind::Directory,
            EntryKind::Symlink => FileKind::Symlink,
            EntryKind::Other => FileKind::Other,
        };
        FileInfo {
            kind,
            meta: FileMetadata {
                mode: self.mode,
                mtime_ns: self.mtime_ns,
                size: self.size,
                uid: self.uid,
                gid: self.gid,
            },
        }
    }
}

/// Map from cleaned path to its recorded state: `None` means the path did
/// not exist when first observed, `Some(entry)` captures what did.
#[derive(Debug, Clone, Default)]
pub struct BaseInfoIndex {
    entries: HashMap<PathBuf, Option<IndexEntry>>,
}

impl BaseInfoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `value` for `path` only if nothing is recorded yet —
    /// first-observation-wins, the property the copy-on-first-write
    /// invariant relies on. Returns whether a new entry was inserted.
    pub fn observe(&mut self, path: PathBuf, value: Option<IndexEntry>) -> bool {
        match self.entries.entry(path) {
            hash_map::Entry::Occupied(_) => false,
            hash_map::Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn get(&self, path: &Path) -> Option<Option<IndexEntry>> {
        self.entries.get(path).copied()
    }

    pub fn remove(&mut self, path: &Path) {
        self.entries.remove(path);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &Option<IndexEntry>)> {
        self.entries.iter()
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

fn path_to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn basename(path: &Path) -> String {
    match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => path_to_slash(path),
    }
}

#[derive(Serialize, Deserialize)]
struct JsonEntry {
    name: String,
    mode: u32,
    mod_time: i64,
    size: i64,
    uid: i32,
    gid: i32,
}

impl JsonEntry {
    fn from_entry(path: &Path, entry: &IndexEntry) -> Self {
        let type_bits = match entry.kind {
            EntryKind::Directory => S_IFDIR,
            EntryKind::Symlink => S_IFLNK,
            EntryKind::Regular | EntryKind::Other => S_IFREG,
        };
        JsonEntry {
            name: basename(path),
            mode: entry.mode | type_bits,
            mod_time: entry.mtime_ns.clamp(i64::MIN as i128, i64::MAX as i128) as i64,
            size: entry.size as i64,
            uid: entry.uid,
            gid: entry.gid,
        }
    }

    fn into_entry(self) -> IndexEntry {
        let kind = match self.mode & S_IFMT {
            S_IFDIR => EntryKind::Directory,
            S_IFLNK => EntryKind::Symlink,
            S_IFREG => EntryKind::Regular,
            _ => EntryKind::Other,
        };
        IndexEntry {
            kind,
            mode: self.mode & !S_IFMT,
            mtime_ns: self.mod_time as i128,
            size: self.size.max(0) as u64,
            uid: self.uid,
            gid: self.gid,
        }
    }
}

impl Serialize for BaseInfoIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (path, entry) in &self.entries {
            let key = path_to_slash(path);
            let value = entry.as_ref().map(|e| JsonEntry::from_entry(path, e));
            map.serialize_entry(&key, &value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for BaseInfoIndex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw: HashMap<String, Option<JsonEntry>> = HashMap::deserialize(deserializer)?;
        let mut entries = HashMap::with_capacity(raw.len());
        for (key, value) in raw {
            if key.is_empty() {
                return Err(D::Error::custom("empty path key in base info index"));
            }
            entries.insert(PathBuf::from(key), value.map(JsonEntry::into_entry));
        }
        Ok(BaseInfoIndex { entries })
    }
}
