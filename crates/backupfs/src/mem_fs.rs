//! `MemFs` — an in-memory `Fs` implementation used by the test suite so
//! the overlay's properties (§8) can be checked without touching a real
//! disk. Out of scope per spec as a "concrete binding", but some backing
//! store is needed to exercise the trait at all, so this one is kept
//! deliberately small.

use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use backupfs_common::{BackupFsError, Result};

use crate::fs::{FileInfo, FileKind, FileMetadata, Fs, FsFile, OpenOptions};
use crate::path::clean;

#[derive(Clone, Debug)]
enum Node {
    Regular { data: Vec<u8>, meta: FileMetadata },
    Directory { meta: FileMetadata },
    Symlink { target: PathBuf, meta: FileMetadata },
}

impl Node {
    fn kind(&self) -> FileKind {
        match self {
            Node::Regular { .. } => FileKind::Regular,
            Node::Directory { .. } => FileKind::Directory,
            Node::Symlink { .. } => FileKind::Symlink,
        }
    }

    fn meta(&self) -> FileMetadata {
        match self {
            Node::Regular { meta, .. } => *meta,
            Node::Directory { meta } => *meta,
            Node::Symlink { meta, .. } => *meta,
        }
    }

    fn info(&self) -> FileInfo {
        FileInfo {
            kind: self.kind(),
            meta: self.meta(),
        }
    }
}

fn now_ns() -> i128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i128
}

fn default_meta(mode: u32) -> FileMetadata {
    FileMetadata {
        mode,
        mtime_ns: now_ns(),
        size: 0,
        uid: 0,
        gid: 0,
    }
}

fn not_found(op: &'static str, path: &Path) -> BackupFsError {
    BackupFsError::io(op, path.to_path_buf(), io::Error::from(io::ErrorKind::NotFound))
}

fn already_exists(op: &'static str, path: &Path) -> BackupFsError {
    BackupFsError::io(
        op,
        path.to_path_buf(),
        io::Error::from(io::ErrorKind::AlreadyExists),
    )
}

type Tree = Arc<Mutex<BTreeMap<PathBuf, Node>>>;

/// An in-memory filesystem. Every path is normalized with [`clean`] before
/// use, so callers don't need to pre-clean paths passed to it — though
/// every other layer in this crate does that anyway.
pub struct MemFs {
    name: String,
    tree: Tree,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    pub fn new() -> Self {
        let mut map = BTreeMap::new();
        map.insert(PathBuf::from("/"), Node::Directory { meta: default_meta(0o755) });
        Self {
            name: "memfs".to_string(),
            tree: Arc::new(Mutex::new(map)),
        }
    }

    fn parent_dir_exists(map: &BTreeMap<PathBuf, Node>, name: &Path) -> bool {
        match name.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                matches!(map.get(parent), Some(Node::Directory { .. }))
            }
            _ => true,
        }
    }
}

impl Fs for MemFs {
    fn mkdir(&self, name: &Path, perm: u32) -> Result<()> {
        let name = clean(name);
        let mut map = self.tree.lock().unwrap();
        if map.contains_key(&name) {
            return Err(already_exists("mkdir", &name));
        }
        if !Self::parent_dir_exists(&map, &name) {
            return Err(not_found("mkdir", &name));
        }
        map.insert(name, Node::Directory { meta: default_meta(perm) });
        Ok(())
    }

    fn mkdir_all(&self, name: &Path, perm: u32) -> Result<()> {
        let name = clean(name);
        let mut map = self.tree.lock().unwrap();
        let mut ancestors: Vec<PathBuf> = name.ancestors().map(|p| p.to_path_buf()).collect();
        ancestors.reverse();
        for ancestor in ancestors {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            match map.get(&ancestor) {
                Some(Node::Directory { .. }) => continue,
                Some(_) => return Err(already_exists("mkdir_all", &ancestor)),
                None => {
                    map.insert(ancestor, Node::Directory { meta: default_meta(perm) });
                }
            }
        }
        Ok(())
    }

    fn open_file(&self, name: &Path, opts: OpenOptions) -> Result<Box<dyn FsFile>> {
        let name = clean(name);
        let mut map = self.tree.lock().unwrap();

        if let Some(node) = map.get(&name) {
            if opts.create_new {
                return Err(already_exists("open", &name));
            }
            if matches!(node, Node::Directory { .. }) && !opts.is_mutating() {
                let names: Vec<String> = map
                    .keys()
                    .filter_map(|p| {
                        if p.parent() == Some(name.as_path()) {
                            p.file_name().map(|n| n.to_string_lossy().into_owned())
                        } else {
                            None
                        }
                    })
                    .collect();
                return Ok(Box::new(MemFile {
                    tree: self.tree.clone(),
                    path: name,
                    pos: 0,
                    append: false,
                    dir_names: Some(names),
                    dir_cursor: 0,
                }));
            }
            if opts.truncate {
                if let Node::Regular { data, meta } = map.get_mut(&name).unwrap() {
                    data.clear();
                    meta.size = 0;
                    meta.mtime_ns = now_ns();
                }
            }
        } else {
            if !opts.create && !opts.create_new {
                return Err(not_found("open", &name));
            }
            if !Self::parent_dir_exists(&map, &name) {
                return Err(not_found("open", &name));
            }
            map.insert(
                name.clone(),
                Node::Regular {
                    data: Vec::new(),
                    meta: default_meta(opts.mode),
                },
            );
        }

        Ok(Box::new(MemFile {
            tree: self.tree.clone(),
            path: name,
            pos: 0,
            append: opts.append,
            dir_names: None,
            dir_cursor: 0,
        }))
    }

    fn remove(&self, name: &Path) -> Result<()> {
        let name = clean(name);
        let mut map = self.tree.lock().unwrap();
        match map.get(&name) {
            None => Err(not_found("remove", &name)),
            Some(Node::Directory { .. }) => {
                let has_children = map.keys().any(|p| p.parent() == Some(name.as_path()));
                if has_children {
                    return Err(BackupFsError::io(
                        "remove",
                        name.clone(),
                        io::Error::new(io::ErrorKind::Other, "directory not empty"),
                    ));
                }
                map.remove(&name);
                Ok(())
            }
            Some(_) => {
                map.remove(&name);
                Ok(())
            }
        }
    }

    fn remove_all(&self, name: &Path) -> Result<()> {
        let name = clean(name);
        let mut map = self.tree.lock().unwrap();
        if !map.contains_key(&name) {
            return Ok(());
        }
        let to_remove: Vec<PathBuf> = map
            .keys()
            .filter(|p| *p == &name || p.starts_with(&name))
            .cloned()
            .collect();
        for p in to_remove {
            map.remove(&p);
        }
        Ok(())
    }

    fn rename(&self, oldname: &Path, newname: &Path) -> Result<()> {
        let oldname = clean(oldname);
        let newname = clean(newname);
        let mut map = self.tree.lock().unwrap();
        if !map.contains_key(&oldname) {
            return Err(not_found("rename", &oldname));
        }
        if !Self::parent_dir_exists(&map, &newname) {
            return Err(not_found("rename", &newname));
        }
        let entries: Vec<(PathBuf, Node)> = map
            .iter()
            .filter(|(p, _)| *p == &oldname || p.starts_with(&oldname))
            .map(|(p, n)| (p.clone(), n.clone()))
            .collect();
        for (p, node) in entries {
            map.remove(&p);
            let rel = p.strip_prefix(&oldname).unwrap_or(Path::new(""));
            let target = if rel.as_os_str().is_empty() {
                newname.clone()
            } else {
                newname.join(rel)
            };
            map.insert(target, node);
        }
        Ok(())
    }

    fn stat(&self, name: &Path) -> Result<FileInfo> {
        let name = clean(name);
        let map = self.tree.lock().unwrap();
        let mut current = name.clone();
        for _ in 0..32 {
            match map.get(&current) {
                Some(Node::Symlink { target, .. }) => current = target.clone(),
                Some(node) => return Ok(node.info()),
                None => return Err(not_found("stat", &name)),
            }
        }
        Err(BackupFsError::io(
            "stat",
            name,
            io::Error::new(io::ErrorKind::Other, "too many levels of symbolic links"),
        ))
    }

    fn lstat(&self, name: &Path) -> Result<FileInfo> {
        let name = clean(name);
        let map = self.tree.lock().unwrap();
        map.get(&name).map(|n| n.info()).ok_or_else(|| not_found("lstat", &name))
    }

    fn chmod(&self, name: &Path, mode: u32) -> Result<()> {
        let name = clean(name);
        let mut map = self.tree.lock().unwrap();
        match map.get_mut(&name) {
            Some(Node::Regular { meta, .. }) | Some(Node::Directory { meta }) => {
                meta.mode = mode;
                Ok(())
            }
            Some(Node::Symlink { .. }) => Ok(()),
            None => Err(not_found("chmod", &name)),
        }
    }

    fn chown(&self, name: &Path, uid: i32, gid: i32) -> Result<()> {
        let name = clean(name);
        let mut map = self.tree.lock().unwrap();
        match map.get_mut(&name) {
            Some(Node::Regular { meta, .. }) | Some(Node::Directory { meta }) => {
                meta.uid = uid;
                meta.gid = gid;
                Ok(())
            }
            Some(Node::Symlink { .. }) => Ok(()),
            None => Err(not_found("chown", &name)),
        }
    }

    fn chtimes(&self, name: &Path, mtime_ns: i128) -> Result<()> {
        let name = clean(name);
        let mut map = self.tree.lock().unwrap();
        match map.get_mut(&name) {
            Some(Node::Regular { meta, .. }) | Some(Node::Directory { meta }) => {
                meta.mtime_ns = mtime_ns;
                Ok(())
            }
            Some(Node::Symlink { .. }) => Ok(()),
            None => Err(not_found("chtimes", &name)),
        }
    }

    fn symlink(&self, oldname: &Path, newname: &Path) -> Result<()> {
        let newname = clean(newname);
        let mut map = self.tree.lock().unwrap();
        if map.contains_key(&newname) {
            return Err(already_exists("symlink", &newname));
        }
        if !Self::parent_dir_exists(&map, &newname) {
            return Err(not_found("symlink", &newname));
        }
        map.insert(
            newname,
            Node::Symlink {
                target: oldname.to_path_buf(),
                meta: default_meta(0o777),
            },
        );
        Ok(())
    }

    fn readlink(&self, name: &Path) -> Result<PathBuf> {
        let name = clean(name);
        let map = self.tree.lock().unwrap();
        match map.get(&name) {
            Some(Node::Symlink { target, .. }) => Ok(target.clone()),
            Some(_) => Err(BackupFsError::io(
                "readlink",
                name,
                io::Error::new(io::ErrorKind::InvalidInput, "not a symlink"),
            )),
            None => Err(not_found("readlink", &name)),
        }
    }

    fn lchown(&self, name: &Path, uid: i32, gid: i32) -> Result<()> {
        let name = clean(name);
        let mut map = self.tree.lock().unwrap();
        match map.get_mut(&name) {
            Some(node) => {
                match node {
                    Node::Regular { meta, .. } | Node::Directory { meta } | Node::Symlink { meta, .. } => {
                        meta.uid = uid;
                        meta.gid = gid;
                    }
                }
                Ok(())
            }
            None => Err(not_found("lchown", &name)),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct MemFile {
    tree: Tree,
    path: PathBuf,
    pos: u64,
    append: bool,
    dir_names: Option<Vec<String>>,
    dir_cursor: usize,
}

impl Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let map = self.tree.lock().unwrap();
        match map.get(&self.path) {
            Some(Node::Regular { data, .. }) => {
                let start = self.pos as usize;
                if start >= data.len() {
                    return Ok(0);
                }
                let n = std::cmp::min(buf.len(), data.len() - start);
                buf[..n].copy_from_slice(&data[start..start + n]);
                self.pos += n as u64;
                Ok(n)
            }
            _ => Err(io::Error::from(io::ErrorKind::Unsupported)),
        }
    }
}

impl Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut map = self.tree.lock().unwrap();
        match map.get_mut(&self.path) {
            Some(Node::Regular { data, meta }) => {
                let start = if self.append { data.len() as u64 } else { self.pos };
                let start = start as usize;
                if data.len() < start {
                    data.resize(start, 0);
                }
                let end = start + buf.len();
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[start..end].copy_from_slice(buf);
                meta.size = data.len() as u64;
                meta.mtime_ns = now_ns();
                self.pos = end as u64;
                Ok(buf.len())
            }
            _ => Err(io::Error::from(io::ErrorKind::Unsupported)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let map = self.tree.lock().unwrap();
        let len = match map.get(&self.path) {
            Some(Node::Regular { data, .. }) => data.len() as u64,
            _ => 0,
        };
        let new_pos: i128 = match pos {
            SeekFrom::Start(p) => p as i128,
            SeekFrom::End(p) => len as i128 + p as i128,
            SeekFrom::Current(p) => self.pos as i128 + p as i128,
        };
        if new_pos < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "negative seek position"));
        }
        self.pos = new_pos as u64;
        Ok(self.pos)
    }
}

impl FsFile for MemFile {
    fn stat(&self) -> Result<FileInfo> {
        let map = self.tree.lock().unwrap();
        map.get(&self.path)
            .map(|n| n.info())
            .ok_or_else(|| not_found("stat", &self.path))
    }

    fn set_len(&self, size: u64) -> Result<()> {
        let mut map = self.tree.lock().unwrap();
        match map.get_mut(&self.path) {
            Some(Node::Regular { data, meta }) => {
                data.resize(size as usize, 0);
                meta.size = size;
                meta.mtime_ns = now_ns();
                Ok(())
            }
            _ => Err(not_found("truncate", &self.path)),
        }
    }

    fn sync_all(&self) -> Result<()> {
        Ok(())
    }

    fn readdir_names(&mut self, n: Option<usize>) -> Result<(Vec<String>, bool)> {
        let names = self
            .dir_names
            .as_ref()
            .ok_or_else(|| not_found("readdir", &self.path))?;
        let remaining = &names[self.dir_cursor..];
        let take = n.unwrap_or(remaining.len()).min(remaining.len());
        let out = remaining[..take].to_vec();
        self.dir_cursor += take;
        let eof = self.dir_cursor >= names.len();
        Ok((out, eof))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    #[test]
    fn create_write_read_round_trip() {
        let fs = MemFs::new();
        {
            let mut f = fs.create(Path::new("/a.txt")).unwrap();
            f.write_all(b"hello").unwrap();
        }
        let mut f = fs.open(Path::new("/a.txt")).unwrap();
        let mut buf = String::new();
        f.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "hello");
    }

    #[test]
    fn mkdir_all_then_stat() {
        let fs = MemFs::new();
        fs.mkdir_all(Path::new("/a/b/c"), 0o755).unwrap();
        assert!(fs.stat(Path::new("/a/b/c")).unwrap().is_dir());
        assert!(fs.stat(Path::new("/a/b")).unwrap().is_dir());
    }

    #[test]
    fn remove_all_removes_subtree() {
        let fs = MemFs::new();
        fs.mkdir_all(Path::new("/a/b"), 0o755).unwrap();
        fs.create(Path::new("/a/b/f.txt")).unwrap();
        fs.remove_all(Path::new("/a")).unwrap();
        assert!(fs.lstat(Path::new("/a")).is_err());
        assert!(fs.lstat(Path::new("/a/b/f.txt")).is_err());
    }

    #[test]
    fn rename_moves_subtree() {
        let fs = MemFs::new();
        fs.mkdir_all(Path::new("/a/b"), 0o755).unwrap();
        fs.create(Path::new("/a/b/f.txt")).unwrap();
        fs.rename(Path::new("/a"), Path::new("/z")).unwrap();
        assert!(fs.lstat(Path::new("/a")).is_err());
        assert!(fs.lstat(Path::new("/z/b/f.txt")).is_ok());
    }

    #[test]
    fn symlink_and_stat_follows_target() {
        let fs = MemFs::new();
        fs.create(Path::new("/real.txt")).unwrap();
        fs.symlink(Path::new("/real.txt"), Path::new("/link.txt")).unwrap();
        assert!(fs.lstat(Path::new("/link.txt")).unwrap().is_symlink());
        assert!(fs.stat(Path::new("/link.txt")).unwrap().is_regular());
        assert_eq!(fs.readlink(Path::new("/link.txt")).unwrap(), PathBuf::from("/real.txt"));
    }

    #[test]
    fn readdir_names_paginates_and_reports_eof() {
        let fs = MemFs::new();
        fs.mkdir(Path::new("/d"), 0o755).unwrap();
        for i in 0..5 {
            fs.create(&Path::new("/d").join(format!("f{i}"))).unwrap();
        }
        let mut handle = fs.open(Path::new("/d")).unwrap();
        let (first, eof1) = handle.readdir_names(Some(2)).unwrap();
        assert_eq!(first.len(), 2);
        assert!(!eof1);
        let (rest, eof2) = handle.readdir_names(None).unwrap();
        assert_eq!(rest.len(), 3);
        assert!(eof2);
    }

    #[test]
    fn create_new_on_existing_path_fails() {
        let fs = MemFs::new();
        fs.create(Path::new("/a.txt")).unwrap();
        let mut opts = OpenOptions::write_create_truncate(0o666);
        opts.create_new = true;
        assert!(fs.open_file(Path::new("/a.txt"), opts).is_err());
    }
}
