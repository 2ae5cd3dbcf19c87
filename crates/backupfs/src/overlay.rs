//! `BackupFs` — the copy-on-first-write transactional overlay. Wraps a
//! base `Fs` and a backup `Fs`; every mutation is preceded by a best-effort
//! snapshot of the pre-mutation state into the backup, recorded once per
//! path in a `BaseInfoIndex`. `rollback` replays that index to restore the
//! base to its pre-transaction state.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use backupfs_common::{BackupFsError, Result};

use crate::copy::{copy_dir, copy_file, copy_symlink, restore_file, restore_symlink};
use crate::fs::{FileInfo, FileKind, Fs, FsFile, OpenOptions};
use crate::index::{BaseInfoIndex, IndexEntry};
use crate::path::{clean, for_each_ancestor, is_root, least_separators_first, most_separators_first, volume_name};

/// The copy-on-first-write overlay described in §4.6. Cheaply `Clone`-able
/// (every field is an `Arc`/`Mutex`); clones share the same index and the
/// same underlying base/backup filesystems.
#[derive(Clone)]
pub struct BackupFs {
    base: Arc<dyn Fs>,
    backup: Arc<dyn Fs>,
    index: Arc<Mutex<BaseInfoIndex>>,
    allow_volume_paths: bool,
    name: String,
}

impl BackupFs {
    pub fn new(base: Arc<dyn Fs>, backup: Arc<dyn Fs>) -> Self {
        Self {
            base,
            backup,
            index: Arc::new(Mutex::new(BaseInfoIndex::new())),
            allow_volume_paths: false,
            name: "backupfs".to_string(),
        }
    }

    /// Allows absolute paths carrying a Windows volume designator through
    /// unrejected. Off by default: a base `Fs` that itself manages volumes
    /// would see an ambiguous path otherwise.
    pub fn with_volume_paths_allowed(mut self, allowed: bool) -> Self {
        self.allow_volume_paths = allowed;
        self
    }

    /// Serializes the current `BaseInfoIndex` to its JSON wire format
    /// (§6.2), e.g. for persisting across a process restart.
    pub fn index_to_json(&self) -> Result<String> {
        self.index.lock().unwrap().to_json_string()
    }

    /// Replaces the current index with one deserialized from JSON,
    /// discarding whatever was recorded before. Used to resume a
    /// transaction a previous overlay instance started.
    pub fn load_index_from_json(&self, json: &str) -> Result<()> {
        let restored = BaseInfoIndex::from_json_str(json)?;
        *self.index.lock().unwrap() = restored;
        Ok(())
    }

    fn real_path(&self, name: &Path) -> Result<PathBuf> {
        let cleaned = clean(name);
        if !self.allow_volume_paths && volume_name(&cleaned).is_some() {
            return Err(BackupFsError::io(
                "realpath",
                cleaned,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "volume designator not allowed"),
            ));
        }
        Ok(cleaned)
    }

    /// Records `path`'s current base state in the index if not already
    /// recorded (lazy, first-observation indexing per §4.6.2).
    fn tracked_stat_inner(&self, path: &Path, follow_symlinks: bool) -> Result<FileInfo> {
        let result = if follow_symlinks {
            self.base.stat(path)
        } else {
            self.base.lstat(path)
        };

        let mut index = self.index.lock().unwrap();
        match &result {
            Ok(info) => {
                index.observe(path.to_path_buf(), Some(IndexEntry::from_file_info(info)));
            }
            Err(e) if e.is_not_found() => {
                index.observe(path.to_path_buf(), None);
            }
            Err(_) => {}
        }
        drop(index);
        result
    }

    /// Walks every ancestor of `path` (not `path` itself) recording each
    /// one's state if not already indexed, so `Rollback` can later
    /// reconstruct the full parent chain.
    fn index_ancestors(&self, path: &Path) {
        let parent_chain: Vec<PathBuf> = path
            .parent()
            .map(|p| {
                let mut out = Vec::new();
                for_each_ancestor(p, |a| {
                    out.push(a.to_path_buf());
                    true
                });
                out
            })
            .unwrap_or_default();

        for ancestor in parent_chain {
            let already = self.index.lock().unwrap().contains(&ancestor);
            if !already {
                let _ = self.tracked_stat_inner(&ancestor, false);
            }
        }
    }

    /// `stat`/`lstat` share this: index every ancestor, then the path
    /// itself, surfacing the original error (not-found included) to the
    /// caller while still recording it.
    fn tracked(&self, name: &Path, follow_symlinks: bool) -> Result<FileInfo> {
        let path = self.real_path(name)?;
        self.index_ancestors(&path);
        self.tracked_stat_inner(&path, follow_symlinks)
    }

    /// §4.6.3: decide whether `path` still needs a backup, returning the
    /// base metadata to back up (if any) and whether to proceed.
    fn backup_required(&self, path: &Path) -> Result<(Option<FileInfo>, bool)> {
        let recorded = {
            let mut index = self.index.lock().unwrap();
            match index.get(path) {
                Some(entry) => entry,
                None => {
                    drop(index);
                    let lstat = self.base.lstat(path);
                    let value = match &lstat {
                        Ok(info) => Some(IndexEntry::from_file_info(info)),
                        Err(e) if e.is_not_found() => None,
                        Err(e) => return Err(e.clone_for_index()),
                    };
                    index = self.index.lock().unwrap();
                    index.observe(path.to_path_buf(), value);
                    index.get(path).unwrap()
                }
            }
        };

        let entry = match recorded {
            Some(entry) => entry,
            None => return Ok((None, false)),
        };

        if self.backup.lstat(path).is_ok() {
            return Ok((Some(entry.to_file_info()), false));
        }

        Ok((Some(entry.to_file_info()), true))
    }

    /// §4.6.4: materialize a backup of `name` (and every ancestor directory
    /// of its containing directory that itself still needs one) if
    /// required.
    fn try_backup(&self, name: &Path) -> Result<()> {
        let (info, needs) = self.backup_required(name)?;
        let Some(info) = info else { return Ok(()) };
        if !needs {
            return Ok(());
        }

        let dir_path: PathBuf = if info.is_dir() { name.to_path_buf() } else {
            name.parent().map(|p| p.to_path_buf()).unwrap_or_else(|| PathBuf::from("/"))
        };

        let mut ancestors = Vec::new();
        for_each_ancestor(&dir_path, |a| {
            ancestors.push(a.to_path_buf());
            true
        });
        for ancestor in ancestors {
            if is_root(&ancestor) {
                continue;
            }
            let (ancestor_info, ancestor_needs) = self.backup_required(&ancestor)?;
            if let (Some(ancestor_info), true) = (ancestor_info, ancestor_needs) {
                copy_dir(self.backup.as_ref(), &ancestor, &ancestor_info)?;
            }
        }

        match info.kind {
            FileKind::Directory => {}
            FileKind::Regular => {
                let mut handle = self.base.open(name)?;
                copy_file(self.backup.as_ref(), name, &info, &mut *handle)?;
            }
            FileKind::Symlink => {
                copy_symlink(self.base.as_ref(), name, name, &info)?;
            }
            FileKind::Other => {}
        }

        Ok(())
    }

    /// Runs `try_backup` on `path`, tracking it first if it is not yet in
    /// the index so the backup decision has metadata to work from.
    fn backup_before_mutate(&self, path: &Path) -> Result<()> {
        self.index_ancestors(path);
        if self.index.lock().unwrap().get(path).is_none() {
            let _ = self.tracked_stat_inner(path, false);
        }
        self.try_backup(path)
    }

    /// §4.6.5's `ForceBackup`: remove any existing backup at `name`, purge
    /// the removed paths from the index, then back up again. Two-phase —
    /// if removal succeeds but the fresh backup fails, the path is left
    /// un-backed-up and purged from the index, so the next mutation
    /// re-snapshots it.
    pub fn force_backup(&self, name: &Path) -> Result<()> {
        let path = self.real_path(name)?;

        if let Ok(info) = self.backup.lstat(&path) {
            if info.is_dir() {
                let mut to_remove = vec![path.clone()];
                self.collect_backup_subtree(&path, &mut to_remove)?;
                to_remove.sort_by(|a, b| most_separators_first(a, b));
                for p in &to_remove {
                    if self.backup.remove(p).is_ok() {
                        self.index.lock().unwrap().remove(p);
                    }
                }
            } else if self.backup.remove(&path).is_ok() {
                self.index.lock().unwrap().remove(&path);
            }
        }

        self.index.lock().unwrap().remove(&path);
        self.backup_before_mutate(&path)
    }

    fn collect_backup_subtree(&self, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
        let mut handle = self.backup.open(dir)?;
        loop {
            let (names, eof) = handle.readdir_names(Some(256))?;
            for name in names {
                let child = dir.join(&name);
                match self.backup.lstat(&child) {
                    Ok(info) if info.is_dir() => {
                        out.push(child.clone());
                        self.collect_backup_subtree(&child, out)?;
                    }
                    Ok(_) => out.push(child),
                    Err(_) => {}
                }
            }
            if eof {
                break;
            }
        }
        Ok(())
    }

    /// §4.6.6: restore the base filesystem to its pre-transaction state and
    /// clear the index. Holds the overlay's mutex for the entire operation;
    /// no other operation may run concurrently.
    pub fn rollback(&self) -> Result<()> {
        let index = self.index.lock().unwrap();

        let mut remove_list = Vec::new();
        let mut restore_dirs = Vec::new();
        let mut restore_files = Vec::new();
        let mut restore_symlinks = Vec::new();

        for (path, value) in index.iter() {
            match value {
                None => remove_list.push(path.clone()),
                Some(entry) => match entry.kind {
                    crate::index::EntryKind::Directory => restore_dirs.push((path.clone(), *entry)),
                    crate::index::EntryKind::Regular => restore_files.push((path.clone(), *entry)),
                    crate::index::EntryKind::Symlink => restore_symlinks.push((path.clone(), *entry)),
                    crate::index::EntryKind::Other => {
                        log::warn!("rollback: skipping unknown entity kind at {}", path.display());
                    }
                },
            }
        }
        drop(index);

        remove_list.sort_by(|a, b| most_separators_first(a, b));
        for path in &remove_list {
            if self.base.lstat(path).is_ok() {
                let _ = self.base.remove(path);
            }
        }

        restore_dirs.sort_by(|(a, _), (b, _)| least_separators_first(a, b));
        for (path, entry) in &restore_dirs {
            copy_dir(self.base.as_ref(), path, &entry.to_file_info()).map_err(|e| {
                BackupFsError::RollbackFailed {
                    message: format!("restoring directory {}", path.display()),
                    source: Some(Box::new(e)),
                }
            })?;
        }

        restore_files.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (path, entry) in &restore_files {
            restore_file(&self.base, &self.backup, path, &entry.to_file_info()).map_err(|e| {
                BackupFsError::RollbackFailed {
                    message: format!("restoring file {}", path.display()),
                    source: Some(Box::new(e)),
                }
            })?;
        }

        restore_symlinks.sort_by(|(a, _), (b, _)| a.cmp(b));
        let mut restored_symlinks = Vec::new();
        for (path, entry) in &restore_symlinks {
            restore_symlink(&self.base, &self.backup, path, &entry.to_file_info()).map_err(|e| {
                BackupFsError::RollbackFailed {
                    message: format!("restoring symlink {}", path.display()),
                    source: Some(Box::new(e)),
                }
            })?;
            restored_symlinks.push(path.clone());
        }

        for path in restored_symlinks.iter().rev() {
            let _ = self.backup.remove(path);
        }
        let mut restored_files: Vec<PathBuf> = restore_files.iter().map(|(p, _)| p.clone()).collect();
        restored_files.sort_by(|a, b| most_separators_first(a, b));
        for path in &restored_files {
            let _ = self.backup.remove(path);
        }
        let mut restored_dirs: Vec<PathBuf> = restore_dirs.iter().map(|(p, _)| p.clone()).collect();
        restored_dirs.sort_by(|a, b| most_separators_first(a, b));
        for path in &restored_dirs {
            let _ = self.backup.remove_all(path);
        }

        self.index.lock().unwrap().clear();
        Ok(())
    }
}

/// `BackupFsError` does not implement `Clone` (its `#[source] io::Error`
/// doesn't either); `backup_required` needs to return an owned error from
/// inside a closure that only borrows one. Reconstructing an equivalent
/// `Io` variant is enough since the only fields that matter to a caller are
/// op/path/kind.
trait CloneForIndex {
    fn clone_for_index(&self) -> BackupFsError;
}

impl CloneForIndex for BackupFsError {
    fn clone_for_index(&self) -> BackupFsError {
        match self {
            BackupFsError::Io { op, path, source } => {
                BackupFsError::io(op, path.clone(), std::io::Error::from(source.kind()))
            }
            other => BackupFsError::io(
                "stat",
                PathBuf::new(),
                std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
            ),
        }
    }
}

impl Fs for BackupFs {
    fn mkdir(&self, name: &Path, perm: u32) -> Result<()> {
        let path = self.real_path(name)?;
        self.backup_before_mutate(&path)?;
        self.base.mkdir(&path, perm)
    }

    fn mkdir_all(&self, name: &Path, perm: u32) -> Result<()> {
        let path = self.real_path(name)?;
        let mut ancestors = Vec::new();
        for_each_ancestor(&path, |a| {
            ancestors.push(a.to_path_buf());
            true
        });
        for ancestor in &ancestors {
            self.backup_before_mutate(ancestor)?;
        }
        self.base.mkdir_all(&path, perm)
    }

    fn open_file(&self, name: &Path, opts: OpenOptions) -> Result<Box<dyn FsFile>> {
        let path = self.real_path(name)?;
        if opts.is_mutating() {
            self.backup_before_mutate(&path)?;
        }
        self.base.open_file(&path, opts)
    }

    fn remove(&self, name: &Path) -> Result<()> {
        let path = self.real_path(name)?;
        self.backup_before_mutate(&path)?;
        self.base.remove(&path)
    }

    fn remove_all(&self, name: &Path) -> Result<()> {
        let path = self.real_path(name)?;

        let info = match self.base.lstat(&path) {
            Ok(info) => info,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        if !info.is_dir() {
            return self.remove(&path);
        }

        let mut files = Vec::new();
        let mut dirs = vec![path.clone()];
        self.collect_base_subtree(&path, &mut files, &mut dirs)?;

        for f in &files {
            self.remove(f)?;
        }

        dirs.sort_by(|a, b| most_separators_first(a, b));
        for d in &dirs {
            self.remove(d)?;
        }

        Ok(())
    }

    fn rename(&self, oldname: &Path, newname: &Path) -> Result<()> {
        let old_path = self.real_path(oldname)?;
        let new_path = self.real_path(newname)?;
        self.backup_before_mutate(&old_path)?;
        self.backup_before_mutate(&new_path)?;
        self.base.rename(&old_path, &new_path)
    }

    fn stat(&self, name: &Path) -> Result<FileInfo> {
        self.tracked(name, true)
    }

    fn lstat(&self, name: &Path) -> Result<FileInfo> {
        self.tracked(name, false)
    }

    fn chmod(&self, name: &Path, mode: u32) -> Result<()> {
        let path = self.real_path(name)?;
        self.backup_before_mutate(&path)?;
        self.base.chmod(&path, mode)
    }

    fn chown(&self, name: &Path, uid: i32, gid: i32) -> Result<()> {
        let path = self.real_path(name)?;
        self.backup_before_mutate(&path)?;
        self.base.chown(&path, uid, gid)
    }

    fn chtimes(&self, name: &Path, mtime_ns: i128) -> Result<()> {
        let path = self.real_path(name)?;
        self.backup_before_mutate(&path)?;
        self.base.chtimes(&path, mtime_ns)
    }

    fn symlink(&self, oldname: &Path, newname: &Path) -> Result<()> {
        let new_path = self.real_path(newname)?;
        self.backup_before_mutate(&new_path)?;
        self.base.symlink(oldname, &new_path)
    }

    fn readlink(&self, name: &Path) -> Result<PathBuf> {
        let path = self.real_path(name)?;
        self.index_ancestors(&path);
        self.base.readlink(&path)
    }

    fn lchown(&self, name: &Path, uid: i32, gid: i32) -> Result<()> {
        let path = self.real_path(name)?;
        self.backup_before_mutate(&path)?;
        self.base.lchown(&path, uid, gid)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl BackupFs {
    fn collect_base_subtree(&self, dir: &Path, files: &mut Vec<PathBuf>, dirs: &mut Vec<PathBuf>) -> Result<()> {
        let mut handle = self.base.open(dir)?;
        loop {
            let (names, eof) = handle.readdir_names(Some(256))?;
            for name in names {
                let child = dir.join(&name);
                match self.base.lstat(&child) {
                    Ok(info) if info.is_dir() => {
                        dirs.push(child.clone());
                        self.collect_base_subtree(&child, files, dirs)?;
                    }
                    Ok(_) => files.push(child),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
            if eof {
                break;
            }
        }
        Ok(())
    }
}

/// A thin seekable wrapper so `open`/`create` callers get the same
/// `Box<dyn FsFile>` surface whether or not a mutation triggered a backup
/// first; `BackupFs` otherwise just hands back the base handle directly.
#[allow(dead_code)]
struct PassthroughFile {
    inner: Box<dyn FsFile>,
}

impl Read for PassthroughFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for PassthroughFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl Seek for PassthroughFile {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl FsFile for PassthroughFile {
    fn stat(&self) -> Result<FileInfo> {
        self.inner.stat()
    }

    fn set_len(&self, size: u64) -> Result<()> {
        self.inner.set_len(size)
    }

    fn sync_all(&self) -> Result<()> {
        self.inner.sync_all()
    }

    fn readdir_names(&mut self, n: Option<usize>) -> Result<(Vec<String>, bool)> {
        self.inner.readdir_names(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem_fs::MemFs;
    use std::io::{Read as _, Write as _};

    fn overlay() -> BackupFs {
        BackupFs::new(Arc::new(MemFs::new()), Arc::new(MemFs::new()))
    }

    #[test]
    fn overwrite_then_rollback_restores_original_content() {
        let fs = overlay();
        {
            let mut f = fs.base.create(Path::new("/test.txt")).unwrap();
            f.write_all(b"original text").unwrap();
        }

        {
            let mut f = fs.create(Path::new("/test.txt")).unwrap();
            f.write_all(b"new content").unwrap();
        }

        let mut current = String::new();
        fs.open(Path::new("/test.txt")).unwrap().read_to_string(&mut current).unwrap();
        assert_eq!(current, "new content");

        fs.rollback().unwrap();

        let mut restored = String::new();
        fs.base.open(Path::new("/test.txt")).unwrap().read_to_string(&mut restored).unwrap();
        assert_eq!(restored, "original text");
        assert!(fs.backup.lstat(Path::new("/test.txt")).is_err());
    }

    #[test]
    fn create_then_rollback_removes_new_entity() {
        let fs = overlay();
        fs.base.mkdir(Path::new("/var"), 0o755).unwrap();

        {
            let mut f = fs.create(Path::new("/var/new.txt")).unwrap();
            f.write_all(b"x").unwrap();
        }
        assert!(fs.base.lstat(Path::new("/var/new.txt")).is_ok());

        fs.rollback().unwrap();

        assert!(fs.base.lstat(Path::new("/var/new.txt")).is_err());
        assert!(fs.base.lstat(Path::new("/var")).is_ok());
    }

    #[test]
    fn copy_on_first_write_backs_up_only_once() {
        let fs = overlay();
        {
            let mut f = fs.base.create(Path::new("/a.txt")).unwrap();
            f.write_all(b"v1").unwrap();
        }

        {
            let mut f = fs.create(Path::new("/a.txt")).unwrap();
            f.write_all(b"v2").unwrap();
        }
        {
            let mut f = fs.create(Path::new("/a.txt")).unwrap();
            f.write_all(b"v3").unwrap();
        }

        let mut backed_up = String::new();
        fs.backup.open(Path::new("/a.txt")).unwrap().read_to_string(&mut backed_up).unwrap();
        assert_eq!(backed_up, "v1");
    }

    #[test]
    fn rollback_twice_is_idempotent() {
        let fs = overlay();
        fs.base.create(Path::new("/a.txt")).unwrap();
        fs.remove(Path::new("/a.txt")).unwrap();
        fs.rollback().unwrap();
        fs.rollback().unwrap();
        assert!(fs.base.lstat(Path::new("/a.txt")).is_ok());
    }

    #[test]
    fn remove_all_of_populated_tree_then_rollback() {
        let fs = overlay();
        fs.base.mkdir_all(Path::new("/test/001"), 0o755).unwrap();
        fs.base.mkdir_all(Path::new("/test/0/2"), 0o755).unwrap();
        for p in ["/test/001/test01.txt", "/test/001/test02.txt", "/test/0/2/test03.txt", "/test/0/2/test04.txt"] {
            let mut f = fs.base.create(Path::new(p)).unwrap();
            f.write_all(b"c").unwrap();
        }

        fs.remove_all(Path::new("/test")).unwrap();
        assert!(fs.base.lstat(Path::new("/test")).is_err());

        fs.rollback().unwrap();

        assert!(fs.base.lstat(Path::new("/test")).is_ok());
        let mut content = String::new();
        fs.base.open(Path::new("/test/001/test01.txt")).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "c");
    }

    #[test]
    fn rename_then_rollback_restores_original_name() {
        let fs = overlay();
        fs.base.mkdir(Path::new("/test"), 0o755).unwrap();
        fs.base.mkdir(Path::new("/test/rename"), 0o755).unwrap();

        fs.rename(Path::new("/test/rename"), Path::new("/test/rename2")).unwrap();
        fs.rename(Path::new("/test/rename2"), Path::new("/test/rename3")).unwrap();

        fs.rollback().unwrap();

        assert!(fs.base.lstat(Path::new("/test/rename")).is_ok());
        assert!(fs.base.lstat(Path::new("/test/rename2")).is_err());
        assert!(fs.base.lstat(Path::new("/test/rename3")).is_err());
    }

    #[test]
    fn force_backup_after_deletion_then_rollback_leaves_base_absent() {
        let fs = overlay();
        fs.base.mkdir(Path::new("/test"), 0o755).unwrap();
        fs.base.mkdir(Path::new("/test/001"), 0o755).unwrap();
        fs.base.create(Path::new("/test/001/test01.txt")).unwrap();

        fs.remove_all(Path::new("/test/001")).unwrap();
        fs.force_backup(Path::new("/test/001")).unwrap();

        fs.rollback().unwrap();

        assert!(fs.base.lstat(Path::new("/test/001")).is_err());
    }

    #[test]
    fn volume_paths_rejected_by_default() {
        let fs = overlay();
        let err = fs.stat(Path::new("C:/a")).unwrap_err();
        assert!(matches!(err, BackupFsError::Io { .. }));
    }
}
