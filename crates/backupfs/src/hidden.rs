//! `HiddenFs` hides the *contents* of a configured set of subtrees from an
//! inner [`Fs`]: the root of a hidden subtree is still discoverable through
//! its parent's listing, but anything strictly inside it reports as if it
//! did not exist (or, for mutations, as permission denied).

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use backupfs_common::{BackupFsError, Result};

use crate::fs::{FileInfo, Fs, FsFile, OpenOptions};
use crate::path::{clean, most_separators_first, resolve_link_target};

pub struct HiddenFs {
    inner: Arc<dyn Fs>,
    /// Hidden roots, cleaned and sorted most-separators-first so deeper
    /// roots are checked before their ancestors.
    roots: Vec<PathBuf>,
    name: String,
}

impl HiddenFs {
    pub fn new(inner: Arc<dyn Fs>, hidden_roots: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut roots: Vec<PathBuf> = hidden_roots.into_iter().map(|p| clean(&p)).collect();
        roots.sort_by(|a, b| most_separators_first(a, b));
        Self {
            inner,
            roots,
            name: "hiddenfs".to_string(),
        }
    }

    /// True if `path` lies strictly inside a hidden root. The root itself
    /// is not hidden.
    fn is_hidden(&self, path: &Path) -> bool {
        let cleaned = clean(path);
        self.roots.iter().any(|root| cleaned.starts_with(root) && cleaned != *root)
    }

    /// True if `path` is a hidden root or an ancestor of one — used by
    /// `remove_all` to avoid walking into, or deleting the parent chain
    /// leading to, a hidden subtree.
    fn is_hidden_root_or_ancestor(&self, path: &Path) -> bool {
        let cleaned = clean(path);
        self.roots.iter().any(|root| *root == cleaned || root.starts_with(&cleaned))
    }

    fn hidden_not_found(&self, path: &Path) -> BackupFsError {
        BackupFsError::HiddenNotExist { path: path.to_path_buf() }
    }

    fn hidden_permission(&self, path: &Path) -> BackupFsError {
        BackupFsError::HiddenPermission { path: path.to_path_buf() }
    }
}

impl Fs for HiddenFs {
    fn mkdir(&self, name: &Path, perm: u32) -> Result<()> {
        if self.is_hidden(name) {
            return Err(self.hidden_permission(name));
        }
        self.inner.mkdir(name, perm)
    }

    fn mkdir_all(&self, name: &Path, perm: u32) -> Result<()> {
        if self.is_hidden(name) {
            return Err(self.hidden_permission(name));
        }
        self.inner.mkdir_all(name, perm)
    }

    fn open_file(&self, name: &Path, opts: OpenOptions) -> Result<Box<dyn FsFile>> {
        if self.is_hidden(name) {
            return Err(if opts.create || opts.create_new {
                self.hidden_permission(name)
            } else {
                self.hidden_not_found(name)
            });
        }
        let is_dir_listing = !opts.is_mutating();
        let inner = self.inner.open_file(name, opts)?;
        if is_dir_listing {
            Ok(Box::new(HiddenFile {
                inner,
                dir: name.to_path_buf(),
                roots: self.roots.clone(),
            }))
        } else {
            Ok(inner)
        }
    }

    fn remove(&self, name: &Path) -> Result<()> {
        if self.is_hidden(name) {
            return Err(self.hidden_not_found(name));
        }
        self.inner.remove(name)
    }

    fn remove_all(&self, name: &Path) -> Result<()> {
        if self.is_hidden(name) {
            return Err(self.hidden_not_found(name));
        }
        let name = clean(name);

        let info = match self.inner.lstat(&name) {
            Ok(info) => info,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        if !info.is_dir() {
            return self.inner.remove(&name);
        }

        let mut files = Vec::new();
        let mut dirs = vec![name.clone()];
        self.collect_subtree(&name, &mut files, &mut dirs)?;

        for f in files {
            self.inner.remove(&f)?;
        }

        dirs.sort_by(|a, b| most_separators_first(a, b));
        for d in dirs {
            if self.is_hidden_root_or_ancestor(&d) {
                continue;
            }
            self.inner.remove(&d)?;
        }

        Ok(())
    }

    fn rename(&self, oldname: &Path, newname: &Path) -> Result<()> {
        if self.is_hidden(oldname) {
            return Err(self.hidden_not_found(oldname));
        }
        if self.is_hidden(newname) {
            return Err(self.hidden_permission(newname));
        }
        self.inner.rename(oldname, newname)
    }

    fn stat(&self, name: &Path) -> Result<FileInfo> {
        if self.is_hidden(name) {
            return Err(self.hidden_not_found(name));
        }
        self.inner.stat(name)
    }

    fn lstat(&self, name: &Path) -> Result<FileInfo> {
        if self.is_hidden(name) {
            return Err(self.hidden_not_found(name));
        }
        self.inner.lstat(name)
    }

    fn chmod(&self, name: &Path, mode: u32) -> Result<()> {
        if self.is_hidden(name) {
            return Err(self.hidden_not_found(name));
        }
        self.inner.chmod(name, mode)
    }

    fn chown(&self, name: &Path, uid: i32, gid: i32) -> Result<()> {
        if self.is_hidden(name) {
            return Err(self.hidden_not_found(name));
        }
        self.inner.chown(name, uid, gid)
    }

    fn chtimes(&self, name: &Path, mtime_ns: i128) -> Result<()> {
        if self.is_hidden(name) {
            return Err(self.hidden_not_found(name));
        }
        self.inner.chtimes(name, mtime_ns)
    }

    fn symlink(&self, oldname: &Path, newname: &Path) -> Result<()> {
        if self.is_hidden(newname) {
            return Err(self.hidden_permission(newname));
        }
        let check_target = resolve_link_target(oldname, newname);
        if self.is_hidden(&check_target) {
            return Err(self.hidden_permission(newname));
        }
        self.inner.symlink(oldname, newname)
    }

    fn readlink(&self, name: &Path) -> Result<PathBuf> {
        if self.is_hidden(name) {
            return Err(self.hidden_not_found(name));
        }
        self.inner.readlink(name)
    }

    fn lchown(&self, name: &Path, uid: i32, gid: i32) -> Result<()> {
        if self.is_hidden(name) {
            return Err(self.hidden_not_found(name));
        }
        self.inner.lchown(name, uid, gid)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl HiddenFs {
    fn collect_subtree(&self, dir: &Path, files: &mut Vec<PathBuf>, dirs: &mut Vec<PathBuf>) -> Result<()> {
        let mut handle = self.inner.open(dir)?;
        loop {
            let (names, eof) = handle.readdir_names(Some(256))?;
            for name in names {
                let child = dir.join(&name);
                if self.roots.iter().any(|r| *r == child) || self.is_hidden(&child) {
                    // A hidden root itself is never walked into or deleted;
                    // entries strictly inside one are invisible.
                    continue;
                }
                match self.inner.lstat(&child) {
                    Ok(info) if info.is_dir() => {
                        dirs.push(child.clone());
                        self.collect_subtree(&child, files, dirs)?;
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

struct HiddenFile {
    inner: Box<dyn FsFile>,
    dir: PathBuf,
    roots: Vec<PathBuf>,
}

impl HiddenFile {
    fn is_hidden(&self, child: &Path) -> bool {
        self.roots.iter().any(|root| child.starts_with(root) && child != root)
    }
}

impl Read for HiddenFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for HiddenFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl Seek for HiddenFile {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl FsFile for HiddenFile {
    fn stat(&self) -> Result<FileInfo> {
        self.inner.stat()
    }

    fn set_len(&self, size: u64) -> Result<()> {
        self.inner.set_len(size)
    }

    fn sync_all(&self) -> Result<()> {
        self.inner.sync_all()
    }

    /// Keeps reading from the inner handle until `n` visible entries have
    /// been collected or the inner listing hits EOF, so a hidden entry
    /// never shrinks the page the caller sees.
    fn readdir_names(&mut self, n: Option<usize>) -> Result<(Vec<String>, bool)> {
        let mut out = Vec::new();
        loop {
            let want = n.map(|n| n.saturating_sub(out.len()).max(1));
            let (names, eof) = self.inner.readdir_names(want)?;
            for name in names {
                if !self.is_hidden(&self.dir.join(&name)) {
                    out.push(name);
                }
            }
            let enough = n.map(|n| out.len() >= n).unwrap_or(false);
            if eof || enough {
                return Ok((out, eof));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem_fs::MemFs;

    fn setup() -> HiddenFs {
        let inner: Arc<dyn Fs> = Arc::new(MemFs::new());
        inner.mkdir_all(Path::new("/a/secret/deep"), 0o755).unwrap();
        inner.create(Path::new("/a/secret/file.txt")).unwrap();
        inner.create(Path::new("/a/visible.txt")).unwrap();
        HiddenFs::new(inner, vec![PathBuf::from("/a/secret")])
    }

    #[test]
    fn hidden_root_itself_is_visible() {
        let fs = setup();
        assert!(fs.stat(Path::new("/a/secret")).unwrap().is_dir());
    }

    #[test]
    fn hidden_contents_report_not_found() {
        let fs = setup();
        let err = fs.stat(Path::new("/a/secret/file.txt")).unwrap_err();
        assert!(matches!(err, BackupFsError::HiddenNotExist { .. }));
    }

    #[test]
    fn mkdir_under_hidden_root_is_permission_denied() {
        let fs = setup();
        let err = fs.mkdir(Path::new("/a/secret/newdir"), 0o755).unwrap_err();
        assert!(matches!(err, BackupFsError::HiddenPermission { .. }));
    }

    #[test]
    fn open_without_create_under_hidden_is_not_found() {
        let fs = setup();
        let err = fs.open(Path::new("/a/secret/file.txt")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn listing_filters_hidden_entries() {
        let fs = setup();
        let mut handle = fs.open(Path::new("/a")).unwrap();
        let (names, eof) = handle.readdir_names(None).unwrap();
        assert!(eof);
        assert!(names.contains(&"secret".to_string()));
        assert!(names.contains(&"visible.txt".to_string()));
    }

    #[test]
    fn remove_all_skips_hidden_subtree_and_its_ancestors() {
        let fs = setup();
        fs.remove_all(Path::new("/a")).unwrap();
        assert!(fs.stat(Path::new("/a/secret")).unwrap().is_dir());
        assert!(fs.stat(Path::new("/a/secret/file.txt")).is_err());
        assert!(fs.stat(Path::new("/a/visible.txt")).is_err());
        assert!(fs.stat(Path::new("/a")).unwrap().is_dir());
    }

    #[test]
    fn symlink_into_hidden_subtree_is_rejected() {
        let fs = setup();
        let err = fs
            .symlink(Path::new("/a/visible.txt"), Path::new("/a/secret/link"))
            .unwrap_err();
        assert!(matches!(err, BackupFsError::HiddenPermission { .. }));
    }
}
