//! `PrefixFs` confines every operation on an inner [`Fs`] to a fixed root
//! directory: callers see a filesystem rooted at `/`, while every path is
//! actually rewritten under `prefix` before reaching the inner `Fs`.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use backupfs_common::{BackupFsError, Result};

use crate::fs::{FileInfo, Fs, FsFile, OpenOptions};
use crate::path::{clean, is_root, resolve_link_target, trim_volume};

/// Confines `inner` to `prefix`. Every path this wrapper is given is
/// resolved against `prefix` before reaching `inner`; paths returned to the
/// caller (via `Readlink`, error messages) have `prefix` stripped back off.
pub struct PrefixFs {
    inner: Arc<dyn Fs>,
    prefix: PathBuf,
    name: String,
}

impl PrefixFs {
    pub fn new(inner: Arc<dyn Fs>, prefix: impl Into<PathBuf>) -> Self {
        let prefix = clean(&prefix.into());
        Self {
            inner,
            prefix,
            name: "prefixfs".to_string(),
        }
    }

    /// Resolves a public path to the path `inner` should see, rejecting any
    /// path that would escape `prefix` via `..` or a volume designator.
    fn resolve(&self, name: &Path) -> Result<PathBuf> {
        let stripped = trim_volume(name);
        let cleaned = clean(&stripped);
        let effective = if is_root(&cleaned) {
            self.prefix.clone()
        } else {
            let rel = cleaned.strip_prefix("/").unwrap_or(&cleaned);
            self.prefix.join(rel)
        };
        if !effective.starts_with(&self.prefix) {
            return Err(not_found("prefix", name));
        }
        Ok(effective)
    }

    /// Strips `prefix` back off an inner path for display to the caller.
    fn unresolve(&self, inner_path: &Path) -> PathBuf {
        match inner_path.strip_prefix(&self.prefix) {
            Ok(rel) if rel.as_os_str().is_empty() => PathBuf::from("/"),
            Ok(rel) => PathBuf::from("/").join(rel),
            Err(_) => inner_path.to_path_buf(),
        }
    }
}

fn not_found(op: &'static str, path: &Path) -> BackupFsError {
    BackupFsError::io(
        op,
        path.to_path_buf(),
        std::io::Error::from(std::io::ErrorKind::NotFound),
    )
}

impl Fs for PrefixFs {
    fn mkdir(&self, name: &Path, perm: u32) -> Result<()> {
        self.inner.mkdir(&self.resolve(name)?, perm)
    }

    fn mkdir_all(&self, name: &Path, perm: u32) -> Result<()> {
        self.inner.mkdir_all(&self.resolve(name)?, perm)
    }

    fn open_file(&self, name: &Path, opts: OpenOptions) -> Result<Box<dyn FsFile>> {
        let effective = self.resolve(name)?;
        let inner = self.inner.open_file(&effective, opts)?;
        Ok(Box::new(PrefixFile { inner }))
    }

    fn remove(&self, name: &Path) -> Result<()> {
        self.inner.remove(&self.resolve(name)?)
    }

    fn remove_all(&self, name: &Path) -> Result<()> {
        self.inner.remove_all(&self.resolve(name)?)
    }

    fn rename(&self, oldname: &Path, newname: &Path) -> Result<()> {
        self.inner.rename(&self.resolve(oldname)?, &self.resolve(newname)?)
    }

    fn stat(&self, name: &Path) -> Result<FileInfo> {
        self.inner.stat(&self.resolve(name)?)
    }

    fn lstat(&self, name: &Path) -> Result<FileInfo> {
        self.inner.lstat(&self.resolve(name)?)
    }

    fn chmod(&self, name: &Path, mode: u32) -> Result<()> {
        self.inner.chmod(&self.resolve(name)?, mode)
    }

    fn chown(&self, name: &Path, uid: i32, gid: i32) -> Result<()> {
        self.inner.chown(&self.resolve(name)?, uid, gid)
    }

    fn chtimes(&self, name: &Path, mtime_ns: i128) -> Result<()> {
        self.inner.chtimes(&self.resolve(name)?, mtime_ns)
    }

    fn symlink(&self, oldname: &Path, newname: &Path) -> Result<()> {
        let effective_new = self.resolve(newname)?;
        if oldname.is_absolute() {
            let effective_old = self.resolve(oldname)?;
            self.inner.symlink(&effective_old, &effective_new)
        } else {
            let target = resolve_link_target(oldname, newname);
            self.resolve(&target).map_err(|_| BackupFsError::PrefixSymlinkEscape {
                old: oldname.to_path_buf(),
                new: newname.to_path_buf(),
            })?;
            self.inner.symlink(oldname, &effective_new)
        }
    }

    fn readlink(&self, name: &Path) -> Result<PathBuf> {
        let target = self.inner.readlink(&self.resolve(name)?)?;
        Ok(self.unresolve(&target))
    }

    fn lchown(&self, name: &Path, uid: i32, gid: i32) -> Result<()> {
        self.inner.lchown(&self.resolve(name)?, uid, gid)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct PrefixFile {
    inner: Box<dyn FsFile>,
}

impl Read for PrefixFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for PrefixFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl Seek for PrefixFile {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl FsFile for PrefixFile {
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

    fn rooted() -> PrefixFs {
        let inner: Arc<dyn Fs> = Arc::new(MemFs::new());
        inner.mkdir_all(Path::new("/jail"), 0o755).unwrap();
        PrefixFs::new(inner, "/jail")
    }

    #[test]
    fn create_lands_under_prefix() {
        let fs = rooted();
        fs.create(Path::new("/a.txt")).unwrap();
        assert!(fs.stat(Path::new("/a.txt")).unwrap().is_regular());
    }

    #[test]
    fn dotdot_escape_is_rejected() {
        let fs = rooted();
        let err = fs.stat(Path::new("/../etc/passwd")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn root_maps_to_prefix_root() {
        let fs = rooted();
        assert!(fs.stat(Path::new("/")).unwrap().is_dir());
    }

    #[test]
    fn readlink_strips_prefix() {
        let inner: Arc<dyn Fs> = Arc::new(MemFs::new());
        inner.mkdir_all(Path::new("/jail"), 0o755).unwrap();
        inner.create(Path::new("/jail/real.txt")).unwrap();
        inner
            .symlink(Path::new("/jail/real.txt"), Path::new("/jail/link.txt"))
            .unwrap();
        let fs = PrefixFs::new(inner, "/jail");
        let target = fs.readlink(Path::new("/link.txt")).unwrap();
        assert_eq!(target, PathBuf::from("/real.txt"));
    }

    #[test]
    fn relative_symlink_escaping_prefix_is_rejected() {
        let fs = rooted();
        let err = fs.symlink(Path::new("../../outside"), Path::new("/link")).unwrap_err();
        assert!(matches!(err, BackupFsError::PrefixSymlinkEscape { .. }));
    }
}
