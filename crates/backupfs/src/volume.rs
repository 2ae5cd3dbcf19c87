//! `VolumeFs` — a thin wrapper that remaps the Windows volume designator of
//! every absolute path to a single fixed volume before forwarding to an
//! inner [`Fs`]. Lets a `BackupFs`/`PrefixFs` stack built against a base
//! that only understands one volume accept paths carrying any drive letter,
//! by normalising them all down to that one. On non-Windows-style paths
//! (no `C:` designator) every operation is a pure passthrough.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use backupfs_common::Result;

use crate::fs::{FileInfo, Fs, FsFile, OpenOptions};
use crate::path::trim_volume;

pub struct VolumeFs {
    inner: Arc<dyn Fs>,
    /// The volume every incoming path is remapped to, e.g. `"C:"`.
    target: String,
    name: String,
}

impl VolumeFs {
    pub fn new(inner: Arc<dyn Fs>, target_volume: impl Into<String>) -> Self {
        Self {
            inner,
            target: target_volume.into(),
            name: "volumefs".to_string(),
        }
    }

    fn remap(&self, path: &Path) -> PathBuf {
        let trimmed = trim_volume(path);
        let s = trimmed.to_string_lossy();
        if s.starts_with('/') || s.starts_with('\\') {
            PathBuf::from(format!("{}{}", self.target, s))
        } else {
            trimmed
        }
    }

    /// Strips the configured volume back off a path returned from the inner
    /// `Fs`. Symlink targets live in the inner namespace, which only ever
    /// knows about `target`, so there is no caller volume to restore.
    fn unmap(&self, path: &Path) -> PathBuf {
        match path.to_string_lossy().strip_prefix(self.target.as_str()) {
            Some(rest) => PathBuf::from(rest),
            None => path.to_path_buf(),
        }
    }
}

impl Fs for VolumeFs {
    fn mkdir(&self, name: &Path, perm: u32) -> Result<()> {
        self.inner.mkdir(&self.remap(name), perm)
    }

    fn mkdir_all(&self, name: &Path, perm: u32) -> Result<()> {
        self.inner.mkdir_all(&self.remap(name), perm)
    }

    fn open_file(&self, name: &Path, opts: OpenOptions) -> Result<Box<dyn FsFile>> {
        let inner = self.inner.open_file(&self.remap(name), opts)?;
        Ok(Box::new(VolumeFile { inner }))
    }

    fn remove(&self, name: &Path) -> Result<()> {
        self.inner.remove(&self.remap(name))
    }

    fn remove_all(&self, name: &Path) -> Result<()> {
        self.inner.remove_all(&self.remap(name))
    }

    fn rename(&self, oldname: &Path, newname: &Path) -> Result<()> {
        self.inner.rename(&self.remap(oldname), &self.remap(newname))
    }

    fn stat(&self, name: &Path) -> Result<FileInfo> {
        self.inner.stat(&self.remap(name))
    }

    fn lstat(&self, name: &Path) -> Result<FileInfo> {
        self.inner.lstat(&self.remap(name))
    }

    fn chmod(&self, name: &Path, mode: u32) -> Result<()> {
        self.inner.chmod(&self.remap(name), mode)
    }

    fn chown(&self, name: &Path, uid: i32, gid: i32) -> Result<()> {
        self.inner.chown(&self.remap(name), uid, gid)
    }

    fn chtimes(&self, name: &Path, mtime_ns: i128) -> Result<()> {
        self.inner.chtimes(&self.remap(name), mtime_ns)
    }

    fn symlink(&self, oldname: &Path, newname: &Path) -> Result<()> {
        let remapped_old = if oldname.is_absolute() {
            self.remap(oldname)
        } else {
            oldname.to_path_buf()
        };
        self.inner.symlink(&remapped_old, &self.remap(newname))
    }

    fn readlink(&self, name: &Path) -> Result<PathBuf> {
        let target = self.inner.readlink(&self.remap(name))?;
        Ok(self.unmap(&target))
    }

    fn lchown(&self, name: &Path, uid: i32, gid: i32) -> Result<()> {
        self.inner.lchown(&self.remap(name), uid, gid)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct VolumeFile {
    inner: Box<dyn FsFile>,
}

impl Read for VolumeFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for VolumeFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl Seek for VolumeFile {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl FsFile for VolumeFile {
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
