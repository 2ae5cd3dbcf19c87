//! `OsFs` — the thin adapter binding the `Fs` trait to the real host
//! filesystem via `std::fs`. Per spec this is deliberately minimal: the
//! interesting behavior lives in the layers built on top of `Fs`, not here.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use backupfs_common::{BackupFsError, Result};

use crate::fs::{FileInfo, FileKind, FileMetadata, Fs, FsFile, OpenOptions};

fn wrap(op: &'static str, path: &Path, source: io::Error) -> BackupFsError {
    BackupFsError::io(op, path.to_path_buf(), source)
}

#[cfg(unix)]
fn to_file_info(meta: &fs::Metadata) -> FileInfo {
    use std::os::unix::fs::MetadataExt;
    let kind = if meta.file_type().is_symlink() {
        FileKind::Symlink
    } else if meta.is_dir() {
        FileKind::Directory
    } else if meta.is_file() {
        FileKind::Regular
    } else {
        FileKind::Other
    };
    let mtime_ns = (meta.mtime() as i128) * 1_000_000_000 + meta.mtime_nsec() as i128;
    FileInfo {
        kind,
        meta: FileMetadata {
            mode: meta.mode(),
            mtime_ns,
            size: meta.len(),
            uid: meta.uid() as i32,
            gid: meta.gid() as i32,
        },
    }
}

#[cfg(not(unix))]
fn to_file_info(meta: &fs::Metadata) -> FileInfo {
    let kind = if meta.file_type().is_symlink() {
        FileKind::Symlink
    } else if meta.is_dir() {
        FileKind::Directory
    } else {
        FileKind::Regular
    };
    let mode = if kind == FileKind::Directory { 0o755 } else { 0o644 };
    let mtime_ns = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i128)
        .unwrap_or(0);
    FileInfo {
        kind,
        meta: FileMetadata {
            mode,
            mtime_ns,
            size: meta.len(),
            uid: -1,
            gid: -1,
        },
    }
}

#[cfg(unix)]
fn apply_create_perm(name: &Path, perm: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(name, fs::Permissions::from_mode(perm)).map_err(|e| wrap("mkdir", name, e))
}

#[cfg(not(unix))]
fn apply_create_perm(_name: &Path, _perm: u32) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn owner_args(uid: i32, gid: i32) -> (Option<u32>, Option<u32>) {
    let u = if uid < 0 { None } else { Some(uid as u32) };
    let g = if gid < 0 { None } else { Some(gid as u32) };
    (u, g)
}

fn ns_to_filetime(ns: i128) -> filetime::FileTime {
    let secs = (ns.div_euclid(1_000_000_000)) as i64;
    let nanos = ns.rem_euclid(1_000_000_000) as u32;
    filetime::FileTime::from_unix_time(secs, nanos)
}

/// An open regular file, or a directory handle lazily backed by
/// `std::fs::read_dir` once the first listing call is made.
enum OsFileInner {
    Regular(fs::File),
    Dir {
        path: PathBuf,
        iter: Option<fs::ReadDir>,
    },
}

pub struct OsFile {
    path: PathBuf,
    inner: OsFileInner,
}

impl Read for OsFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            OsFileInner::Regular(f) => f.read(buf),
            OsFileInner::Dir { .. } => Err(io::Error::from(io::ErrorKind::Unsupported)),
        }
    }
}

impl Write for OsFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            OsFileInner::Regular(f) => f.write(buf),
            OsFileInner::Dir { .. } => Err(io::Error::from(io::ErrorKind::Unsupported)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            OsFileInner::Regular(f) => f.flush(),
            OsFileInner::Dir { .. } => Ok(()),
        }
    }
}

impl Seek for OsFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.inner {
            OsFileInner::Regular(f) => f.seek(pos),
            OsFileInner::Dir { .. } => Err(io::Error::from(io::ErrorKind::Unsupported)),
        }
    }
}

impl FsFile for OsFile {
    fn stat(&self) -> Result<FileInfo> {
        let meta = fs::symlink_metadata(&self.path).map_err(|e| wrap("stat", &self.path, e))?;
        Ok(to_file_info(&meta))
    }

    fn set_len(&self, size: u64) -> Result<()> {
        match &self.inner {
            OsFileInner::Regular(f) => f.set_len(size).map_err(|e| wrap("truncate", &self.path, e)),
            OsFileInner::Dir { .. } => Err(BackupFsError::io(
                "truncate",
                self.path.clone(),
                io::Error::from(io::ErrorKind::Unsupported),
            )),
        }
    }

    fn sync_all(&self) -> Result<()> {
        match &self.inner {
            OsFileInner::Regular(f) => f.sync_all().map_err(|e| wrap("sync", &self.path, e)),
            OsFileInner::Dir { .. } => Ok(()),
        }
    }

    fn readdir_names(&mut self, n: Option<usize>) -> Result<(Vec<String>, bool)> {
        let (path, iter) = match &mut self.inner {
            OsFileInner::Dir { path, iter } => (path.clone(), iter),
            OsFileInner::Regular(_) => {
                return Err(BackupFsError::io(
                    "readdir",
                    self.path.clone(),
                    io::Error::from(io::ErrorKind::Unsupported),
                ));
            }
        };
        if iter.is_none() {
            *iter = Some(fs::read_dir(&path).map_err(|e| wrap("readdir", &path, e))?);
        }
        let reader = iter.as_mut().unwrap();
        let mut names = Vec::new();
        let mut eof = false;
        loop {
            if let Some(limit) = n {
                if names.len() >= limit {
                    break;
                }
            }
            match reader.next() {
                Some(Ok(entry)) => names.push(entry.file_name().to_string_lossy().into_owned()),
                Some(Err(e)) => return Err(wrap("readdir", &path, e)),
                None => {
                    eof = true;
                    break;
                }
            }
        }
        Ok((names, eof))
    }
}

/// The real host filesystem, reached through `std::fs`.
#[derive(Default)]
pub struct OsFs {
    name: String,
}

impl OsFs {
    pub fn new() -> Self {
        Self {
            name: "osfs".to_string(),
        }
    }
}

impl Fs for OsFs {
    fn mkdir(&self, name: &Path, perm: u32) -> Result<()> {
        fs::create_dir(name).map_err(|e| wrap("mkdir", name, e))?;
        apply_create_perm(name, perm)
    }

    fn mkdir_all(&self, name: &Path, perm: u32) -> Result<()> {
        fs::create_dir_all(name).map_err(|e| wrap("mkdir_all", name, e))?;
        apply_create_perm(name, perm)
    }

    fn open_file(&self, name: &Path, opts: OpenOptions) -> Result<Box<dyn FsFile>> {
        if !opts.is_mutating() {
            if let Ok(meta) = fs::symlink_metadata(name) {
                if meta.is_dir() {
                    return Ok(Box::new(OsFile {
                        path: name.to_path_buf(),
                        inner: OsFileInner::Dir {
                            path: name.to_path_buf(),
                            iter: None,
                        },
                    }));
                }
            }
        }

        let mut std_opts = fs::OpenOptions::new();
        std_opts
            .read(opts.read || !opts.is_mutating())
            .write(opts.write)
            .append(opts.append)
            .create(opts.create)
            .create_new(opts.create_new)
            .truncate(opts.truncate);
        let file = std_opts.open(name).map_err(|e| wrap("open", name, e))?;
        if opts.create || opts.create_new {
            apply_create_perm(name, opts.mode)?;
        }
        Ok(Box::new(OsFile {
            path: name.to_path_buf(),
            inner: OsFileInner::Regular(file),
        }))
    }

    fn remove(&self, name: &Path) -> Result<()> {
        let meta = fs::symlink_metadata(name).map_err(|e| wrap("remove", name, e))?;
        if meta.is_dir() {
            fs::remove_dir(name).map_err(|e| wrap("remove", name, e))
        } else {
            fs::remove_file(name).map_err(|e| wrap("remove", name, e))
        }
    }

    fn remove_all(&self, name: &Path) -> Result<()> {
        match fs::symlink_metadata(name) {
            Ok(meta) if meta.is_dir() => {
                fs::remove_dir_all(name).map_err(|e| wrap("remove_all", name, e))
            }
            Ok(_) => fs::remove_file(name).map_err(|e| wrap("remove_all", name, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(wrap("remove_all", name, e)),
        }
    }

    fn rename(&self, oldname: &Path, newname: &Path) -> Result<()> {
        fs::rename(oldname, newname).map_err(|e| wrap("rename", oldname, e))
    }

    fn stat(&self, name: &Path) -> Result<FileInfo> {
        let meta = fs::metadata(name).map_err(|e| wrap("stat", name, e))?;
        Ok(to_file_info(&meta))
    }

    fn lstat(&self, name: &Path) -> Result<FileInfo> {
        let meta = fs::symlink_metadata(name).map_err(|e| wrap("lstat", name, e))?;
        Ok(to_file_info(&meta))
    }

    fn chmod(&self, name: &Path, mode: u32) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(name, fs::Permissions::from_mode(mode))
                .map_err(|e| wrap("chmod", name, e))
        }
        #[cfg(not(unix))]
        {
            let _ = mode;
            Err(wrap("chmod", name, io::Error::from(io::ErrorKind::Unsupported)))
        }
    }

    fn chown(&self, name: &Path, uid: i32, gid: i32) -> Result<()> {
        #[cfg(unix)]
        {
            let (u, g) = owner_args(uid, gid);
            std::os::unix::fs::chown(name, u, g).map_err(|e| wrap("chown", name, e))
        }
        #[cfg(not(unix))]
        {
            let _ = (uid, gid);
            Err(wrap("chown", name, io::Error::from(io::ErrorKind::Unsupported)))
        }
    }

    fn chtimes(&self, name: &Path, mtime_ns: i128) -> Result<()> {
        let ft = ns_to_filetime(mtime_ns);
        filetime::set_file_mtime(name, ft).map_err(|e| wrap("chtimes", name, e))
    }

    fn symlink(&self, oldname: &Path, newname: &Path) -> Result<()> {
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(oldname, newname).map_err(|e| wrap("symlink", newname, e))
        }
        #[cfg(windows)]
        {
            std::os::windows::fs::symlink_file(oldname, newname)
                .map_err(|e| wrap("symlink", newname, e))
        }
    }

    fn readlink(&self, name: &Path) -> Result<PathBuf> {
        fs::read_link(name).map_err(|e| wrap("readlink", name, e))
    }

    fn lchown(&self, name: &Path, uid: i32, gid: i32) -> Result<()> {
        #[cfg(unix)]
        {
            let (u, g) = owner_args(uid, gid);
            std::os::unix::fs::lchown(name, u, g).map_err(|e| wrap("lchown", name, e))
        }
        #[cfg(not(unix))]
        {
            let _ = (uid, gid);
            Err(wrap("lchown", name, io::Error::from(io::ErrorKind::Unsupported)))
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;
    use tempfile::TempDir;

    #[test]
    fn create_and_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let fs = OsFs::new();
        let path = dir.path().join("a.txt");
        {
            let mut f = fs.create(&path).unwrap();
            f.write_all(b"hello").unwrap();
        }
        let mut f = fs.open(&path).unwrap();
        let mut buf = String::new();
        f.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "hello");
    }

    #[test]
    fn mkdir_all_and_stat() {
        let dir = TempDir::new().unwrap();
        let fs = OsFs::new();
        let path = dir.path().join("a/b/c");
        fs.mkdir_all(&path, 0o755).unwrap();
        let info = fs.stat(&path).unwrap();
        assert!(info.is_dir());
    }

    #[test]
    fn remove_all_on_missing_path_is_ok() {
        let dir = TempDir::new().unwrap();
        let fs = OsFs::new();
        fs.remove_all(&dir.path().join("nonexistent")).unwrap();
    }

    #[test]
    fn readdir_names_paginates() {
        let dir = TempDir::new().unwrap();
        let fs = OsFs::new();
        for i in 0..5 {
            fs::write(dir.path().join(format!("f{i}")), "x").unwrap();
        }
        let mut handle = fs.open(dir.path()).unwrap();
        let (first, eof1) = handle.readdir_names(Some(3)).unwrap();
        assert_eq!(first.len(), 3);
        assert!(!eof1);
        let (rest, eof2) = handle.readdir_names(None).unwrap();
        assert_eq!(rest.len(), 2);
        assert!(eof2);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_and_readlink() {
        let dir = TempDir::new().unwrap();
        let fs = OsFs::new();
        let target = dir.path().join("target.txt");
        fs::write(&target, "x").unwrap();
        let link = dir.path().join("link.txt");
        fs.symlink(&target, &link).unwrap();
        let resolved = fs.readlink(&link).unwrap();
        assert_eq!(resolved, target);
        assert!(fs.lstat(&link).unwrap().is_symlink());
    }
}
