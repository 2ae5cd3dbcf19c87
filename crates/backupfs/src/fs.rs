//! The filesystem capability trait every layer in this crate is built on.
//!
//! `Fs` is deliberately an interface, not a generic bound: `PrefixFs`,
//! `HiddenFs`, `VolumeFs` and `BackupFs` all hold an `Arc<dyn Fs>` for their
//! inner filesystem, so they compose freely and can wrap either `OsFs` (the
//! real host filesystem) or `MemFs` (the in-memory stand-in used by tests)
//! without caring which.

use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use backupfs_common::Result;

/// Permission bits + setuid/setgid/sticky, masked out of a raw mode value.
pub const PERM_MASK: u32 = 0o777;
pub const STICKY_BIT: u32 = 0o1000;
pub const SETUID_BIT: u32 = 0o4000;
pub const SETGID_BIT: u32 = 0o2000;

/// The bits compared (and copied) when deciding whether a backup's mode
/// matches the source. Unix carries the full permission + special-bit set;
/// other platforms fall back to a conservative low mask since chmod is not
/// meaningfully portable there.
#[cfg(unix)]
pub const CHMOD_BITS: u32 = SETUID_BIT | SETGID_BIT | STICKY_BIT | PERM_MASK;
#[cfg(not(unix))]
pub const CHMOD_BITS: u32 = 0o600;

/// The kind of entity a path resolves to. `Absent` is represented by the
/// `Option<FileInfo>` the overlay's index stores, not by a variant here —
/// every `FileInfo` that exists describes something concrete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    Other,
}

/// Metadata fields the overlay needs, snapshotted at first contact so that
/// platform `FileInfo`/`Metadata` values never have to be carried around or
/// compared across filesystem implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    /// Full mode bits: permissions, setuid/setgid/sticky, and (on Unix) the
    /// file-type bits baked into `st_mode`.
    pub mode: u32,
    /// Modification time, nanoseconds since the Unix epoch.
    pub mtime_ns: i128,
    pub size: u64,
    /// -1 on platforms without an ownership concept.
    pub uid: i32,
    pub gid: i32,
}

impl FileMetadata {
    pub fn chmod_bits(&self) -> u32 {
        self.mode & CHMOD_BITS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub kind: FileKind,
    pub meta: FileMetadata,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }

    pub fn is_regular(&self) -> bool {
        self.kind == FileKind::Regular
    }
}

/// Mirrors the handful of `O_*` flag combinations the overlay and its
/// callers actually need; there's no reason to replicate the full
/// `std::fs::OpenOptions` surface behind the trait. `mode` is the creation
/// permission, used only when `create` or `create_new` is set — it plays
/// the role of the `perm` argument to `OpenFile(flag, perm)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub create_new: bool,
    pub truncate: bool,
    pub mode: u32,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            read: false,
            write: false,
            append: false,
            create: false,
            create_new: false,
            truncate: false,
            mode: 0o666,
        }
    }
}

impl OpenOptions {
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    pub fn write_create_truncate(mode: u32) -> Self {
        Self {
            write: true,
            create: true,
            truncate: true,
            mode,
            ..Self::default()
        }
    }

    /// Whether this combination of flags can mutate the target entity.
    pub fn is_mutating(&self) -> bool {
        self.write || self.append || self.create || self.create_new || self.truncate
    }
}

/// An open file or directory handle.
///
/// `readdir_names` is stateful: repeated calls continue from wherever the
/// previous call left off, mirroring `Readdir(n)` semantics where `n` entries
/// are returned per call until EOF. Passing `None` reads everything
/// remaining in one call.
pub trait FsFile: Read + Write + Seek + Send {
    fn stat(&self) -> Result<FileInfo>;
    fn set_len(&self, size: u64) -> Result<()>;
    fn sync_all(&self) -> Result<()>;
    fn readdir_names(&mut self, n: Option<usize>) -> Result<(Vec<String>, bool)>;
}

/// The filesystem capability trait. All paths are taken as given; callers
/// (`PrefixFs`, `BackupFs`, ...) are responsible for cleaning/rewriting them
/// before reaching an implementation.
pub trait Fs: Send + Sync {
    fn create(&self, name: &Path) -> Result<Box<dyn FsFile>> {
        self.open_file(name, OpenOptions::write_create_truncate(0o666))
    }

    fn mkdir(&self, name: &Path, perm: u32) -> Result<()>;
    fn mkdir_all(&self, name: &Path, perm: u32) -> Result<()>;

    fn open(&self, name: &Path) -> Result<Box<dyn FsFile>> {
        self.open_file(name, OpenOptions::read_only())
    }

    fn open_file(&self, name: &Path, opts: OpenOptions) -> Result<Box<dyn FsFile>>;
    fn remove(&self, name: &Path) -> Result<()>;
    fn remove_all(&self, name: &Path) -> Result<()>;
    fn rename(&self, oldname: &Path, newname: &Path) -> Result<()>;
    fn stat(&self, name: &Path) -> Result<FileInfo>;
    fn lstat(&self, name: &Path) -> Result<FileInfo>;
    fn chmod(&self, name: &Path, mode: u32) -> Result<()>;
    fn chown(&self, name: &Path, uid: i32, gid: i32) -> Result<()>;
    fn chtimes(&self, name: &Path, mtime_ns: i128) -> Result<()>;
    fn symlink(&self, oldname: &Path, newname: &Path) -> Result<()>;
    fn readlink(&self, name: &Path) -> Result<PathBuf>;
    fn lchown(&self, name: &Path, uid: i32, gid: i32) -> Result<()>;
    fn name(&self) -> &str;
}
