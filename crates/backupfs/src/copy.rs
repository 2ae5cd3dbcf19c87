//! Copy / restore kernel shared by the backup overlay's `tryBackup` path and
//! its `Rollback` path. Every routine here takes an `Fs` handle, a
//! destination path, and the *source* metadata, and preserves that metadata
//! to the fidelity the target `Fs` supports.

use std::io;
use std::path::Path;
use std::sync::Arc;

use backupfs_common::{BackupFsError, Result};

use crate::fs::{FileInfo, FileKind, Fs, OpenOptions, CHMOD_BITS};
use crate::path::is_root;

/// True for errors `CopyDir`/`CopyFile` treat as ignorable once the entity
/// itself has been created: the filesystem simply doesn't support the
/// metadata op, or the caller lacks permission to set it. Losing fidelity on
/// mtime/ownership is an acceptable compromise; losing the entity is not.
fn is_ignorable_metadata_error(err: &BackupFsError) -> bool {
    err.is_permission_denied() || err.is_unsupported()
}

fn align_metadata(fs: &dyn Fs, name: &Path, want: &FileInfo, current: &FileInfo) -> Result<()> {
    if current.meta.chmod_bits() != want.meta.chmod_bits() {
        fs.chmod(name, want.meta.mode & CHMOD_BITS)?;
    }
    if current.meta.mtime_ns != want.meta.mtime_ns {
        if let Err(e) = fs.chtimes(name, want.meta.mtime_ns) {
            if !is_ignorable_metadata_error(&e) {
                return Err(e);
            }
        }
    }
    if let Err(e) = fs.chown(name, want.meta.uid, want.meta.gid) {
        if !is_ignorable_metadata_error(&e) {
            return Err(e);
        }
    }
    Ok(())
}

/// Recreates a directory at `name` matching `info`. A no-op on the
/// filesystem root, which this crate never creates or removes.
pub fn copy_dir(fs: &dyn Fs, name: &Path, info: &FileInfo) -> Result<()> {
    (|| -> Result<()> {
        if !info.is_dir() {
            return Err(BackupFsError::DirInfoExpected {
                path: name.to_path_buf(),
            });
        }
        if is_root(name) {
            return Ok(());
        }
        fs.mkdir_all(name, info.meta.mode & (crate::fs::STICKY_BIT | crate::fs::PERM_MASK))?;
        let current = fs.lstat(name)?;
        align_metadata(fs, name, info, &current)
    })()
    .map_err(|e| BackupFsError::CopyDirFailed {
        path: name.to_path_buf(),
        source: Box::new(e),
    })
}

/// Recreates a regular file at `name` matching `info`, streaming its
/// content from `src`.
pub fn copy_file(fs: &dyn Fs, name: &Path, info: &FileInfo, src: &mut dyn io::Read) -> Result<()> {
    (|| -> Result<()> {
        if !info.is_regular() {
            return Err(BackupFsError::FileInfoExpected {
                path: name.to_path_buf(),
            });
        }
        let mut dst = fs.open_file(name, OpenOptions::write_create_truncate(info.meta.mode & crate::fs::PERM_MASK))?;
        let copy_result = io::copy(src, &mut *dst).map_err(|e| BackupFsError::io("copy", name.to_path_buf(), e));
        let sync_result = dst.sync_all();
        copy_result?;
        sync_result?;

        let current = fs.lstat(name)?;
        align_metadata(fs, name, info, &current)
    })()
    .map_err(|e| BackupFsError::CopyFileFailed {
        path: name.to_path_buf(),
        source: Box::new(e),
    })
}

/// Recreates a symlink at `name` pointing at `target`'s resolved link target,
/// reading the link's existing target from `source` at `target`.
pub fn copy_symlink(source: &dyn Fs, target: &Path, name: &Path, info: &FileInfo) -> Result<()> {
    (|| -> Result<()> {
        if !info.is_symlink() {
            return Err(BackupFsError::SymlinkInfoExpected {
                path: name.to_path_buf(),
            });
        }
        let link_target = source.readlink(target)?;
        source_symlink_dest(source, &link_target, name)?;
        if let Err(e) = source.lchown(name, info.meta.uid, info.meta.gid) {
            if !is_ignorable_metadata_error(&e) {
                return Err(e);
            }
        }
        Ok(())
    })()
    .map_err(|e| BackupFsError::CopySymlinkFailed {
        path: name.to_path_buf(),
        source: Box::new(e),
    })
}

fn source_symlink_dest(fs: &dyn Fs, link_target: &Path, name: &Path) -> Result<()> {
    fs.symlink(link_target, name)
}

/// Restores a regular file at `name` on `base` from `backup`'s copy.
/// Missing or unreadable backups are not an error: there is nothing to
/// restore, so the call reports success and leaves `base` untouched.
pub fn restore_file(
    base: &Arc<dyn Fs>,
    backup: &Arc<dyn Fs>,
    name: &Path,
    backup_meta: &FileInfo,
) -> Result<()> {
    let mut handle = match backup.open(name) {
        Ok(h) => h,
        Err(_) => return Ok(()),
    };

    if let Ok(current) = base.lstat(name) {
        if !current.is_regular() {
            let _ = base.remove_all(name);
        }
    }

    copy_file(base.as_ref(), name, backup_meta, &mut *handle)
}

/// Restores a symlink at `name` on `base` from `backup`'s copy. Missing
/// backups are not an error for the same reason as [`restore_file`].
pub fn restore_symlink(
    base: &Arc<dyn Fs>,
    backup: &Arc<dyn Fs>,
    name: &Path,
    backup_meta: &FileInfo,
) -> Result<()> {
    match backup.lstat(name) {
        Ok(info) if info.kind == FileKind::Symlink => {}
        _ => return Ok(()),
    }

    if base.lstat(name).is_ok() {
        let _ = base.remove_all(name);
    }

    copy_symlink(backup.as_ref(), name, name, backup_meta)
}
