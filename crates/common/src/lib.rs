use std::io;
use std::path::PathBuf;

/// Errors surfaced by the filesystem capability trait and every layer built
/// on top of it (path confinement, hiding, and the backup overlay).
///
/// Every variant carries enough context (an `op` tag and the offending path)
/// to reconstruct what was being attempted; inner I/O failures are chained
/// via `#[source]` rather than flattened into a string.
#[derive(Debug, thiserror::Error)]
pub enum BackupFsError {
    /// A plain I/O failure from an `Fs` operation, tagged with the op name
    /// (`"open"`, `"mkdir"`, `"rename"`, ...) so callers can tell which leg
    /// of a multi-path operation (e.g. `Rename`) failed.
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A path submitted to `PrefixFs` escapes the configured prefix.
    #[error("path escapes prefix: {path}")]
    PrefixEscape { path: PathBuf },

    /// A symlink target submitted to `PrefixFs` resolves outside the prefix.
    #[error("symlink target escapes prefix: {old} -> {new}")]
    PrefixSymlinkEscape { old: PathBuf, new: PathBuf },

    /// Operation targeted a path inside a hidden subtree; reported as though
    /// the path did not exist.
    #[error("hidden: {path}")]
    HiddenNotExist { path: PathBuf },

    /// Mutation targeted a path inside a hidden subtree.
    #[error("hidden: permission denied: {path}")]
    HiddenPermission { path: PathBuf },

    #[error("copy file failed for {path}")]
    CopyFileFailed {
        path: PathBuf,
        #[source]
        source: Box<BackupFsError>,
    },

    #[error("copy dir failed for {path}")]
    CopyDirFailed {
        path: PathBuf,
        #[source]
        source: Box<BackupFsError>,
    },

    #[error("copy symlink failed for {path}")]
    CopySymlinkFailed {
        path: PathBuf,
        #[source]
        source: Box<BackupFsError>,
    },

    #[error("expected a symlink at {path}")]
    SymlinkInfoExpected { path: PathBuf },

    #[error("expected a directory at {path}")]
    DirInfoExpected { path: PathBuf },

    #[error("expected a regular file at {path}")]
    FileInfoExpected { path: PathBuf },

    #[error("rollback failed: {message}")]
    RollbackFailed {
        message: String,
        #[source]
        source: Option<Box<BackupFsError>>,
    },

    #[error("state index serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, BackupFsError>;

impl BackupFsError {
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        BackupFsError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// True for errors that represent "the entity does not exist" — the one
    /// case callers are expected to recover from locally (the base-state
    /// index records `None`, and the original error is still returned to
    /// the caller).
    pub fn is_not_found(&self) -> bool {
        match self {
            BackupFsError::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
            BackupFsError::HiddenNotExist { .. } => true,
            BackupFsError::PrefixEscape { .. } => true,
            _ => false,
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, BackupFsError::Io { source, .. } if source.kind() == io::ErrorKind::PermissionDenied)
            || matches!(self, BackupFsError::HiddenPermission { .. })
    }

    /// True for the cross-platform "not implemented on this host" class of
    /// error (chown on Windows being the canonical example).
    /// `ErrorKind::Unsupported` is the closest stable stand-in for the
    /// historical platform-specific sentinel.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, BackupFsError::Io { source, .. } if source.kind() == io::ErrorKind::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_classification() {
        let err = BackupFsError::io("stat", "/tmp/x", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_not_found());
        assert!(!err.is_permission_denied());
    }

    #[test]
    fn permission_denied_classification() {
        let err = BackupFsError::io(
            "chown",
            "/tmp/x",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(err.is_permission_denied());
        assert!(!err.is_not_found());
    }

    #[test]
    fn hidden_errors_classify_as_expected() {
        let not_exist = BackupFsError::HiddenNotExist {
            path: PathBuf::from("/secret"),
        };
        assert!(not_exist.is_not_found());

        let permission = BackupFsError::HiddenPermission {
            path: PathBuf::from("/secret"),
        };
        assert!(permission.is_permission_denied());
    }

    #[test]
    fn display_includes_path() {
        let err = BackupFsError::SymlinkInfoExpected {
            path: PathBuf::from("/a/b"),
        };
        assert!(err.to_string().contains("/a/b"));
    }
}
