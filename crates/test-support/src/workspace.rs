//! `TempWorkspace` — a disk-backed base root and backup root under one
//! `TempDir`, for tests that want to exercise `BackupFs` against the real
//! host filesystem rather than `MemFs`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use backupfs::{BackupFs, Fs, OsFs, PrefixFs};
use tempfile::TempDir;

use crate::snapshot::TreeSnapshot;

pub struct TempWorkspace {
    pub base_dir: PathBuf,
    pub backup_dir: PathBuf,
    fs: Arc<OsFs>,
    _temp: TempDir,
}

impl Default for TempWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl TempWorkspace {
    /// Creates an empty workspace with a `base` and `backup` directory.
    pub fn new() -> Self {
        let temp = TempDir::new().expect("failed to create temp directory");
        let base_dir = temp.path().join("base");
        let backup_dir = temp.path().join("backup");
        let fs = OsFs::new();
        fs.mkdir_all(&base_dir, 0o755).expect("failed to create base_dir");
        fs.mkdir_all(&backup_dir, 0o755).expect("failed to create backup_dir");
        Self {
            base_dir,
            backup_dir,
            fs: Arc::new(fs),
            _temp: temp,
        }
    }

    /// Creates a workspace and populates `base_dir` using a fixture builder.
    pub fn with_fixture(f: impl FnOnce(&dyn Fs, &Path)) -> Self {
        let ws = Self::new();
        f(ws.fs.as_ref(), &ws.base_dir);
        ws
    }

    /// Builds a `BackupFs` rooted at this workspace's `base_dir`, with its
    /// backup store confined under `backup_dir` via a `PrefixFs`.
    pub fn overlay(&self) -> BackupFs {
        let backup: Arc<dyn Fs> = Arc::new(PrefixFs::new(self.fs.clone(), &self.backup_dir));
        BackupFs::new(self.fs.clone(), backup)
    }

    /// Captures a `TreeSnapshot` of the current `base_dir` state.
    pub fn snapshot(&self) -> TreeSnapshot {
        TreeSnapshot::capture(self.fs.as_ref(), &self.base_dir)
    }
}
