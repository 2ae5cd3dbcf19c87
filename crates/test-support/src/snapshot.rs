//! `TreeSnapshot` walks an [`Fs`] tree into a comparable structure, so a
//! test can assert that two trees (e.g. base-before vs. base-after-rollback)
//! are structurally identical without hand-writing per-path assertions.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read as _;
use std::path::{Path, PathBuf};

use backupfs::Fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::Regular => write!(f, "regular"),
            FileType::Directory => write!(f, "directory"),
            FileType::Symlink => write!(f, "symlink"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub file_type: FileType,
    /// blake3 hash of file contents; `None` for directories and symlinks.
    pub content_hash: Option<[u8; 32]>,
    pub size: u64,
    /// The mode bits the overlay itself compares under (see `chmod_bits`).
    pub mode: u32,
    pub mtime_ns: i128,
    /// For symlinks: the link target. `None` for other types.
    pub symlink_target: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TreeSnapshot {
    /// Absolute paths under `root` (inclusive of `root` itself is never
    /// stored — only its contents) mapped to their snapshot.
    pub entries: BTreeMap<PathBuf, EntrySnapshot>,
}

impl TreeSnapshot {
    /// Captures a complete snapshot of `root`'s subtree on `fs`. Paths
    /// stored are absolute, matching what `Fs` operations take.
    pub fn capture(fs: &dyn Fs, root: &Path) -> Self {
        let mut entries = BTreeMap::new();
        Self::walk(fs, root, &mut entries);
        TreeSnapshot { entries }
    }

    fn walk(fs: &dyn Fs, dir: &Path, entries: &mut BTreeMap<PathBuf, EntrySnapshot>) {
        let mut handle = match fs.open(dir) {
            Ok(h) => h,
            Err(_) => return,
        };

        let mut names = Vec::new();
        loop {
            let (batch, eof) = match handle.readdir_names(Some(256)) {
                Ok(r) => r,
                Err(_) => return,
            };
            names.extend(batch);
            if eof {
                break;
            }
        }
        names.sort();

        for name in names {
            let path = dir.join(&name);
            let info = match fs.lstat(&path) {
                Ok(info) => info,
                Err(_) => continue,
            };

            let file_type = if info.is_symlink() {
                FileType::Symlink
            } else if info.is_dir() {
                FileType::Directory
            } else {
                FileType::Regular
            };

            let content_hash = if file_type == FileType::Regular {
                fs.open(&path).ok().and_then(|mut f| {
                    let mut buf = Vec::new();
                    f.read_to_end(&mut buf).ok()?;
                    Some(*blake3::hash(&buf).as_bytes())
                })
            } else {
                None
            };

            let symlink_target = if file_type == FileType::Symlink {
                fs.readlink(&path).ok()
            } else {
                None
            };

            entries.insert(
                path.clone(),
                EntrySnapshot {
                    file_type,
                    content_hash,
                    size: info.meta.size,
                    mode: info.meta.chmod_bits(),
                    mtime_ns: info.meta.mtime_ns,
                    symlink_target,
                },
            );

            if file_type == FileType::Directory {
                Self::walk(fs, &path, entries);
            }
        }
    }
}

// --- Comparison ---

pub struct SnapshotCompareOptions {
    /// Maximum allowed difference in mtime nanoseconds. Default: 1ms.
    pub mtime_tolerance_ns: i128,
    /// Paths (as their string form) to exclude from comparison; `*` is a
    /// single wildcard, matched the way the one glob-using caller needs.
    pub exclude_patterns: Vec<String>,
}

impl Default for SnapshotCompareOptions {
    fn default() -> Self {
        Self {
            mtime_tolerance_ns: 1_000_000,
            exclude_patterns: Vec::new(),
        }
    }
}

#[derive(Debug)]
enum SnapshotDiff {
    Missing { path: PathBuf },
    Extra { path: PathBuf },
    TypeMismatch { path: PathBuf, expected: FileType, actual: FileType },
    ContentMismatch { path: PathBuf },
    SizeMismatch { path: PathBuf, expected: u64, actual: u64 },
    ModeMismatch { path: PathBuf, expected: u32, actual: u32 },
    MtimeMismatch { path: PathBuf, expected: i128, actual: i128, tolerance: i128 },
    SymlinkTargetMismatch { path: PathBuf, expected: PathBuf, actual: PathBuf },
}

impl fmt::Display for SnapshotDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotDiff::Missing { path } => write!(f, "  MISSING: {}", path.display()),
            SnapshotDiff::Extra { path } => write!(f, "  EXTRA:   {}", path.display()),
            SnapshotDiff::TypeMismatch { path, expected, actual } => {
                write!(f, "  TYPE:    {} (expected {expected}, got {actual})", path.display())
            }
            SnapshotDiff::ContentMismatch { path } => {
                write!(f, "  CONTENT: {} (hash differs)", path.display())
            }
            SnapshotDiff::SizeMismatch { path, expected, actual } => {
                write!(f, "  SIZE:    {} (expected {expected}, got {actual})", path.display())
            }
            SnapshotDiff::ModeMismatch { path, expected, actual } => write!(
                f,
                "  MODE:    {} (expected {expected:04o}, got {actual:04o})",
                path.display()
            ),
            SnapshotDiff::MtimeMismatch { path, expected, actual, tolerance } => write!(
                f,
                "  MTIME:   {} (expected {expected}, got {actual}, tolerance {tolerance})",
                path.display()
            ),
            SnapshotDiff::SymlinkTargetMismatch { path, expected, actual } => write!(
                f,
                "  SYMLINK: {} (expected {}, got {})",
                path.display(),
                expected.display(),
                actual.display()
            ),
        }
    }
}

fn path_matches_exclude(path: &Path, patterns: &[String]) -> bool {
    let path_str = path.to_string_lossy();
    patterns.iter().any(|pattern| match pattern.split_once('*') {
        Some((prefix, suffix)) => path_str.starts_with(prefix) && path_str.ends_with(suffix),
        None => *path_str == **pattern,
    })
}

/// Compares two `TreeSnapshot`s. Panics with a human-readable diff on
/// mismatch.
pub fn assert_tree_eq(expected: &TreeSnapshot, actual: &TreeSnapshot, opts: &SnapshotCompareOptions) {
    let mut diffs = Vec::new();

    for (path, expected_entry) in &expected.entries {
        if path_matches_exclude(path, &opts.exclude_patterns) {
            continue;
        }
        match actual.entries.get(path) {
            None => diffs.push(SnapshotDiff::Missing { path: path.clone() }),
            Some(actual_entry) => compare_entries(path, expected_entry, actual_entry, opts, &mut diffs),
        }
    }

    for path in actual.entries.keys() {
        if path_matches_exclude(path, &opts.exclude_patterns) {
            continue;
        }
        if !expected.entries.contains_key(path) {
            diffs.push(SnapshotDiff::Extra { path: path.clone() });
        }
    }

    if !diffs.is_empty() {
        let mut msg = format!("Tree snapshots differ ({} differences):\n", diffs.len());
        for diff in &diffs {
            msg.push_str(&format!("{diff}\n"));
        }
        panic!("{msg}");
    }
}

fn compare_entries(
    path: &Path,
    expected: &EntrySnapshot,
    actual: &EntrySnapshot,
    opts: &SnapshotCompareOptions,
    diffs: &mut Vec<SnapshotDiff>,
) {
    if expected.file_type != actual.file_type {
        diffs.push(SnapshotDiff::TypeMismatch {
            path: path.to_path_buf(),
            expected: expected.file_type,
            actual: actual.file_type,
        });
        return;
    }

    if expected.content_hash != actual.content_hash {
        diffs.push(SnapshotDiff::ContentMismatch { path: path.to_path_buf() });
    }

    if expected.size != actual.size {
        diffs.push(SnapshotDiff::SizeMismatch {
            path: path.to_path_buf(),
            expected: expected.size,
            actual: actual.size,
        });
    }

    if expected.mode != actual.mode {
        diffs.push(SnapshotDiff::ModeMismatch {
            path: path.to_path_buf(),
            expected: expected.mode,
            actual: actual.mode,
        });
    }

    let mtime_diff = (expected.mtime_ns - actual.mtime_ns).abs();
    if mtime_diff > opts.mtime_tolerance_ns {
        diffs.push(SnapshotDiff::MtimeMismatch {
            path: path.to_path_buf(),
            expected: expected.mtime_ns,
            actual: actual.mtime_ns,
            tolerance: opts.mtime_tolerance_ns,
        });
    }

    if expected.symlink_target != actual.symlink_target {
        diffs.push(SnapshotDiff::SymlinkTargetMismatch {
            path: path.to_path_buf(),
            expected: expected.symlink_target.clone().unwrap_or_default(),
            actual: actual.symlink_target.clone().unwrap_or_default(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backupfs::mem_fs::MemFs;
    use std::io::Write as _;

    fn write(fs: &dyn Fs, path: &Path, content: &[u8]) {
        let mut f = fs.create(path).unwrap();
        f.write_all(content).unwrap();
    }

    #[test]
    fn snapshot_empty_dir() {
        let fs = MemFs::new();
        let snap = TreeSnapshot::capture(&fs, Path::new("/"));
        assert!(snap.entries.is_empty());
    }

    #[test]
    fn snapshot_single_file() {
        let fs = MemFs::new();
        write(&fs, Path::new("/hello.txt"), b"hello world");

        let snap = TreeSnapshot::capture(&fs, Path::new("/"));
        assert_eq!(snap.entries.len(), 1);

        let entry = &snap.entries[&PathBuf::from("/hello.txt")];
        assert_eq!(entry.file_type, FileType::Regular);
        assert!(entry.content_hash.is_some());
        assert_eq!(entry.size, 11);
        assert!(entry.symlink_target.is_none());
    }

    #[test]
    fn snapshot_nested_dirs() {
        let fs = MemFs::new();
        fs.mkdir_all(Path::new("/a/b/c"), 0o755).unwrap();
        write(&fs, Path::new("/a/b/c/file.txt"), b"deep");

        let snap = TreeSnapshot::capture(&fs, Path::new("/"));
        assert!(snap.entries.contains_key(&PathBuf::from("/a")));
        assert!(snap.entries.contains_key(&PathBuf::from("/a/b")));
        assert!(snap.entries.contains_key(&PathBuf::from("/a/b/c")));
        assert!(snap.entries.contains_key(&PathBuf::from("/a/b/c/file.txt")));
        assert_eq!(snap.entries.len(), 4);

        assert_eq!(snap.entries[&PathBuf::from("/a")].file_type, FileType::Directory);
        assert_eq!(
            snap.entries[&PathBuf::from("/a/b/c/file.txt")].file_type,
            FileType::Regular
        );
    }

    #[test]
    fn assert_tree_eq_identical() {
        let fs = MemFs::new();
        write(&fs, Path::new("/a.txt"), b"content a");
        write(&fs, Path::new("/b.txt"), b"content b");

        let snap1 = TreeSnapshot::capture(&fs, Path::new("/"));
        let snap2 = TreeSnapshot::capture(&fs, Path::new("/"));
        assert_tree_eq(&snap1, &snap2, &SnapshotCompareOptions::default());
    }

    #[test]
    #[should_panic(expected = "MISSING")]
    fn assert_tree_eq_missing_file() {
        let fs = MemFs::new();
        write(&fs, Path::new("/a.txt"), b"content");
        let snap1 = TreeSnapshot::capture(&fs, Path::new("/"));

        fs.remove(Path::new("/a.txt")).unwrap();
        let snap2 = TreeSnapshot::capture(&fs, Path::new("/"));

        assert_tree_eq(&snap1, &snap2, &SnapshotCompareOptions::default());
    }

    #[test]
    #[should_panic(expected = "EXTRA")]
    fn assert_tree_eq_extra_file() {
        let fs = MemFs::new();
        let snap1 = TreeSnapshot::capture(&fs, Path::new("/"));

        write(&fs, Path::new("/new.txt"), b"new");
        let snap2 = TreeSnapshot::capture(&fs, Path::new("/"));

        assert_tree_eq(&snap1, &snap2, &SnapshotCompareOptions::default());
    }

    #[test]
    #[should_panic(expected = "CONTENT")]
    fn assert_tree_eq_content_change() {
        let fs = MemFs::new();
        write(&fs, Path::new("/file.txt"), b"original");
        let snap1 = TreeSnapshot::capture(&fs, Path::new("/"));

        write(&fs, Path::new("/file.txt"), b"modified");
        let snap2 = TreeSnapshot::capture(&fs, Path::new("/"));

        assert_tree_eq(&snap1, &snap2, &SnapshotCompareOptions::default());
    }

    #[test]
    fn assert_tree_eq_exclude_pattern() {
        let fs = MemFs::new();
        write(&fs, Path::new("/keep.txt"), b"keep");
        let snap1 = TreeSnapshot::capture(&fs, Path::new("/"));

        write(&fs, Path::new("/ignore.log"), b"log data");
        let snap2 = TreeSnapshot::capture(&fs, Path::new("/"));

        let opts = SnapshotCompareOptions {
            exclude_patterns: vec!["*.log".to_string()],
            ..Default::default()
        };
        assert_tree_eq(&snap1, &snap2, &opts);
    }
}
