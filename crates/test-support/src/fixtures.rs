//! Tree builders used across the overlay's own test suite, generalized to
//! build against any [`Fs`] rather than `std::fs` directly — they run the
//! same way against `MemFs` in a fast unit test and `OsFs` in a
//! [`crate::workspace::TempWorkspace`] integration test.

use std::io::Write as _;
use std::path::Path;

use backupfs::Fs;

/// A small tree with files of various sizes and a nested directory structure.
pub fn small_tree(fs: &dyn Fs, root: &Path) {
    write(fs, &root.join("empty.txt"), b"");
    write(fs, &root.join("small.txt"), b"hello world");
    write(fs, &root.join("medium.txt"), "x".repeat(4096).as_bytes());
    write(fs, &root.join("large.bin"), &vec![0xABu8; 1_000_000]);

    fs.mkdir_all(&root.join("src/components"), 0o755).unwrap();
    write(fs, &root.join("src/main.rs"), b"fn main() {}");
    write(fs, &root.join("src/components/app.rs"), b"pub struct App;");

    let script_path = root.join("run.sh");
    write(fs, &script_path, b"#!/bin/sh\necho ok");
    let _ = fs.chmod(&script_path, 0o755);
}

/// Two files with distinct contents, for rename tests.
pub fn rename_tree(fs: &dyn Fs, root: &Path) {
    write(fs, &root.join("a.txt"), b"content of a");
    write(fs, &root.join("b.txt"), b"content of b");
}

/// A file with a symlink pointing at it.
pub fn symlink_tree(fs: &dyn Fs, root: &Path) {
    write(fs, &root.join("target.txt"), b"symlink target content");
    let _ = fs.symlink(&root.join("target.txt"), &root.join("link.txt"));
}

/// A deep nested tree for `remove_all`/rollback-ordering tests.
pub fn deep_tree(fs: &dyn Fs, root: &Path) {
    for i in 0..5 {
        let dir = root.join(format!("level0/level1/level2/level3/level4_{i}"));
        fs.mkdir_all(&dir, 0o755).unwrap();
        for j in 0..3 {
            write(fs, &dir.join(format!("file_{j}.txt")), format!("content {i}/{j}").as_bytes());
        }
    }
}

fn write(fs: &dyn Fs, path: &Path, content: &[u8]) {
    let mut f = fs.create(path).unwrap();
    f.write_all(content).unwrap();
}
