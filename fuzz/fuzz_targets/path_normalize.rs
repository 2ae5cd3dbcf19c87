#![no_main]

use std::path::Path;

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(path) = std::str::from_utf8(data) else {
        return;
    };
    let path = Path::new(path);

    // None of these should ever panic, regardless of how pathological the
    // input is — every public BackupFs/PrefixFs/HiddenFs operation runs a
    // path through clean() before touching the filesystem.
    let cleaned = backupfs::path::clean(path);
    let _ = backupfs::path::trim_volume(&cleaned);
    let _ = backupfs::path::volume_name(&cleaned);
    let _ = backupfs::path::is_root(&cleaned);

    backupfs::path::for_each_ancestor(&cleaned, |_| true);

    let other = backupfs::path::clean(Path::new("/a/b/c"));
    let _ = backupfs::path::most_separators_first(&cleaned, &other);
    let _ = backupfs::path::least_separators_first(&cleaned, &other);
    let _ = backupfs::path::resolve_link_target(&cleaned, &other);
});
