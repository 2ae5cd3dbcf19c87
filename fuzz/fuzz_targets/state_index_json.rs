#![no_main]

use libfuzzer_sys::fuzz_target;

use backupfs::BaseInfoIndex;

fuzz_target!(|data: &[u8]| {
    let Ok(json) = std::str::from_utf8(data) else {
        return;
    };

    // The persisted base-state index (§6.2) may be read back after a
    // process restart, from a file an external actor could have tampered
    // with; deserialization must reject malformed input without panicking.
    if let Ok(index) = BaseInfoIndex::from_json_str(json) {
        let _ = index.to_json_string();
    }
});
