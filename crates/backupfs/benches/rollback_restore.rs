//! Throughput of `Rollback`'s restore path: given an index full of captured
//! files, how fast the overlay can replay it back onto the base.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use backupfs::mem_fs::MemFs;
use backupfs::{BackupFs, Fs};

/// Builds an overlay whose index already holds `file_count` backed-up files
/// (as if each one had just been overwritten once), ready for `rollback` to
/// restore.
fn overlay_ready_to_rollback(file_count: usize) -> BackupFs {
    let base = Arc::new(MemFs::new());
    base.mkdir_all(std::path::Path::new("/work"), 0o755).unwrap();
    for i in 0..file_count {
        let mut f = base.create(&PathBuf::from(format!("/work/file_{i:05}.txt"))).unwrap();
        f.write_all(format!("original {i}").as_bytes()).unwrap();
    }

    let overlay = BackupFs::new(base, Arc::new(MemFs::new()));
    for i in 0..file_count {
        let path = PathBuf::from(format!("/work/file_{i:05}.txt"));
        let mut f = overlay.create(&path).unwrap();
        f.write_all(format!("overwritten {i}").as_bytes()).unwrap();
    }
    overlay
}

fn bench_rollback(c: &mut Criterion) {
    let counts: &[(&str, usize)] = &[("100_files", 100), ("1000_files", 1000)];

    let mut group = c.benchmark_group("rollback_restore");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(10);

    for &(label, count) in counts {
        group.bench_with_input(BenchmarkId::from_parameter(label), &count, |b, &count| {
            b.iter_batched(
                || overlay_ready_to_rollback(count),
                |overlay| overlay.rollback().unwrap(),
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_rollback);
criterion_main!(benches);
