//! Throughput of `tryBackup`: how fast the overlay can copy-on-first-write
//! a batch of previously untouched files into the backup store.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use backupfs::mem_fs::MemFs;
use backupfs::{BackupFs, Fs};

fn populate_base(fs: &dyn Fs, file_count: usize) {
    fs.mkdir_all(std::path::Path::new("/work"), 0o755).unwrap();
    for i in 0..file_count {
        let mut f = fs.create(&PathBuf::from(format!("/work/file_{i:05}.txt"))).unwrap();
        f.write_all(format!("payload {i}").as_bytes()).unwrap();
    }
}

fn bench_first_write_backup(c: &mut Criterion) {
    let counts: &[(&str, usize)] = &[("100_files", 100), ("1000_files", 1000)];

    let mut group = c.benchmark_group("overlay_backup_first_write");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(10);

    for &(label, count) in counts {
        group.bench_with_input(BenchmarkId::from_parameter(label), &count, |b, &count| {
            b.iter_batched(
                || {
                    let base = Arc::new(MemFs::new());
                    populate_base(base.as_ref(), count);
                    BackupFs::new(base, Arc::new(MemFs::new()))
                },
                |overlay| {
                    for i in 0..count {
                        overlay.remove(&PathBuf::from(format!("/work/file_{i:05}.txt"))).unwrap();
                    }
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_first_write_backup);
criterion_main!(benches);
