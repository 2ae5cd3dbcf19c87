//! Property tests for the two path orderings and the base-state index's
//! JSON round-trip — §8 invariants 7 and 8.

use std::path::PathBuf;

use proptest::prelude::*;

use backupfs::{BaseInfoIndex, EntryKind, IndexEntry};
use backupfs::path::{least_separators_first, most_separators_first};

fn arb_segment() -> impl Strategy<Value = String> {
    "[a-z]{1,8}"
}

fn arb_abs_path() -> impl Strategy<Value = PathBuf> {
    proptest::collection::vec(arb_segment(), 0..6).prop_map(|segs| {
        let mut p = PathBuf::from("/");
        for s in segs {
            p.push(s);
        }
        p
    })
}

proptest! {
    /// Sorting by `most_separators_first` never places a path ahead of one
    /// of its own ancestors, and `least_separators_first` never places an
    /// ancestor after one of its descendants.
    #[test]
    fn orderings_respect_depth(paths in proptest::collection::vec(arb_abs_path(), 1..30)) {
        let depth = |p: &PathBuf| p.to_string_lossy().matches('/').count();

        let mut by_most = paths.clone();
        by_most.sort_by(|a, b| most_separators_first(a, b));
        for w in by_most.windows(2) {
            prop_assert!(depth(&w[0]) >= depth(&w[1]));
        }

        let mut by_least = paths;
        by_least.sort_by(|a, b| least_separators_first(a, b));
        for w in by_least.windows(2) {
            prop_assert!(depth(&w[0]) <= depth(&w[1]));
        }
    }

    /// The root path always sorts before any non-root path under both
    /// orderings.
    #[test]
    fn root_sorts_before_any_child(path in arb_abs_path().prop_filter("non-root", |p| p != &PathBuf::from("/"))) {
        let root = PathBuf::from("/");
        prop_assert_eq!(most_separators_first(&root, &path), std::cmp::Ordering::Greater);
        prop_assert_eq!(least_separators_first(&root, &path), std::cmp::Ordering::Less);
    }

    /// `Unmarshal(Marshal(index))` preserves, for every key, whether the
    /// value was absence vs. present, and the present fields exactly.
    #[test]
    fn json_round_trip_preserves_index(
        entries in proptest::collection::vec(
            (arb_abs_path(), proptest::option::of((0u32..0o7777, -1_000_000_000_000i128..1_000_000_000_000, 0u64..1_000_000, -1i32..70000, -1i32..70000))),
            0..20,
        )
    ) {
        let mut index = BaseInfoIndex::new();
        for (path, meta) in &entries {
            let value = meta.map(|(mode, mtime_ns, size, uid, gid)| IndexEntry {
                kind: EntryKind::Regular,
                mode,
                mtime_ns,
                size,
                uid,
                gid,
            });
            index.observe(path.clone(), value);
        }

        let json = index.to_json_string().unwrap();
        let restored = BaseInfoIndex::from_json_str(&json).unwrap();

        for (path, meta) in &entries {
            let original = index.get(path).unwrap();
            let round_tripped = restored.get(path).unwrap();
            prop_assert_eq!(original.is_none(), round_tripped.is_none());
            if let (Some(o), Some(r)) = (original, round_tripped) {
                prop_assert_eq!(o.size, r.size);
                prop_assert_eq!(o.mode, r.mode);
                prop_assert_eq!(o.mtime_ns, r.mtime_ns);
            }
            let _ = meta;
        }
    }
}
