pub mod fixtures;
pub mod snapshot;
pub mod workspace;

pub use snapshot::{
    EntrySnapshot, FileType, SnapshotCompareOptions, TreeSnapshot, assert_tree_eq,
};
pub use workspace::TempWorkspace;
