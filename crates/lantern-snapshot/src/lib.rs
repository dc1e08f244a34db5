mod fs_ops;
mod layout;
mod pointer;
mod scope;
mod store;

pub use fs_ops::{copy_tree, remove_path_if_exists, tree_digest, write_file_atomic};
pub use layout::SnapshotLayout;
pub use pointer::{read_last_snapshot_id, write_last_snapshot_id};
pub use scope::SnapshotScope;
pub use store::SnapshotStore;

#[cfg(test)]
mod tests;
