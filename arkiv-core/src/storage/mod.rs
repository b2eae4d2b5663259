//! Storage: deterministic layout plus durable, traversal-safe writes.

mod layout;
mod writer;

pub use layout::{StoragePaths, build_storage_paths};
pub use writer::{
    AttachmentFile, commit_archive, ensure_dir, move_file_within_root, write_atomic_bytes,
    write_bytes,
};
