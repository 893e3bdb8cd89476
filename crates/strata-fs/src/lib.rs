//! Filesystem primitives for strata.
//!
//! Everything mutable in a repository (refs, the index, loose objects) is
//! replaced through the pieces in this crate. Mutual exclusion across
//! processes relies only on exclusive file creation and atomic rename.
//!
//! # Modules
//!
//! - [`lock_file`] -- `<target>.lock` based atomic replacement
//! - [`file_utils`] -- bounded-retry delete, rename, mkdir and friends
//! - [`snapshot`] -- modification-time snapshots for staleness checks
//! - [`vfs`] -- the [`FileSystem`] abstraction and its native implementation
//! - [`system`] -- the [`SystemReader`] environment abstraction
//! - [`mode`] -- classification of directory entries into file modes

pub mod error;
pub mod file_utils;
pub mod lock_file;
pub mod mode;
pub mod snapshot;
pub mod system;
pub mod vfs;

pub use error::{FsError, Result};
pub use file_utils::{DeleteFlags, RenameOptions, RetryPolicy};
pub use lock_file::{LockFile, LockState, LockWriter, LOCK_SUFFIX};
pub use mode::{list_entries, FileEntry, FileModeStrategy};
pub use snapshot::FileSnapshot;
pub use system::{EnvSystemReader, MockSystemReader, SystemReader};
pub use vfs::{FileAttributes, FileSystem, NativeFileSystem};
