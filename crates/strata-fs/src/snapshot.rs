use std::fs;
use std::path::Path;
use std::time::SystemTime;

/// What a file looked like on disk at one moment.
///
/// Used to notice that a file was replaced behind our back: a later
/// snapshot that differs in modification time, size or file key means the
/// content may have changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileSnapshot {
    modified: Option<SystemTime>,
    size: u64,
    file_key: Option<u64>,
}

impl FileSnapshot {
    /// Snapshot of a file that does not exist.
    pub const MISSING_FILE: FileSnapshot = FileSnapshot {
        modified: None,
        size: 0,
        file_key: None,
    };

    /// Record the current state of `path`. Unreadable paths yield
    /// [`FileSnapshot::MISSING_FILE`].
    pub fn save(path: &Path) -> Self {
        match fs::metadata(path) {
            Ok(meta) => Self {
                modified: meta.modified().ok(),
                size: meta.len(),
                file_key: file_key(&meta),
            },
            Err(_) => Self::MISSING_FILE,
        }
    }

    /// Returns `true` if `path` no longer matches this snapshot.
    pub fn is_modified(&self, path: &Path) -> bool {
        Self::save(path) != *self
    }

    /// Returns `true` if both snapshots carry the same modification time.
    pub fn same_modification_time(&self, other: &FileSnapshot) -> bool {
        self.modified == other.modified
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        self.modified
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Inode number on unix, `None` elsewhere.
    pub fn file_key(&self) -> Option<u64> {
        self.file_key
    }

    pub fn is_missing(&self) -> bool {
        *self == Self::MISSING_FILE
    }
}

#[cfg(unix)]
fn file_key(meta: &fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn file_key(_meta: &fs::Metadata) -> Option<u64> {
    None
}
