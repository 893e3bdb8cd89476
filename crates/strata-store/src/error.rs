use std::path::PathBuf;

use strata_fs::FsError;
use strata_fsck::FsckError;
use strata_types::ObjectId;

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    /// Content hash mismatch on read (data corruption).
    #[error("hash mismatch for {id}: content hashes to {computed}")]
    HashMismatch { id: ObjectId, computed: ObjectId },

    /// The object file is malformed or cannot be decoded.
    #[error("corrupt object {id}: {reason}")]
    CorruptObject { id: ObjectId, reason: String },

    /// An alternates file names a directory that cannot be used.
    #[error("invalid alternate object directory {}", path.display())]
    BadAlternate { path: PathBuf },

    /// The object was rejected by the checker before it was written.
    #[error(transparent)]
    Rejected(#[from] FsckError),

    /// Failure from the retrying filesystem layer.
    #[error(transparent)]
    Fs(#[from] FsError),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
