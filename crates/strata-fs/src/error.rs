use std::io;
use std::path::PathBuf;

/// Errors produced by the filesystem primitives.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// I/O error that is not covered by a more specific variant.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Deleting a path failed after all retry attempts.
    #[error("could not delete {}", path.display())]
    DeleteFailed { path: PathBuf },

    /// Renaming a path failed after all retry attempts.
    #[error("could not rename {} to {}", src.display(), dst.display())]
    RenameFailed { src: PathBuf, dst: PathBuf },

    /// An atomic move was requested but the platform cannot provide one
    /// (for example across filesystems).
    #[error("atomic move from {} to {} is not supported", src.display(), dst.display())]
    AtomicMoveUnsupported { src: PathBuf, dst: PathBuf },

    /// Creating a directory failed.
    #[error("creating directory {} failed", path.display())]
    MkdirFailed { path: PathBuf },

    /// The file to create already exists.
    #[error("file {} already exists", path.display())]
    AlreadyExists { path: PathBuf },

    /// An operation that needs a held lock was called without one.
    #[error("cannot access {}: lock is not held", path.display())]
    LockNotHeld { path: PathBuf },

    /// `commit` was called while the output channel was still open.
    #[error("cannot commit {}: lock output is still open", path.display())]
    LockNotClosed { path: PathBuf },

    /// The lock file's modification time never moved past the target's.
    #[error("modification time of {} did not change after {attempts} attempts", path.display())]
    StatChangeTimeout { path: PathBuf, attempts: u32 },
}

/// Convenience alias used throughout the fs crate.
pub type Result<T> = std::result::Result<T, FsError>;
