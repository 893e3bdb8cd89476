use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    /// Missing or contradictory builder settings, or a malformed pointer.
    #[error("invalid repository configuration: {0}")]
    Config(String),

    /// The location does not hold a repository and one was required.
    #[error("repository not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// Another writer holds the lock on a file this operation must write.
    #[error("{} is locked", path.display())]
    Locked { path: PathBuf },

    #[error("could not commit {}", path.display())]
    CommitFailed { path: PathBuf },

    #[error("config error: {0}")]
    ConfigFile(#[from] strata_config::ConfigError),

    #[error("filesystem error: {0}")]
    Fs(#[from] strata_fs::FsError),

    #[error("store error: {0}")]
    Store(#[from] strata_store::StoreError),

    #[error("fsck error: {0}")]
    Fsck(#[from] strata_fsck::FsckError),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RepoError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type RepoResult<T> = Result<T, RepoError>;
