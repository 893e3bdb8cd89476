use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use strata_fs::file_utils;
use strata_fs::{FileSystem, NativeFileSystem};

use crate::builder::RepositoryBuilder;
use crate::error::{RepoError, RepoResult};
use crate::layout::{self, DOT_GIT};
use crate::repository::Repository;

/// Canonical directory of a repository, used as the cache key.
///
/// Symlinks are resolved when the directory exists. A directory that does
/// not exist yet is made absolute and normalized instead.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RepositoryLocation(PathBuf);

impl RepositoryLocation {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let canonical = fs::canonicalize(path)
            .unwrap_or_else(|_| file_utils::normalize(&file_utils::absolute(path)));
        Self(canonical)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for RepositoryLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Something the cache can open: a location plus a way to build the
/// repository that lives there.
pub trait OpenRepository: Send + Sync {
    fn location(&self) -> &RepositoryLocation;

    /// Build the repository. With `must_exist`, a location that does not
    /// hold a repository fails with [`RepoError::NotFound`].
    fn open(&self, must_exist: bool) -> RepoResult<Repository>;
}

/// How a cache key was derived from the path the caller gave.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RepositoryKey {
    /// The path is the git directory.
    Exact(RepositoryLocation),
    /// The git directory was found near the path: the path itself, its
    /// `.git` child or its `.git` sibling.
    Lenient(RepositoryLocation),
}

impl RepositoryKey {
    pub fn exact(git_dir: impl AsRef<Path>) -> Self {
        Self::Exact(RepositoryLocation::new(git_dir))
    }

    /// Try `dir`, then `dir/.git`, then `dir.git`. Falls back to `dir` when
    /// none of them is a repository.
    pub fn lenient(dir: impl AsRef<Path>) -> Self {
        Self::lenient_with(dir, &NativeFileSystem)
    }

    pub fn lenient_with(dir: impl AsRef<Path>, fs: &dyn FileSystem) -> Self {
        Self::Lenient(RepositoryLocation::new(resolve_lenient(dir.as_ref(), fs)))
    }

    pub fn location(&self) -> &RepositoryLocation {
        match self {
            Self::Exact(loc) | Self::Lenient(loc) => loc,
        }
    }
}

impl OpenRepository for RepositoryKey {
    fn location(&self) -> &RepositoryLocation {
        RepositoryKey::location(self)
    }

    fn open(&self, must_exist: bool) -> RepoResult<Repository> {
        let path = self.location().path();
        if must_exist && !layout::is_git_repository(&NativeFileSystem, path) {
            return Err(RepoError::NotFound {
                path: path.to_path_buf(),
            });
        }
        RepositoryBuilder::new()
            .git_dir(path)
            .must_exist(must_exist)
            .build()
    }
}

fn resolve_lenient(dir: &Path, fs: &dyn FileSystem) -> PathBuf {
    if layout::is_git_repository(fs, dir) {
        return dir.to_path_buf();
    }
    let child = dir.join(DOT_GIT);
    if layout::is_git_repository(fs, &child) {
        return child;
    }
    if let Some(name) = dir.file_name() {
        let mut sibling_name = name.to_os_string();
        sibling_name.push(DOT_GIT);
        let sibling = dir.with_file_name(sibling_name);
        if layout::is_git_repository(fs, &sibling) {
            return sibling;
        }
    }
    dir.to_path_buf()
}
