use std::path::{Path, PathBuf};

use strata_fs::file_utils;
use strata_fs::FileSystem;
use strata_types::ObjectId;

use crate::error::{RepoError, RepoResult};

pub const DOT_GIT: &str = ".git";
pub const OBJECTS: &str = "objects";
pub const REFS: &str = "refs";
pub const HEAD: &str = "HEAD";
pub const CONFIG: &str = "config";
pub const INDEX: &str = "index";

const GITDIR_PREFIX: &[u8] = b"gitdir: ";
const SYMREF_PREFIX: &str = "ref: refs/";

/// Whether `dir` looks like a git directory: it has `objects/` and `refs/`,
/// and the first line of `HEAD` is a symbolic ref or an object id.
pub fn is_git_repository(fs: &dyn FileSystem, dir: &Path) -> bool {
    fs.is_dir(&dir.join(OBJECTS)) && fs.is_dir(&dir.join(REFS)) && is_valid_head(fs, &dir.join(HEAD))
}

fn is_valid_head(fs: &dyn FileSystem, head: &Path) -> bool {
    let Ok(content) = fs.read(head) else {
        return false;
    };
    let text = String::from_utf8_lossy(&content);
    let first = text.lines().next().unwrap_or("");
    first.starts_with(SYMREF_PREFIX) || ObjectId::is_valid_hex(first)
}

/// Read a `gitdir: <path>` pointer file and resolve its target.
///
/// Relative targets resolve against the directory holding the pointer.
pub fn read_gitdir_pointer(fs: &dyn FileSystem, pointer: &Path) -> RepoResult<PathBuf> {
    let content = fs.read(pointer).map_err(|e| RepoError::io(pointer, e))?;
    let Some(rest) = content.strip_prefix(GITDIR_PREFIX) else {
        return Err(invalid_pointer(pointer));
    };
    let line_end = rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
    let mut target = &rest[..line_end];
    while let [head @ .., b'\r'] = target {
        target = head;
    }
    if target.is_empty() {
        return Err(invalid_pointer(pointer));
    }
    let target = String::from_utf8_lossy(target);
    let base = pointer.parent().unwrap_or_else(|| Path::new("."));
    Ok(file_utils::normalize(&fs.resolve(base, &target)))
}

fn invalid_pointer(pointer: &Path) -> RepoError {
    RepoError::Config(format!("invalid gitdir pointer in {}", pointer.display()))
}
