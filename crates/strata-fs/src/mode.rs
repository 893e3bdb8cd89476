//! Classification of working-tree entries into tree-entry modes.

use std::io;
use std::path::{Path, PathBuf};

use strata_types::FileMode;

use crate::vfs::{FileAttributes, FileSystem};

const DOT_GIT: &str = ".git";

/// How directories containing a `.git` entry are classified.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FileModeStrategy {
    /// A directory holding a `.git` file or directory is a gitlink.
    #[default]
    Default,
    /// Every directory is a plain tree.
    NoGitlinks,
}

impl FileModeStrategy {
    /// Mode of the entry at `path` with the given attributes.
    pub fn mode_for(&self, fs: &dyn FileSystem, path: &Path, attrs: &FileAttributes) -> FileMode {
        if attrs.is_symlink {
            FileMode::Symlink
        } else if attrs.is_dir {
            match self {
                Self::Default if fs.exists(&path.join(DOT_GIT)) => FileMode::Gitlink,
                _ => FileMode::Tree,
            }
        } else if attrs.is_executable {
            FileMode::ExecutableFile
        } else {
            FileMode::RegularFile
        }
    }
}

/// A classified directory entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub path: PathBuf,
    pub mode: FileMode,
    pub len: u64,
}

/// List `dir`, skipping `.git`, with every entry classified by `strategy`.
/// Entries come back sorted by name.
pub fn list_entries(
    fs: &dyn FileSystem,
    dir: &Path,
    strategy: FileModeStrategy,
) -> io::Result<Vec<FileEntry>> {
    let mut entries = Vec::new();
    for path in fs.read_dir(dir)? {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if name == DOT_GIT {
            continue;
        }
        let attrs = fs.attributes(&path)?;
        if !attrs.exists {
            continue;
        }
        entries.push(FileEntry {
            mode: strategy.mode_for(fs, &path, &attrs),
            len: attrs.len,
            name,
            path,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::NativeFileSystem;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("plain")).unwrap();
        fs::create_dir_all(dir.path().join("sub").join(".git")).unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        dir
    }

    #[test]
    fn default_strategy_detects_gitlinks() {
        let dir = tree();
        let entries = list_entries(&NativeFileSystem, dir.path(), FileModeStrategy::Default).unwrap();
        let modes: Vec<(&str, FileMode)> = entries.iter().map(|e| (e.name.as_str(), e.mode)).collect();
        assert_eq!(
            modes,
            vec![
                ("a.txt", FileMode::RegularFile),
                ("plain", FileMode::Tree),
                ("sub", FileMode::Gitlink),
            ]
        );
    }

    #[test]
    fn no_gitlinks_strategy_sees_only_trees() {
        let dir = tree();
        let entries = list_entries(&NativeFileSystem, dir.path(), FileModeStrategy::NoGitlinks).unwrap();
        assert!(entries.iter().all(|e| e.mode != FileMode::Gitlink));
    }

    #[cfg(unix)]
    #[test]
    fn executables_and_symlinks() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("run.sh");
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        std::os::unix::fs::symlink("run.sh", dir.path().join("link")).unwrap();

        let entries = list_entries(&NativeFileSystem, dir.path(), FileModeStrategy::Default).unwrap();
        assert_eq!(entries[0].name, "link");
        assert_eq!(entries[0].mode, FileMode::Symlink);
        assert_eq!(entries[1].mode, FileMode::ExecutableFile);
    }
}
