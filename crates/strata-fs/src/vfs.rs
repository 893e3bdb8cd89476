use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Attributes of a directory entry, read without following symlinks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileAttributes {
    pub exists: bool,
    pub is_dir: bool,
    pub is_file: bool,
    pub is_symlink: bool,
    pub is_executable: bool,
    pub len: u64,
    pub modified: Option<SystemTime>,
}

impl FileAttributes {
    /// Attributes of a path that does not exist.
    pub fn missing() -> Self {
        Self::default()
    }
}

/// The filesystem operations repository discovery and file classification
/// need, abstracted from the native API so behaviour can be swapped per
/// platform or faked in tests.
pub trait FileSystem: Send + Sync + fmt::Debug {
    /// Read attributes of `path`. A missing path yields
    /// [`FileAttributes::missing`] rather than an error.
    fn attributes(&self, path: &Path) -> io::Result<FileAttributes>;

    /// List the entries of a directory.
    fn read_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    /// Read a whole file.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Resolve `name` against `dir`. Absolute names are returned unchanged.
    fn resolve(&self, dir: &Path, name: &str) -> PathBuf {
        let candidate = Path::new(name);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            dir.join(candidate)
        }
    }

    fn exists(&self, path: &Path) -> bool {
        self.attributes(path).is_ok_and(|a| a.exists)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.attributes(path).is_ok_and(|a| a.is_dir)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.attributes(path).is_ok_and(|a| a.is_file)
    }
}

/// [`FileSystem`] backed by `std::fs`.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeFileSystem;

impl FileSystem for NativeFileSystem {
    fn attributes(&self, path: &Path) -> io::Result<FileAttributes> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(FileAttributes::missing())
            }
            Err(err) => return Err(err),
        };
        Ok(FileAttributes {
            exists: true,
            is_dir: meta.is_dir(),
            is_file: meta.is_file(),
            is_symlink: meta.file_type().is_symlink(),
            is_executable: is_executable(&meta),
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }

    fn read_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect()
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.is_file() && meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    false
}
