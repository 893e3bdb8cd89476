//! File operations that tolerate transient contention.
//!
//! Antivirus scanners, indexing services and NFS clients can briefly hold a
//! file and make a delete or rename fail. The helpers here wrap the std calls
//! in a bounded retry loop with a fixed sleep, and collapse the per-attempt
//! failures into one error once the attempts are used up.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use bitflags::bitflags;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{FsError, Result};

/// Number of attempts used when retrying is requested.
pub const RETRY_ATTEMPTS: u32 = 10;

/// Pause between two attempts.
pub const RETRY_SLEEP: Duration = Duration::from_millis(100);

const STALE_FILE_HANDLE_PATTERN: &str = "stale .*file .*handle";

static STALE_FILE_HANDLE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(STALE_FILE_HANDLE_PATTERN).ok());

bitflags! {
    /// Options for [`delete`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeleteFlags: u32 {
        /// Delete directory contents too. Files go before subdirectories.
        const RECURSIVE = 1;
        /// Retry a failing delete up to [`RETRY_ATTEMPTS`] times.
        const RETRY = 2;
        /// A missing path is not an error.
        const SKIP_MISSING = 4;
        /// Swallow every failure.
        const IGNORE_ERRORS = 8;
        /// Only delete directories. Combined with `RECURSIVE` this removes a
        /// tree made solely of directories and fails on the first file.
        const EMPTY_DIRECTORIES_ONLY = 16;
    }
}

/// How often, and how patiently, an operation is retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts. Zero means the operation is skipped.
    pub attempts: u32,
    /// Sleep between two attempts.
    pub sleep: Duration,
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub const fn once() -> Self {
        Self {
            attempts: 1,
            sleep: RETRY_SLEEP,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: RETRY_ATTEMPTS,
            sleep: RETRY_SLEEP,
        }
    }
}

/// Options for [`rename`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenameOptions {
    /// Require an atomic move. A platform that cannot provide one fails
    /// immediately with [`FsError::AtomicMoveUnsupported`].
    pub atomic: bool,
    /// Retry behaviour for every other failure.
    pub retry: RetryPolicy,
}

impl RenameOptions {
    /// Atomic move with the default retry policy.
    pub fn atomic() -> Self {
        Self {
            atomic: true,
            retry: RetryPolicy::default(),
        }
    }
}

/// Delete a file or directory.
///
/// See [`DeleteFlags`] for the available modes.
pub fn delete(path: &Path, flags: DeleteFlags) -> Result<()> {
    let meta = fs::symlink_metadata(path).ok();
    if meta.is_none() && flags.contains(DeleteFlags::SKIP_MISSING) {
        return Ok(());
    }
    let is_dir = meta.as_ref().is_some_and(|m| m.is_dir());

    if is_dir && flags.contains(DeleteFlags::RECURSIVE) {
        delete_children(path, flags)?;
    }

    if flags.contains(DeleteFlags::EMPTY_DIRECTORIES_ONLY) && !is_dir {
        if flags.contains(DeleteFlags::IGNORE_ERRORS) {
            return Ok(());
        }
        return Err(FsError::DeleteFailed {
            path: absolute(path),
        });
    }

    let policy = if flags.contains(DeleteFlags::RETRY) {
        RetryPolicy::default()
    } else {
        RetryPolicy::once()
    };

    for attempt in 1..=policy.attempts {
        match remove_entry(path, is_dir) {
            Ok(()) => return Ok(()),
            Err(err) => {
                debug!(path = %path.display(), attempt, error = %err, "delete attempt failed");
            }
        }
        if attempt < policy.attempts {
            thread::sleep(policy.sleep);
        }
    }

    if flags.contains(DeleteFlags::IGNORE_ERRORS) {
        return Ok(());
    }
    warn!(path = %path.display(), attempts = policy.attempts, "giving up on delete");
    Err(FsError::DeleteFailed {
        path: absolute(path),
    })
}

fn delete_children(dir: &Path, flags: DeleteFlags) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(_) if flags.contains(DeleteFlags::IGNORE_ERRORS) => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for entry in entries.flatten() {
        if entry.file_type().is_ok_and(|t| t.is_dir()) {
            dirs.push(entry.path());
        } else {
            files.push(entry.path());
        }
    }

    // Files first: with EMPTY_DIRECTORIES_ONLY the first file aborts the
    // walk, and no directory may have been removed by then.
    for file in &files {
        delete(file, flags)?;
    }
    for sub in &dirs {
        delete(sub, flags)?;
    }
    Ok(())
}

fn remove_entry(path: &Path, is_dir: bool) -> io::Result<()> {
    if is_dir {
        fs::remove_dir(path)
    } else {
        fs::remove_file(path)
    }
}

/// Rename `src` to `dst`, replacing `dst` if it exists.
///
/// A failed attempt tries to remove the destination (recursively when it is
/// a tree made only of directories) and moves again right away. Only then
/// does the loop sleep and start the next attempt. A missing `src` never
/// touches `dst`. A zero-attempt policy returns `Ok` without doing anything.
pub fn rename(src: &Path, dst: &Path, options: RenameOptions) -> Result<()> {
    let attempts = options.retry.attempts;
    if attempts == 0 {
        return Ok(());
    }

    for attempt in 1..=attempts {
        match move_path(src, dst, options.atomic) {
            Ok(()) => return Ok(()),
            Err(err) if options.atomic && is_cross_device(&err) => {
                return Err(FsError::AtomicMoveUnsupported {
                    src: absolute(src),
                    dst: absolute(dst),
                });
            }
            Err(err) => {
                debug!(
                    src = %src.display(),
                    dst = %dst.display(),
                    attempt,
                    error = %err,
                    "rename failed, clearing destination"
                );
                if fs::symlink_metadata(src).is_ok() {
                    if remove_any(dst).is_err() {
                        let _ = delete(
                            dst,
                            DeleteFlags::EMPTY_DIRECTORIES_ONLY | DeleteFlags::RECURSIVE,
                        );
                    }
                    match move_path(src, dst, options.atomic) {
                        Ok(()) => return Ok(()),
                        Err(err) if options.atomic && is_cross_device(&err) => {
                            return Err(FsError::AtomicMoveUnsupported {
                                src: absolute(src),
                                dst: absolute(dst),
                            });
                        }
                        Err(_) => {}
                    }
                }
            }
        }
        if attempt < attempts {
            thread::sleep(options.retry.sleep);
        }
    }

    warn!(src = %src.display(), dst = %dst.display(), attempts, "giving up on rename");
    Err(FsError::RenameFailed {
        src: absolute(src),
        dst: absolute(dst),
    })
}

fn move_path(src: &Path, dst: &Path, atomic: bool) -> io::Result<()> {
    match fs::rename(src, dst) {
        Err(err) if !atomic && is_cross_device(&err) => {
            fs::copy(src, dst)?;
            fs::remove_file(src)
        }
        other => other,
    }
}

fn remove_any(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    remove_entry(path, meta.is_dir())
}

fn is_cross_device(err: &io::Error) -> bool {
    #[cfg(unix)]
    const CROSS_DEVICE: i32 = 18; // EXDEV
    #[cfg(windows)]
    const CROSS_DEVICE: i32 = 17; // ERROR_NOT_SAME_DEVICE
    #[cfg(not(any(unix, windows)))]
    const CROSS_DEVICE: i32 = -1;

    err.raw_os_error() == Some(CROSS_DEVICE)
}

/// Create a single directory.
///
/// With `skip_existing` an existing directory is accepted; an existing file
/// is still an error.
pub fn mkdir(path: &Path, skip_existing: bool) -> Result<()> {
    match fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            if skip_existing && path.is_dir() {
                Ok(())
            } else {
                Err(FsError::MkdirFailed {
                    path: absolute(path),
                })
            }
        }
        Err(err) => Err(err.into()),
    }
}

/// Create a directory and all missing parents.
///
/// Without `skip_existing` an existing `path` is an error.
pub fn mkdirs(path: &Path, skip_existing: bool) -> Result<()> {
    if !skip_existing && path.exists() {
        return Err(FsError::MkdirFailed {
            path: absolute(path),
        });
    }
    fs::create_dir_all(path)?;
    Ok(())
}

/// Create a new, empty file. Fails if anything already exists at `path`.
pub fn create_new_file(path: &Path) -> Result<()> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Err(FsError::AlreadyExists {
            path: absolute(path),
        }),
        Err(err) => Err(err.into()),
    }
}

/// Create a symbolic link at `path` pointing to `target`.
///
/// An existing file or link at `path` is replaced. An existing directory is
/// replaced only if it holds nothing but directories.
pub fn create_symlink(path: &Path, target: &str) -> Result<PathBuf> {
    if let Ok(meta) = fs::symlink_metadata(path) {
        if meta.is_file() || meta.file_type().is_symlink() {
            delete(path, DeleteFlags::empty())?;
        } else {
            delete(
                path,
                DeleteFlags::EMPTY_DIRECTORIES_ONLY | DeleteFlags::RECURSIVE,
            )?;
        }
    }

    #[cfg(unix)]
    std::os::unix::fs::symlink(target, path)?;
    #[cfg(windows)]
    std::os::windows::fs::symlink_file(target.replace('/', "\\"), path)?;

    Ok(path.to_path_buf())
}

/// Read a symbolic link. Returns `None` if `path` is not a link.
pub fn read_symlink(path: &Path) -> Result<Option<String>> {
    let meta = fs::symlink_metadata(path)?;
    if !meta.file_type().is_symlink() {
        return Ok(None);
    }
    let target = fs::read_link(path)?;
    Ok(Some(target.to_string_lossy().replace('\\', "/")))
}

/// Returns `true` if `err` reports a stale NFS file handle.
pub fn is_stale_file_handle(err: &io::Error) -> bool {
    #[cfg(target_os = "linux")]
    const ESTALE: Option<i32> = Some(116);
    #[cfg(target_os = "macos")]
    const ESTALE: Option<i32> = Some(70);
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    const ESTALE: Option<i32> = None;

    if ESTALE.is_some() && err.raw_os_error() == ESTALE {
        return true;
    }
    let message = err.to_string().to_lowercase();
    STALE_FILE_HANDLE
        .as_ref()
        .is_some_and(|re| re.is_match(&message))
}

/// Express `other` relative to `base`, both given as `separator`-delimited
/// strings. Returns an empty string when they are equal.
pub fn relativize_path(base: &str, other: &str, separator: char, case_sensitive: bool) -> String {
    if base == other {
        return String::new();
    }
    let base_segments = split_segments(base, separator);
    let other_segments = split_segments(other, separator);

    let common = base_segments
        .iter()
        .zip(other_segments.iter())
        .take_while(|(a, b)| {
            if case_sensitive {
                a == b
            } else {
                a.eq_ignore_ascii_case(b)
            }
        })
        .count();

    let mut out = String::new();
    for _ in common..base_segments.len() {
        out.push_str("..");
        out.push(separator);
    }
    let rest: Vec<&str> = other_segments[common..].to_vec();
    out.push_str(&rest.join(&separator.to_string()));
    out
}

/// [`relativize_path`] with the conventions of the current platform.
pub fn relativize_native_path(base: &str, other: &str) -> String {
    relativize_path(
        base,
        other,
        std::path::MAIN_SEPARATOR,
        !cfg!(any(windows, target_os = "macos")),
    )
}

// Trailing empty segments are dropped, leading ones kept.
fn split_segments(s: &str, separator: char) -> Vec<&str> {
    let mut segments: Vec<&str> = s.split(separator).collect();
    while segments.last().is_some_and(|seg| seg.is_empty()) {
        segments.pop();
    }
    segments
}

/// Lexically normalize a path: drop `.` components and fold `..` into the
/// preceding component. The filesystem is not consulted.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if popped {
                    out.pop();
                } else if !matches!(
                    out.components().next_back(),
                    Some(Component::RootDir | Component::Prefix(_))
                ) {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Make `path` absolute against the current directory and normalize it.
pub fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return normalize(path);
    }
    match std::env::current_dir() {
        Ok(cwd) => normalize(&cwd.join(path)),
        Err(_) => normalize(path),
    }
}

/// Returns `true` if `dir` has no entries.
pub fn is_directory_empty(dir: &Path) -> Result<bool> {
    Ok(fs::read_dir(dir)?.next().is_none())
}
