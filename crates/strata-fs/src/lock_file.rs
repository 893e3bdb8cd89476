//! Atomic file replacement through a `<target>.lock` sibling.
//!
//! Whoever manages to create the lock file exclusively owns the right to
//! replace the target. New content is written to the lock file and then
//! renamed over the target, so readers only ever see the old or the new
//! content in full.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};

use strata_types::ObjectId;
use tracing::{debug, error, warn};

use crate::error::{FsError, Result};
use crate::file_utils::{self, DeleteFlags, RenameOptions};
use crate::snapshot::FileSnapshot;

/// Suffix appended to the target's file name to form the lock path.
pub const LOCK_SUFFIX: &str = ".lock";

/// Poll interval of [`LockFile::wait_for_stat_change`].
pub const STAT_CHANGE_POLL: Duration = Duration::from_millis(25);

/// Polls after which [`LockFile::wait_for_stat_change`] gives up (10 s).
pub const STAT_CHANGE_MAX_RETRIES: u32 = 400;

/// Lifecycle of a [`LockFile`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockState {
    /// Not locked yet, or the last `lock()` lost the race.
    Idle,
    /// The lock path exists and belongs to us.
    Locked,
    /// The lock file was renamed over the target.
    Committed,
    /// The lock file was deleted without touching the target.
    RolledBack,
}

/// Exclusive, atomic replacement of a single file.
///
/// A `LockFile` that is dropped while still locked rolls back: the lock path
/// is deleted and the target is left untouched.
pub struct LockFile {
    target: PathBuf,
    lock_path: PathBuf,
    out: Option<File>,
    state: LockState,
    need_snapshot: bool,
    fsync: bool,
    commit_snapshot: Option<FileSnapshot>,
}

impl LockFile {
    /// Prepare a lock for `target`. Nothing touches the disk until
    /// [`lock`](Self::lock) is called.
    pub fn new(target: impl Into<PathBuf>) -> Self {
        let target = target.into();
        let lock_path = lock_path_for(&target);
        Self {
            target,
            lock_path,
            out: None,
            state: LockState::Idle,
            need_snapshot: false,
            fsync: false,
            commit_snapshot: None,
        }
    }

    /// Remove a stray lock file left behind for `target`.
    ///
    /// Returns `true` if the lock path is gone afterwards.
    pub fn unlock_path(target: &Path) -> bool {
        let lock_path = lock_path_for(target);
        match file_utils::delete(&lock_path, DeleteFlags::RETRY | DeleteFlags::SKIP_MISSING) {
            Ok(()) => true,
            Err(err) => {
                error!(path = %lock_path.display(), error = %err, "could not remove lock file");
                false
            }
        }
    }

    /// Try to acquire the lock.
    ///
    /// Returns `Ok(false)` when someone else holds it. That is ordinary
    /// contention, not an error; the target is never touched in that case.
    pub fn lock(&mut self) -> Result<bool> {
        if let Some(parent) = self.lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                file_utils::mkdirs(parent, true)?;
            }
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
        {
            Ok(file) => {
                self.out = Some(file);
                self.state = LockState::Locked;
                self.commit_snapshot = None;
                debug!(path = %self.lock_path.display(), "lock acquired");
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %self.lock_path.display(), "lock held elsewhere");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Acquire the lock and seed it with the target's current content, so
    /// later writes extend the file rather than replace it.
    pub fn lock_for_append(&mut self) -> Result<bool> {
        if !self.lock()? {
            return Ok(false);
        }
        self.copy_current_content()?;
        Ok(true)
    }

    /// Copy the target's content into the lock file. A missing target has
    /// no content and is skipped; any other failure unlocks.
    pub fn copy_current_content(&mut self) -> Result<()> {
        self.require_lock()?;
        let mut src = match File::open(&self.target) {
            Ok(src) => src,
            Err(err) if err.kind() == io::ErrorKind::NotFound && !self.target.exists() => {
                return Ok(());
            }
            Err(err) => {
                self.unlock();
                return Err(err.into());
            }
        };

        let copied = match self.out.as_mut() {
            Some(out) => io::copy(&mut src, out),
            None => Err(io::Error::other("lock output closed")),
        };
        if let Err(err) = copied {
            self.unlock();
            return Err(err.into());
        }
        Ok(())
    }

    /// Write `content` as the complete new file content and close the
    /// output. A failure unlocks before it is returned.
    pub fn write(&mut self, content: &[u8]) -> Result<()> {
        self.require_lock()?;
        let fsync = self.fsync;
        let result = match self.out.take() {
            Some(mut out) => out
                .write_all(content)
                .and_then(|()| if fsync { out.sync_all() } else { Ok(()) }),
            None => Err(io::Error::other("lock output closed")),
        };
        if let Err(err) = result {
            self.unlock();
            return Err(err.into());
        }
        Ok(())
    }

    /// Write an object id followed by a newline, the format of a loose ref.
    pub fn write_id(&mut self, id: &ObjectId) -> Result<()> {
        let mut line = id.to_hex().into_bytes();
        line.push(b'\n');
        self.write(&line)
    }

    /// Stream content into the lock file.
    ///
    /// Call [`LockWriter::finish`] to close the output before committing.
    /// Dropping the writer without finishing, or any write error, unlocks.
    pub fn output_stream(&mut self) -> Result<LockWriter<'_>> {
        self.require_lock()?;
        Ok(LockWriter {
            lock: self,
            finished: false,
        })
    }

    /// Request a snapshot of the lock file just before it is committed.
    pub fn set_need_snapshot(&mut self, on: bool) {
        self.need_snapshot = on;
    }

    /// Request an fsync when the output is closed.
    pub fn set_fsync(&mut self, on: bool) {
        self.fsync = on;
    }

    /// Wait until the lock file's modification time differs from the
    /// target's, bumping the lock file's timestamp forward while waiting.
    ///
    /// Filesystems with coarse timestamps could otherwise make the replaced
    /// target look unchanged. Gives up with [`FsError::StatChangeTimeout`]
    /// after [`STAT_CHANGE_MAX_RETRIES`] polls.
    pub fn wait_for_stat_change(&self) -> Result<()> {
        self.wait_for_stat_change_within(STAT_CHANGE_MAX_RETRIES)
    }

    /// [`wait_for_stat_change`](Self::wait_for_stat_change) with an explicit
    /// poll budget.
    pub fn wait_for_stat_change_within(&self, max_retries: u32) -> Result<()> {
        let original = FileSnapshot::save(&self.target);
        let mut current = FileSnapshot::save(&self.lock_path);
        let mut attempts = 0;
        while original.same_modification_time(&current) {
            if attempts >= max_retries {
                return Err(FsError::StatChangeTimeout {
                    path: self.lock_path.clone(),
                    attempts,
                });
            }
            attempts += 1;
            thread::sleep(STAT_CHANGE_POLL);
            let touched = OpenOptions::new()
                .write(true)
                .open(&self.lock_path)
                .and_then(|f| f.set_modified(SystemTime::now()));
            if touched.is_ok() {
                current = FileSnapshot::save(&self.lock_path);
            }
        }
        Ok(())
    }

    /// Rename the lock file over the target.
    ///
    /// The output must be closed first, by [`write`](Self::write) or
    /// [`LockWriter::finish`]; otherwise the lock is released and
    /// [`FsError::LockNotClosed`] returned. On rename failure the lock is
    /// released and `Ok(false)` returned: the target still has its old
    /// content.
    pub fn commit(&mut self) -> Result<bool> {
        if self.out.is_some() {
            self.unlock();
            return Err(FsError::LockNotClosed {
                path: self.target.clone(),
            });
        }
        if self.state != LockState::Locked {
            return Err(FsError::LockNotHeld {
                path: self.target.clone(),
            });
        }

        self.save_stat_information();
        match file_utils::rename(&self.lock_path, &self.target, RenameOptions::atomic()) {
            Ok(()) => {
                self.state = LockState::Committed;
                debug!(path = %self.target.display(), "lock committed");
                Ok(true)
            }
            Err(err) => {
                warn!(path = %self.target.display(), error = %err, "commit failed, rolling back");
                self.unlock();
                Ok(false)
            }
        }
    }

    /// Take the commit snapshot now instead of during commit.
    pub fn create_commit_snapshot(&mut self) {
        self.save_stat_information();
    }

    fn save_stat_information(&mut self) {
        if self.need_snapshot {
            self.commit_snapshot = Some(FileSnapshot::save(&self.lock_path));
        }
    }

    /// Snapshot taken at commit, if one was requested.
    pub fn commit_snapshot(&self) -> Option<&FileSnapshot> {
        self.commit_snapshot.as_ref()
    }

    /// Modification time of the committed file, if a snapshot was taken.
    pub fn commit_last_modified(&self) -> Option<SystemTime> {
        self.commit_snapshot.and_then(|s| s.last_modified())
    }

    /// Release the lock without committing.
    ///
    /// Safe to call at any time and any number of times.
    pub fn unlock(&mut self) {
        self.out = None;
        if self.state == LockState::Locked {
            self.state = LockState::RolledBack;
            match file_utils::delete(
                &self.lock_path,
                DeleteFlags::RETRY | DeleteFlags::SKIP_MISSING,
            ) {
                Ok(()) => debug!(path = %self.lock_path.display(), "lock released"),
                Err(err) => {
                    error!(path = %self.lock_path.display(), error = %err, "could not remove lock file")
                }
            }
        }
    }

    fn require_lock(&mut self) -> Result<()> {
        if self.out.is_none() {
            self.unlock();
            return Err(FsError::LockNotHeld {
                path: self.target.clone(),
            });
        }
        Ok(())
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.state == LockState::Locked
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        self.unlock();
    }
}

impl fmt::Debug for LockFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockFile")
            .field("lock_path", &self.lock_path)
            .field("state", &self.state)
            .finish()
    }
}

/// The sibling lock path for `target`.
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}

/// Streaming writer over a held [`LockFile`].
pub struct LockWriter<'a> {
    lock: &'a mut LockFile,
    finished: bool,
}

impl LockWriter<'_> {
    /// Flush and close the output so the lock can be committed.
    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        let fsync = self.lock.fsync;
        let result = match self.lock.out.take() {
            Some(mut out) => out
                .flush()
                .and_then(|()| if fsync { out.sync_all() } else { Ok(()) }),
            None => {
                return Err(FsError::LockNotHeld {
                    path: self.lock.target.clone(),
                })
            }
        };
        if let Err(err) = result {
            self.lock.unlock();
            return Err(err.into());
        }
        Ok(())
    }

    fn with_output<T>(&mut self, op: impl FnOnce(&mut File) -> io::Result<T>) -> io::Result<T> {
        let result = match self.lock.out.as_mut() {
            Some(out) => op(out),
            None => Err(io::Error::other("lock output closed")),
        };
        if result.is_err() {
            self.lock.unlock();
        }
        result
    }
}

impl Write for LockWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_output(|out| out.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_output(|out| out.flush())
    }
}

impl Drop for LockWriter<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.lock.unlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Barrier;
    use tempfile::TempDir;

    fn target_in(dir: &TempDir) -> PathBuf {
        dir.path().join("HEAD")
    }

    // ---- Test 1: lock, write, commit round-trip ----

    #[test]
    fn write_and_commit_replaces_content() {
        let dir = TempDir::new().unwrap();
        let target = target_in(&dir);
        fs::write(&target, b"old\n").unwrap();

        let mut lock = LockFile::new(&target);
        assert!(lock.lock().unwrap());
        assert!(lock.lock_path().exists());
        lock.write(b"new content\n").unwrap();
        assert!(lock.commit().unwrap());

        assert_eq!(fs::read(&target).unwrap(), b"new content\n");
        assert!(!lock.lock_path().exists());
        assert_eq!(lock.state(), LockState::Committed);
    }

    #[test]
    fn commit_creates_missing_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("refs").join("heads").join("main");

        let mut lock = LockFile::new(&target);
        assert!(lock.lock().unwrap());
        let id = ObjectId::from_raw([7; 20]);
        lock.write_id(&id).unwrap();
        assert!(lock.commit().unwrap());

        assert_eq!(fs::read_to_string(&target).unwrap(), format!("{}\n", id));
    }

    // ---- Test 2: contention ----

    #[test]
    fn second_lock_fails_and_leaves_target_alone() {
        let dir = TempDir::new().unwrap();
        let target = target_in(&dir);
        fs::write(&target, b"original").unwrap();

        let mut first = LockFile::new(&target);
        assert!(first.lock().unwrap());

        let mut second = LockFile::new(&target);
        assert!(!second.lock().unwrap());
        assert_eq!(second.state(), LockState::Idle);
        drop(second);

        // The loser must not have removed the winner's lock.
        assert!(first.lock_path().exists());
        assert_eq!(fs::read(&target).unwrap(), b"original");
    }

    #[test]
    fn concurrent_lockers_have_exactly_one_winner() {
        let dir = TempDir::new().unwrap();
        let target = target_in(&dir);
        let barrier = Barrier::new(8);

        let locks: Vec<(bool, LockFile)> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        let mut lock = LockFile::new(&target);
                        barrier.wait();
                        let won = lock.lock().unwrap();
                        (won, lock)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(locks.iter().filter(|(won, _)| *won).count(), 1);
    }

    // ---- Test 3: unlock ----

    #[test]
    fn unlock_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let target = target_in(&dir);
        let mut lock = LockFile::new(&target);
        assert!(lock.lock().unwrap());
        lock.unlock();
        lock.unlock();
        assert!(!lock.lock_path().exists());
        assert_eq!(lock.state(), LockState::RolledBack);
    }

    #[test]
    fn unlock_without_lock_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let target = target_in(&dir);
        fs::write(&target, b"keep").unwrap();
        let mut lock = LockFile::new(&target);
        lock.unlock();
        assert_eq!(lock.state(), LockState::Idle);
        assert_eq!(fs::read(&target).unwrap(), b"keep");
    }

    #[test]
    fn unlock_does_not_remove_a_foreign_lock() {
        let dir = TempDir::new().unwrap();
        let target = target_in(&dir);
        let mut owner = LockFile::new(&target);
        assert!(owner.lock().unwrap());

        let mut other = LockFile::new(&target);
        assert!(!other.lock().unwrap());
        other.unlock();
        assert!(owner.lock_path().exists());
    }

    #[test]
    fn drop_rolls_back() {
        let dir = TempDir::new().unwrap();
        let target = target_in(&dir);
        fs::write(&target, b"old").unwrap();
        let lock_path = {
            let mut lock = LockFile::new(&target);
            assert!(lock.lock().unwrap());
            lock.write(b"new").unwrap();
            lock.lock_path().to_path_buf()
        };
        assert!(!lock_path.exists());
        assert_eq!(fs::read(&target).unwrap(), b"old");
    }

    // ---- Test 4: append ----

    #[test]
    fn lock_for_append_extends_content() {
        let dir = TempDir::new().unwrap();
        let target = target_in(&dir);
        fs::write(&target, b"line 1\n").unwrap();

        let mut lock = LockFile::new(&target);
        assert!(lock.lock_for_append().unwrap());
        let mut out = lock.output_stream().unwrap();
        out.write_all(b"line 2\n").unwrap();
        out.finish().unwrap();
        assert!(lock.commit().unwrap());

        assert_eq!(fs::read(&target).unwrap(), b"line 1\nline 2\n");
    }

    #[test]
    fn lock_for_append_tolerates_missing_target() {
        let dir = TempDir::new().unwrap();
        let target = target_in(&dir);
        let mut lock = LockFile::new(&target);
        assert!(lock.lock_for_append().unwrap());
        lock.write(b"fresh").unwrap();
        assert!(lock.commit().unwrap());
        assert_eq!(fs::read(&target).unwrap(), b"fresh");
    }

    // ---- Test 5: state errors ----

    #[test]
    fn commit_with_open_output_is_a_state_error() {
        let dir = TempDir::new().unwrap();
        let target = target_in(&dir);
        let mut lock = LockFile::new(&target);
        assert!(lock.lock().unwrap());

        let err = lock.commit().unwrap_err();
        assert!(matches!(err, FsError::LockNotClosed { .. }));
        assert!(!lock.lock_path().exists());
        assert!(!target.exists());
    }

    #[test]
    fn write_without_lock_is_a_state_error() {
        let dir = TempDir::new().unwrap();
        let mut lock = LockFile::new(target_in(&dir));
        let err = lock.write(b"x").unwrap_err();
        assert!(matches!(err, FsError::LockNotHeld { .. }));
    }

    #[test]
    fn dropped_writer_unlocks() {
        let dir = TempDir::new().unwrap();
        let target = target_in(&dir);
        let mut lock = LockFile::new(&target);
        assert!(lock.lock().unwrap());
        {
            let mut out = lock.output_stream().unwrap();
            out.write_all(b"partial").unwrap();
        }
        assert_eq!(lock.state(), LockState::RolledBack);
        assert!(!lock.lock_path().exists());
        assert!(!target.exists());
    }

    // ---- Test 6: crash before commit ----

    #[test]
    fn abandoned_writer_leaves_old_content() {
        let dir = TempDir::new().unwrap();
        let target = target_in(&dir);
        fs::write(&target, b"old content").unwrap();

        let mut lock = LockFile::new(&target);
        assert!(lock.lock().unwrap());
        lock.write(b"new content that never lands").unwrap();
        // Simulate the process dying before rename: no drop, no commit.
        std::mem::forget(lock);

        assert_eq!(fs::read(&target).unwrap(), b"old content");

        let mut next = LockFile::new(&target);
        assert!(!next.lock().unwrap());
        assert!(LockFile::unlock_path(&target));
        assert!(next.lock().unwrap());
    }

    // ---- Test 7: snapshots ----

    #[test]
    fn commit_snapshot_is_taken_on_request() {
        let dir = TempDir::new().unwrap();
        let target = target_in(&dir);
        let mut lock = LockFile::new(&target);
        lock.set_need_snapshot(true);
        lock.set_fsync(true);
        assert!(lock.lock().unwrap());
        lock.write(b"12345").unwrap();
        assert!(lock.commit().unwrap());

        let snap = lock.commit_snapshot().unwrap();
        assert_eq!(snap.size(), 5);
        assert!(lock.commit_last_modified().is_some());
    }

    #[test]
    fn wait_for_stat_change_moves_the_timestamp() {
        let dir = TempDir::new().unwrap();
        let target = target_in(&dir);
        fs::write(&target, b"old").unwrap();
        let mut lock = LockFile::new(&target);
        assert!(lock.lock().unwrap());
        lock.write(b"new").unwrap();

        let same = fs::metadata(&target).unwrap().modified().unwrap();
        File::options()
            .write(true)
            .open(lock.lock_path())
            .unwrap()
            .set_modified(same)
            .unwrap();

        lock.wait_for_stat_change().unwrap();
        let target_snap = FileSnapshot::save(&target);
        let lock_snap = FileSnapshot::save(lock.lock_path());
        assert!(!target_snap.same_modification_time(&lock_snap));
    }

    #[test]
    fn lock_path_appends_suffix() {
        assert_eq!(
            lock_path_for(Path::new("/repo/.git/config")),
            PathBuf::from("/repo/.git/config.lock")
        );
    }
}
