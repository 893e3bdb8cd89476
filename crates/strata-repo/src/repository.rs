use std::fmt;
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use strata_config::Config;
use strata_fs::{file_utils, LockFile};
use strata_fsck::TransferConfig;
use strata_store::LooseObjectDirectory;
use tracing::{debug, info, warn};

use crate::builder::RepositoryConfig;
use crate::error::{RepoError, RepoResult};
use crate::layout::{CONFIG, HEAD};
use crate::location::RepositoryLocation;

const INITIAL_HEAD: &str = "ref: refs/heads/master\n";

/// An opened repository.
///
/// Holds the resolved layout and reads the rest (config, object store,
/// transfer policy) on first use. Shared instances are handed out by
/// [`crate::RepositoryCache`] as [`RepositoryHandle`]s, which keep the use
/// count.
pub struct Repository {
    layout: RepositoryConfig,
    location: RepositoryLocation,
    config: OnceLock<Config>,
    objects: OnceLock<LooseObjectDirectory>,
    transfer: OnceLock<TransferConfig>,
    use_count: AtomicUsize,
    /// Milliseconds since the epoch when the count last dropped to zero.
    closed_at: AtomicU64,
    closed: AtomicBool,
}

impl Repository {
    pub fn new(layout: RepositoryConfig) -> Self {
        let location = RepositoryLocation::new(layout.git_dir());
        Self {
            layout,
            location,
            config: OnceLock::new(),
            objects: OnceLock::new(),
            transfer: OnceLock::new(),
            use_count: AtomicUsize::new(0),
            closed_at: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn layout(&self) -> &RepositoryConfig {
        &self.layout
    }

    pub fn location(&self) -> &RepositoryLocation {
        &self.location
    }

    pub fn git_dir(&self) -> &Path {
        self.layout.git_dir()
    }

    pub fn work_tree(&self) -> Option<&Path> {
        self.layout.work_tree()
    }

    pub fn is_bare(&self) -> bool {
        self.layout.is_bare()
    }

    /// The repository's `config` file, parsed on first use.
    pub fn config(&self) -> RepoResult<&Config> {
        if let Some(cfg) = self.config.get() {
            return Ok(cfg);
        }
        let cfg = Config::from_file(&self.git_dir().join(CONFIG))?;
        Ok(self.config.get_or_init(|| cfg))
    }

    /// The loose object store with its alternates.
    pub fn object_database(&self) -> RepoResult<&LooseObjectDirectory> {
        if let Some(db) = self.objects.get() {
            return Ok(db);
        }
        let fsync = self.config()?.get_bool("core", None, "fsyncObjectFiles", false)?;
        let db = LooseObjectDirectory::open(self.layout.object_dir(), self.layout.alternates())?
            .with_fsync(fsync);
        Ok(self.objects.get_or_init(|| db))
    }

    /// Validation and advertisement policy from this repository's config.
    pub fn transfer_config(&self) -> RepoResult<&TransferConfig> {
        if let Some(tc) = self.transfer.get() {
            return Ok(tc);
        }
        let tc = TransferConfig::new(self.config()?, self.layout.system().as_ref())?;
        Ok(self.transfer.get_or_init(|| tc))
    }

    /// A lock file for `relative`, resolved inside the git directory.
    pub fn lock_file(&self, relative: impl AsRef<Path>) -> LockFile {
        LockFile::new(self.git_dir().join(relative))
    }

    /// First line of `HEAD`, or `None` if there is no `HEAD`.
    pub fn read_head(&self) -> RepoResult<Option<String>> {
        let path = self.git_dir().join(HEAD);
        let content = match self.layout.fs().read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RepoError::io(path, e)),
        };
        let text = String::from_utf8_lossy(&content);
        Ok(Some(text.lines().next().unwrap_or("").trim_end_matches('\r').to_string()))
    }

    /// Write the on-disk skeleton of a new repository.
    ///
    /// Fails if the git directory already has a `config` file.
    pub fn create(&mut self, bare: bool) -> RepoResult<()> {
        let git_dir = self.git_dir().to_path_buf();
        let config_path = git_dir.join(CONFIG);
        if self.layout.fs().exists(&config_path) {
            return Err(RepoError::Config(format!(
                "repository already exists: {}",
                git_dir.display()
            )));
        }

        file_utils::mkdirs(&git_dir, true)?;
        file_utils::mkdirs(self.layout.object_dir(), true)?;
        for dir in ["refs/heads", "refs/tags"] {
            file_utils::mkdirs(&git_dir.join(dir), true)?;
        }

        let mut cfg = Config::new();
        cfg.set_string("core", None, "repositoryformatversion", "0");
        cfg.set_bool("core", None, "filemode", cfg!(unix));
        cfg.set_bool("core", None, "bare", bare);
        if !bare {
            cfg.set_bool("core", None, "logallrefupdates", true);
        }

        write_locked(&git_dir.join(HEAD), INITIAL_HEAD.as_bytes())?;
        write_locked(&config_path, cfg.to_text().as_bytes())?;

        self.config = OnceLock::new();
        self.objects = OnceLock::new();
        self.transfer = OnceLock::new();
        info!(git_dir = %git_dir.display(), bare, "created repository");
        Ok(())
    }

    /// Take a counted reference to this repository.
    pub fn acquire(self: &Arc<Self>) -> RepositoryHandle {
        self.use_count.fetch_add(1, Ordering::SeqCst);
        RepositoryHandle {
            repo: Arc::clone(self),
        }
    }

    /// Number of live handles.
    pub fn use_count(&self) -> usize {
        self.use_count.load(Ordering::SeqCst)
    }

    /// When the use count last dropped to zero.
    pub fn closed_at(&self) -> Option<SystemTime> {
        match self.closed_at.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(UNIX_EPOCH + Duration::from_millis(ms)),
        }
    }

    fn release(&self) {
        let previous = self
            .use_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match previous {
            Ok(1) => self.closed_at.store(now_millis(), Ordering::SeqCst),
            Ok(_) => {}
            Err(_) => warn!(git_dir = %self.git_dir().display(), "repository released more often than acquired"),
        }
    }

    /// Start the idle clock at `now_ms` without touching the use count.
    pub(crate) fn mark_idle(&self, now_ms: u64) {
        self.closed_at.store(now_ms, Ordering::SeqCst);
    }

    /// Unused, and unused for longer than `expire_after_ms`.
    pub(crate) fn is_expired(&self, now_ms: u64, expire_after_ms: u64) -> bool {
        self.use_count() == 0
            && now_ms.saturating_sub(self.closed_at.load(Ordering::SeqCst)) > expire_after_ms
    }

    /// Release the repository's resources. Called when the cache drops it.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(git_dir = %self.git_dir().display(), "closed repository");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("git_dir", &self.git_dir())
            .field("bare", &self.is_bare())
            .field("use_count", &self.use_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A counted reference to a shared [`Repository`].
///
/// Dropping the handle decrements the use count. Cloning takes another
/// count.
pub struct RepositoryHandle {
    repo: Arc<Repository>,
}

impl RepositoryHandle {
    pub fn repository(&self) -> &Arc<Repository> {
        &self.repo
    }
}

impl Deref for RepositoryHandle {
    type Target = Repository;

    fn deref(&self) -> &Repository {
        &self.repo
    }
}

impl Clone for RepositoryHandle {
    fn clone(&self) -> Self {
        self.repo.acquire()
    }
}

impl Drop for RepositoryHandle {
    fn drop(&mut self) {
        self.repo.release();
    }
}

impl fmt::Debug for RepositoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RepositoryHandle").field(&*self.repo).finish()
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn write_locked(target: &Path, content: &[u8]) -> RepoResult<()> {
    let mut lock = LockFile::new(target);
    if !lock.lock()? {
        return Err(RepoError::Locked {
            path: PathBuf::from(target),
        });
    }
    lock.write(content)?;
    if !lock.commit()? {
        return Err(RepoError::CommitFailed {
            path: PathBuf::from(target),
        });
    }
    Ok(())
}
