//! Process-wide cache of open repositories.
//!
//! Each location maps to one shared [`Repository`]. Callers hold
//! [`RepositoryHandle`]s; once the last handle is gone the entry may be
//! evicted after [`CacheConfig::expire_after`] milliseconds, either by an
//! explicit [`RepositoryCache::clear_all_expired`] or by the background
//! sweep thread.

use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::error::RepoResult;
use crate::location::{OpenRepository, RepositoryLocation};
use crate::repository::{now_millis, Repository, RepositoryHandle};

const STRIPES: usize = 4;

/// Eviction timing, in milliseconds.
///
/// When read through serde a missing `cleanup_delay` is derived from
/// `expire_after`, the same way [`CacheConfig::with_expire_after`] does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "CacheConfigFile")]
pub struct CacheConfig {
    /// How long an unused repository stays cached.
    pub expire_after: u64,
    /// Interval between background sweeps. [`CacheConfig::NO_CLEANUP`]
    /// disables the sweep thread.
    pub cleanup_delay: u64,
}

impl CacheConfig {
    pub const DEFAULT_EXPIRE_AFTER: u64 = 60 * 60 * 1000;
    pub const NO_CLEANUP: u64 = u64::MAX;
    const MAX_AUTO_DELAY: u64 = 10 * 60 * 1000;

    /// Expire after `expire_after` ms and sweep at a tenth of that, capped
    /// at ten minutes.
    pub fn with_expire_after(expire_after: u64) -> Self {
        Self {
            expire_after,
            cleanup_delay: (expire_after / 10).min(Self::MAX_AUTO_DELAY),
        }
    }

    pub fn without_cleanup(mut self) -> Self {
        self.cleanup_delay = Self::NO_CLEANUP;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::with_expire_after(Self::DEFAULT_EXPIRE_AFTER)
    }
}

/// On-disk form of [`CacheConfig`]; every field is optional.
#[derive(Deserialize)]
struct CacheConfigFile {
    #[serde(default = "default_expire_after")]
    expire_after: u64,
    cleanup_delay: Option<u64>,
}

fn default_expire_after() -> u64 {
    CacheConfig::DEFAULT_EXPIRE_AFTER
}

impl From<CacheConfigFile> for CacheConfig {
    fn from(file: CacheConfigFile) -> Self {
        let derived = Self::with_expire_after(file.expire_after);
        Self {
            cleanup_delay: file.cleanup_delay.unwrap_or(derived.cleanup_delay),
            ..derived
        }
    }
}

struct CacheInner {
    entries: RwLock<HashMap<RepositoryLocation, Arc<Repository>>>,
    stripes: [Mutex<()>; STRIPES],
    config: RwLock<CacheConfig>,
}

impl CacheInner {
    fn stripe(&self, location: &RepositoryLocation) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        location.hash(&mut hasher);
        &self.stripes[((hasher.finish() >> 1) % STRIPES as u64) as usize]
    }

    /// Look up and acquire under the read lock, so eviction (which needs
    /// the write lock) cannot slip in between.
    fn acquire(&self, location: &RepositoryLocation) -> Option<RepositoryHandle> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(location).map(Repository::acquire)
    }

    fn clear_expired(&self) -> usize {
        let expire_after = self
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .expire_after;
        let now = now_millis();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|location, repo| {
            if repo.is_expired(now, expire_after) {
                repo.close();
                debug!(%location, "evicted expired repository");
                false
            } else {
                true
            }
        });
        before - entries.len()
    }
}

struct Sweeper {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

/// Shares one [`Repository`] per location across callers.
pub struct RepositoryCache {
    inner: Arc<CacheInner>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl RepositoryCache {
    pub fn new(config: CacheConfig) -> Self {
        let cache = Self {
            inner: Arc::new(CacheInner {
                entries: RwLock::new(HashMap::new()),
                stripes: Default::default(),
                config: RwLock::new(config),
            }),
            sweeper: Mutex::new(None),
        };
        cache.start_sweeper(config);
        cache
    }

    pub fn config(&self) -> CacheConfig {
        *self.inner.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached repository for `key`, opening it on a miss.
    ///
    /// Concurrent callers for the same location construct it once.
    pub fn open(&self, key: &dyn OpenRepository, must_exist: bool) -> RepoResult<RepositoryHandle> {
        let location = key.location();
        if let Some(handle) = self.inner.acquire(location) {
            trace!(%location, "repository cache hit");
            return Ok(handle);
        }

        let _guard = self
            .inner
            .stripe(location)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = self.inner.acquire(location) {
            return Ok(handle);
        }

        let repo = Arc::new(key.open(must_exist)?);
        let mut entries = self.inner.entries.write().unwrap_or_else(PoisonError::into_inner);
        let handle = match entries.entry(location.clone()) {
            Entry::Occupied(slot) => {
                // registered while we were opening; keep that instance
                repo.close();
                debug!(%location, "repository registered concurrently");
                slot.get().acquire()
            }
            Entry::Vacant(slot) => {
                debug!(%location, "opened repository");
                slot.insert(repo).acquire()
            }
        };
        Ok(handle)
    }

    /// Cache `repo` under its own location. A different instance already
    /// cached there is closed.
    ///
    /// The idle clock starts now, so an unused instance gets a full
    /// `expire_after` before the sweep may take it.
    pub fn register(&self, repo: Arc<Repository>) {
        repo.mark_idle(now_millis());
        let location = repo.location().clone();
        let previous = self
            .inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(location.clone(), Arc::clone(&repo));
        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, &repo) {
                previous.close();
                debug!(%location, "replaced cached repository");
            }
        }
    }

    /// Drop `repo`'s location from the cache and close what was cached there.
    pub fn close(&self, repo: &Repository) {
        if let Some(cached) = self.unregister(repo.location()) {
            cached.close();
        }
    }

    /// Remove a location without closing its repository.
    pub fn unregister(&self, location: &RepositoryLocation) -> Option<Arc<Repository>> {
        self.inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(location)
    }

    pub fn is_cached(&self, location: &RepositoryLocation) -> bool {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(location)
    }

    /// Cached locations, sorted.
    pub fn locations(&self) -> Vec<RepositoryLocation> {
        let mut locations: Vec<_> = self
            .inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        locations.sort();
        locations
    }

    pub fn len(&self) -> usize {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close and remove every entry, in use or not.
    pub fn clear(&self) {
        let drained: Vec<_> = self
            .inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (_, repo) in &drained {
            repo.close();
        }
        info!(count = drained.len(), "cleared repository cache");
    }

    /// Evict every unused entry idle for longer than `expire_after`.
    /// Returns how many were evicted.
    pub fn clear_all_expired(&self) -> usize {
        self.inner.clear_expired()
    }

    /// Apply new timing. The sweep thread is restarted with the new delay.
    pub fn reconfigure(&self, config: CacheConfig) {
        self.stop_sweeper();
        *self.inner.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        self.start_sweeper(config);
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn start_sweeper(&self, config: CacheConfig) {
        if config.cleanup_delay == CacheConfig::NO_CLEANUP {
            debug!("repository cache sweep disabled");
            return;
        }
        let interval = Duration::from_millis(config.cleanup_delay.max(1));
        let inner: Weak<CacheInner> = Arc::downgrade(&self.inner);
        let (shutdown, rx) = mpsc::channel::<()>();

        let spawned = thread::Builder::new()
            .name("strata-cache-sweep".into())
            .spawn(move || loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(inner) = inner.upgrade() else { break };
                        let evicted = inner.clear_expired();
                        if evicted > 0 {
                            debug!(evicted, "repository cache sweep");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });

        match spawned {
            Ok(handle) => {
                *self.sweeper.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(Sweeper { shutdown, handle });
                debug!(interval_ms = config.cleanup_delay, "repository cache sweep started");
            }
            Err(e) => warn!(error = %e, "could not start repository cache sweep"),
        }
    }

    fn stop_sweeper(&self) {
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.shutdown.send(());
            if sweeper.handle.join().is_err() {
                warn!("repository cache sweep thread panicked");
            }
        }
    }
}

impl Default for RepositoryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl Drop for RepositoryCache {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}
