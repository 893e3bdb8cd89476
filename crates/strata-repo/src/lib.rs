//! Repository discovery, layout and the shared repository cache.
//!
//! A repository is found with [`RepositoryBuilder`] (explicit paths, the
//! `GIT_*` environment, or an upward search bounded by ceilings), opened as
//! a [`Repository`], and shared across callers through a
//! [`RepositoryCache`] keyed by canonical [`RepositoryLocation`].
//!
//! # Modules
//!
//! - [`builder`] -- property resolution and the upward `.git` search
//! - [`layout`] -- on-disk names and the "is this a git dir" test
//! - [`location`] -- cache keys and the [`OpenRepository`] seam
//! - [`repository`] -- lazy config, object store and transfer policy
//! - [`cache`] -- use-counted sharing with timed eviction
//!
//! # Example
//!
//! ```no_run
//! use strata_repo::{CacheConfig, RepositoryCache, RepositoryKey};
//!
//! let cache = RepositoryCache::new(CacheConfig::default());
//! let repo = cache.open(&RepositoryKey::lenient("/srv/git/project"), true)?;
//! println!("HEAD is {:?}", repo.read_head()?);
//! # Ok::<(), strata_repo::RepoError>(())
//! ```

pub mod builder;
pub mod cache;
pub mod error;
pub mod layout;
pub mod location;
pub mod repository;

#[cfg(test)]
mod testing;

pub use builder::{RepositoryBuilder, RepositoryConfig};
pub use cache::{CacheConfig, RepositoryCache};
pub use error::{RepoError, RepoResult};
pub use location::{OpenRepository, RepositoryKey, RepositoryLocation};
pub use repository::{Repository, RepositoryHandle};
