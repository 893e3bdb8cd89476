//! Git-style configuration files.
//!
//! Parses the `config` file found in every repository's meta-directory:
//!
//! ```text
//! [core]
//!     bare = false
//! [fsck]
//!     skipList = .git/skip-list
//! [remote "origin"]
//!     url = https://example.com/repo.git
//! ```
//!
//! Section and key names are case-insensitive, subsection names are not.
//! When a key repeats, the last value wins for single-value lookups and
//! every value is returned by [`Config::get_string_list`].

pub mod config;
pub mod error;

pub use config::{parse_bool, Config};
pub use error::{ConfigError, Result};
