//! Object validation policy for strata.
//!
//! Objects entering the store can be checked for structural validity
//! before they are trusted. The policy is read once from repository
//! configuration into a [`TransferConfig`], which hands out an
//! [`ObjectChecker`] per transfer direction (or none, when checking is
//! turned off).
//!
//! # Modules
//!
//! - [`checker`] -- Commit, tag, tree and blob validation
//! - [`error_type`] -- The categories a failure is reported under
//! - [`skip_list`] -- Object ids exempt from checking
//! - [`ref_filter`] -- Hidden ref filtering for advertisements
//! - [`transfer`] -- Configuration-driven policy
//!
//! # Quick Start
//!
//! ```rust
//! use strata_config::Config;
//! use strata_fs::MockSystemReader;
//! use strata_fsck::TransferConfig;
//! use strata_types::ObjectKind;
//!
//! let config = Config::parse("[transfer]\n\tfsckObjects = true\n").unwrap();
//! let policy = TransferConfig::new(&config, &MockSystemReader::new()).unwrap();
//! let checker = policy.new_receive_object_checker().unwrap();
//! assert!(checker.check(None, ObjectKind::Commit, b"not a commit").is_err());
//! ```

pub mod checker;
pub mod error;
pub mod error_type;
pub mod ref_filter;
pub mod skip_list;
pub mod transfer;

pub use checker::ObjectChecker;
pub use error::{FsckError, Result};
pub use error_type::ErrorType;
pub use ref_filter::RefFilter;
pub use skip_list::{LazyObjectIdSetFile, ObjectIdSet};
pub use transfer::{FsckMode, ProtocolVersion, TransferConfig};
