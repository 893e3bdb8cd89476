//! Loose object storage for strata.
//!
//! This crate implements git's `objects/` directory: every object is stored
//! zlib-compressed under its SHA-1, at `objects/xx/<38 hex>`. New objects
//! are written to a temp file first and renamed into place, so a reader
//! never sees a partial object.
//!
//! # Key Types
//!
//! - [`ObjectDatabase`] -- `has` / `read` / `insert`, plus checked inserts
//! - [`LooseObjectDirectory`] -- the on-disk implementation with alternates
//! - [`RawObject`] -- kind plus uncompressed content
//! - [`InsertResult`] -- what an insert did
//!
//! # Design Rules
//!
//! 1. Objects are immutable once written.
//! 2. Write-then-rename: an object file is complete before it has its name.
//! 3. Objects rejected by an [`strata_fsck::ObjectChecker`] are never written.
//! 4. Lookups try the local directory first, then each alternate in order.

pub mod error;
pub mod loose;
pub mod object;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use loose::{LooseObjectDirectory, ALTERNATES_FILE};
pub use object::{InsertResult, RawObject};
pub use traits::ObjectDatabase;
