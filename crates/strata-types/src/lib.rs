//! Foundation types for strata.
//!
//! This crate provides the identifiers and small value types shared by the
//! storage crates. Every other strata crate depends on `strata-types`.
//!
//! # Key Types
//!
//! - [`ObjectId`] -- Content-addressed identifier (SHA-1, git compatible)
//! - [`ObjectKind`] -- The four git object kinds
//! - [`FileMode`] -- Tree entry modes used by the file classification contract

pub mod error;
pub mod kind;
pub mod mode;
pub mod object;

pub use error::TypeError;
pub use kind::ObjectKind;
pub use mode::FileMode;
pub use object::{ObjectId, OBJECT_ID_HEX_LENGTH, OBJECT_ID_LENGTH};
