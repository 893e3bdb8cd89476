use std::fmt;

use strata_config::ConfigError;
use strata_types::{ObjectId, ObjectKind};

use crate::error_type::ErrorType;

/// Errors produced by object validation.
#[derive(Debug, thiserror::Error)]
pub enum FsckError {
    /// The object violates a structural or policy rule.
    #[error("{kind} {}: {message} ({error_type})", DisplayId(id))]
    Corrupt {
        id: Option<ObjectId>,
        kind: ObjectKind,
        error_type: ErrorType,
        message: String,
    },

    /// The object ends before a required field. Never suppressed.
    #[error("{kind} {}: {message}", DisplayId(id))]
    Truncated {
        id: Option<ObjectId>,
        kind: ObjectKind,
        message: String,
    },

    /// The object header names a type that does not exist.
    #[error("unknown object type {0:?}")]
    UnknownType(String),

    /// The fsck configuration itself is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl FsckError {
    /// The violated rule, if this is a validation failure.
    pub fn error_type(&self) -> Option<ErrorType> {
        match self {
            Self::Corrupt { error_type, .. } => Some(*error_type),
            Self::UnknownType(_) => Some(ErrorType::UnknownType),
            Self::Truncated { .. } | Self::Config(_) => None,
        }
    }
}

struct DisplayId<'a>(&'a Option<ObjectId>);

impl fmt::Display for DisplayId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(id) => write!(f, "{id}"),
            None => f.write_str("<unknown>"),
        }
    }
}

/// Convenience alias used throughout the fsck crate.
pub type Result<T> = std::result::Result<T, FsckError>;
