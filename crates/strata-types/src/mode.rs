use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Mode of an entry inside a tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileMode {
    /// A subdirectory (`040000`).
    Tree,
    /// A symbolic link (`120000`).
    Symlink,
    /// A non-executable file (`100644`).
    RegularFile,
    /// An executable file (`100755`).
    ExecutableFile,
    /// A nested repository (`160000`).
    Gitlink,
}

impl FileMode {
    /// The numeric mode as stored in tree entries.
    pub fn bits(&self) -> u32 {
        match self {
            Self::Tree => 0o040000,
            Self::Symlink => 0o120000,
            Self::RegularFile => 0o100644,
            Self::ExecutableFile => 0o100755,
            Self::Gitlink => 0o160000,
        }
    }

    /// Map a numeric mode back to a `FileMode`.
    ///
    /// `0o100664` is accepted as a regular file, matching what older git
    /// versions wrote.
    pub fn from_bits(bits: u32) -> Result<Self, TypeError> {
        match bits {
            0o040000 => Ok(Self::Tree),
            0o120000 => Ok(Self::Symlink),
            0o100644 | 0o100664 => Ok(Self::RegularFile),
            0o100755 => Ok(Self::ExecutableFile),
            0o160000 => Ok(Self::Gitlink),
            other => Err(TypeError::InvalidMode(other)),
        }
    }

    /// Returns `true` for modes whose content is a blob.
    pub fn is_file(&self) -> bool {
        matches!(self, Self::RegularFile | Self::ExecutableFile | Self::Symlink)
    }
}

impl fmt::Display for FileMode {
    /// Formats the mode the way tree entries spell it (no leading zero).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:o}", self.bits())
    }
}
