use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

/// A rule the object checker can report as violated.
///
/// Each variant has an upper-case name (`ZERO_PADDED_FILEMODE`) used in
/// messages and a config key (`zeropaddedfilemode`) used by `fsck.<key>`
/// settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorType {
    NullSha1,
    DuplicateEntries,
    TreeNotSorted,
    ZeroPaddedFilemode,
    EmptyName,
    FullPathname,
    HasDot,
    HasDotdot,
    HasDotgit,
    BadObjectSha1,
    BadParentSha1,
    BadTreeSha1,
    MissingAuthor,
    MissingCommitter,
    MissingObject,
    MissingTree,
    MissingTypeEntry,
    MissingTagEntry,
    BadDate,
    BadEmail,
    BadTimezone,
    MissingEmail,
    MissingSpaceBeforeDate,
    UnknownType,
    Win32BadName,
    BadUtf8,
    BadFilemode,
}

impl ErrorType {
    pub const ALL: [ErrorType; 27] = [
        Self::NullSha1,
        Self::DuplicateEntries,
        Self::TreeNotSorted,
        Self::ZeroPaddedFilemode,
        Self::EmptyName,
        Self::FullPathname,
        Self::HasDot,
        Self::HasDotdot,
        Self::HasDotgit,
        Self::BadObjectSha1,
        Self::BadParentSha1,
        Self::BadTreeSha1,
        Self::MissingAuthor,
        Self::MissingCommitter,
        Self::MissingObject,
        Self::MissingTree,
        Self::MissingTypeEntry,
        Self::MissingTagEntry,
        Self::BadDate,
        Self::BadEmail,
        Self::BadTimezone,
        Self::MissingEmail,
        Self::MissingSpaceBeforeDate,
        Self::UnknownType,
        Self::Win32BadName,
        Self::BadUtf8,
        Self::BadFilemode,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::NullSha1 => "NULL_SHA1",
            Self::DuplicateEntries => "DUPLICATE_ENTRIES",
            Self::TreeNotSorted => "TREE_NOT_SORTED",
            Self::ZeroPaddedFilemode => "ZERO_PADDED_FILEMODE",
            Self::EmptyName => "EMPTY_NAME",
            Self::FullPathname => "FULL_PATHNAME",
            Self::HasDot => "HAS_DOT",
            Self::HasDotdot => "HAS_DOTDOT",
            Self::HasDotgit => "HAS_DOTGIT",
            Self::BadObjectSha1 => "BAD_OBJECT_SHA1",
            Self::BadParentSha1 => "BAD_PARENT_SHA1",
            Self::BadTreeSha1 => "BAD_TREE_SHA1",
            Self::MissingAuthor => "MISSING_AUTHOR",
            Self::MissingCommitter => "MISSING_COMMITTER",
            Self::MissingObject => "MISSING_OBJECT",
            Self::MissingTree => "MISSING_TREE",
            Self::MissingTypeEntry => "MISSING_TYPE_ENTRY",
            Self::MissingTagEntry => "MISSING_TAG_ENTRY",
            Self::BadDate => "BAD_DATE",
            Self::BadEmail => "BAD_EMAIL",
            Self::BadTimezone => "BAD_TIMEZONE",
            Self::MissingEmail => "MISSING_EMAIL",
            Self::MissingSpaceBeforeDate => "MISSING_SPACE_BEFORE_DATE",
            Self::UnknownType => "UNKNOWN_TYPE",
            Self::Win32BadName => "WIN32_BAD_NAME",
            Self::BadUtf8 => "BAD_UTF8",
            Self::BadFilemode => "BAD_FILEMODE",
        }
    }

    /// The `fsck.<key>` spelling: lower case with underscores removed.
    pub fn config_key(&self) -> String {
        self.name().replace('_', "").to_ascii_lowercase()
    }

    /// Look up an error type by config key, ignoring case.
    pub fn from_config_key(key: &str) -> Option<ErrorType> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.config_key().eq_ignore_ascii_case(key))
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ErrorType {
    type Err = String;

    /// Accepts either the upper-case name or the config key.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .or_else(|| Self::from_config_key(s))
            .ok_or_else(|| format!("unknown fsck error type: {s}"))
    }
}

impl Serialize for ErrorType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn config_key_drops_underscores() {
        assert_eq!(ErrorType::ZeroPaddedFilemode.config_key(), "zeropaddedfilemode");
        assert_eq!(ErrorType::NullSha1.config_key(), "nullsha1");
        assert_eq!(ErrorType::Win32BadName.config_key(), "win32badname");
    }

    #[test]
    fn config_keys_are_unique() {
        let keys: HashSet<String> = ErrorType::ALL.iter().map(|t| t.config_key()).collect();
        assert_eq!(keys.len(), ErrorType::ALL.len());
    }

    #[test]
    fn lookup_ignores_case() {
        assert_eq!(ErrorType::from_config_key("MissingEmail"), Some(ErrorType::MissingEmail));
        assert_eq!(ErrorType::from_config_key("skiplist"), None);
        assert_eq!("bad_date".parse::<ErrorType>().unwrap(), ErrorType::BadDate);
        assert_eq!("baddate".parse::<ErrorType>().unwrap(), ErrorType::BadDate);
        assert!("nonsense".parse::<ErrorType>().is_err());
    }
}
