use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use strata_config::Config;
use strata_fs::SystemReader;
use tracing::debug;

use crate::checker::ObjectChecker;
use crate::error::Result;
use crate::error_type::ErrorType;
use crate::ref_filter::RefFilter;
use crate::skip_list::{LazyObjectIdSetFile, ObjectIdSet};

const FSCK: &str = "fsck";
const SKIP_LIST: &str = "skipList";
const ALLOW_LEADING_ZERO_FILE_MODE: &str = "allowLeadingZeroFileMode";
const ALLOW_INVALID_PERSON_IDENT: &str = "allowInvalidPersonIdent";
const SAFE_FOR_WINDOWS: &str = "safeForWindows";
const SAFE_FOR_MACOS: &str = "safeForMacOS";

/// `fsck.*` keys that configure the checker rather than name an error type.
const RESERVED_FSCK_KEYS: &[&str] = &[
    SKIP_LIST,
    ALLOW_LEADING_ZERO_FILE_MODE,
    ALLOW_INVALID_PERSON_IDENT,
    SAFE_FOR_WINDOWS,
    SAFE_FOR_MACOS,
];

/// How an `fsck.<errortype>` setting treats that error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FsckMode {
    Error,
    Warn,
    Ignore,
}

impl FromStr for FsckMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "ignore" => Ok(Self::Ignore),
            _ => Err(format!("invalid fsck mode: {s}")),
        }
    }
}

/// Wire protocol selected by `protocol.version`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolVersion {
    V0,
    V2,
}

impl ProtocolVersion {
    /// Parse a `protocol.version` value. Unknown values select nothing.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "0" => Some(Self::V0),
            "2" => Some(Self::V2),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V0 => "0",
            Self::V2 => "2",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Object validation and advertisement policy for fetch and receive.
///
/// Built once from a repository's configuration and never changed
/// afterwards. The checker factories return `None` when validation is
/// turned off for that direction.
#[derive(Clone, Debug, Serialize)]
pub struct TransferConfig {
    fetch_fsck: bool,
    receive_fsck: bool,
    fsck_skip_list: Option<PathBuf>,
    allow_invalid_person_ident: bool,
    safe_for_windows: bool,
    safe_for_macos: bool,
    ignore: BTreeSet<ErrorType>,
    allow_ref_in_want: bool,
    allow_tip_sha1_in_want: bool,
    allow_reachable_sha1_in_want: bool,
    allow_filter: bool,
    protocol_version: Option<ProtocolVersion>,
    hide_refs: Vec<String>,
    #[serde(skip)]
    skip_list: Option<Arc<LazyObjectIdSetFile>>,
}

impl TransferConfig {
    pub fn new(config: &Config, system: &dyn SystemReader) -> Result<Self> {
        let fsck = config.get_bool("transfer", None, "fsckobjects", false)?;
        let fetch_fsck = config.get_bool("fetch", None, "fsckobjects", fsck)?;
        let receive_fsck = config.get_bool("receive", None, "fsckobjects", fsck)?;

        let fsck_skip_list = config
            .get_string(FSCK, None, SKIP_LIST)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        let allow_invalid_person_ident =
            config.get_bool(FSCK, None, ALLOW_INVALID_PERSON_IDENT, false)?;
        let safe_for_windows = config.get_bool(FSCK, None, SAFE_FOR_WINDOWS, system.is_windows())?;
        let safe_for_macos = config.get_bool(FSCK, None, SAFE_FOR_MACOS, system.is_macos())?;

        let mut ignore = BTreeSet::new();
        let mut zero_mode_explicit = false;
        for key in config.names(FSCK, None) {
            if RESERVED_FSCK_KEYS.iter().any(|r| r.eq_ignore_ascii_case(&key)) {
                continue;
            }
            let Some(error_type) = ErrorType::from_config_key(&key) else {
                debug!(%key, "unknown fsck key");
                continue;
            };
            if error_type == ErrorType::ZeroPaddedFilemode {
                zero_mode_explicit = true;
            }
            match config.get_enum(FSCK, None, &key, FsckMode::Error)? {
                FsckMode::Error => {
                    ignore.remove(&error_type);
                }
                FsckMode::Warn | FsckMode::Ignore => {
                    ignore.insert(error_type);
                }
            }
        }
        if !zero_mode_explicit && config.get_bool(FSCK, None, ALLOW_LEADING_ZERO_FILE_MODE, false)? {
            ignore.insert(ErrorType::ZeroPaddedFilemode);
        }

        let protocol_version = config
            .get_string("protocol", None, "version")
            .and_then(|v| ProtocolVersion::parse(&v));

        let skip_list = fsck_skip_list
            .as_ref()
            .map(|p| Arc::new(LazyObjectIdSetFile::new(p.clone())));

        Ok(Self {
            fetch_fsck,
            receive_fsck,
            fsck_skip_list,
            allow_invalid_person_ident,
            safe_for_windows,
            safe_for_macos,
            ignore,
            allow_ref_in_want: config.get_bool("uploadpack", None, "allowrefinwant", false)?,
            allow_tip_sha1_in_want: config.get_bool("uploadpack", None, "allowtipsha1inwant", false)?,
            allow_reachable_sha1_in_want: config.get_bool(
                "uploadpack",
                None,
                "allowreachablesha1inwant",
                false,
            )?,
            allow_filter: config.get_bool("uploadpack", None, "allowfilter", false)?,
            protocol_version,
            hide_refs: config.get_string_list("uploadpack", None, "hiderefs"),
            skip_list,
        })
    }

    /// Checker for objects arriving by fetch, or `None` if disabled.
    pub fn new_object_checker(&self) -> Option<ObjectChecker> {
        self.checker_if(self.fetch_fsck)
    }

    /// Checker for objects arriving by push, or `None` if disabled.
    pub fn new_receive_object_checker(&self) -> Option<ObjectChecker> {
        self.checker_if(self.receive_fsck)
    }

    fn checker_if(&self, enabled: bool) -> Option<ObjectChecker> {
        if !enabled {
            return None;
        }
        let skip_list = self
            .skip_list
            .clone()
            .map(|s| s as Arc<dyn ObjectIdSet>);
        Some(
            ObjectChecker::new()
                .with_ignore(self.ignore.iter().copied())
                .with_allow_invalid_person_ident(self.allow_invalid_person_ident)
                .with_safe_for_windows(self.safe_for_windows)
                .with_safe_for_macos(self.safe_for_macos)
                .with_skip_list(skip_list),
        )
    }

    pub fn is_fetch_fsck(&self) -> bool {
        self.fetch_fsck
    }

    pub fn is_receive_fsck(&self) -> bool {
        self.receive_fsck
    }

    pub fn ignored(&self) -> &BTreeSet<ErrorType> {
        &self.ignore
    }

    pub fn skip_list_path(&self) -> Option<&PathBuf> {
        self.fsck_skip_list.as_ref()
    }

    pub fn is_allow_ref_in_want(&self) -> bool {
        self.allow_ref_in_want
    }

    pub fn is_allow_tip_sha1_in_want(&self) -> bool {
        self.allow_tip_sha1_in_want
    }

    pub fn is_allow_reachable_sha1_in_want(&self) -> bool {
        self.allow_reachable_sha1_in_want
    }

    pub fn is_allow_filter(&self) -> bool {
        self.allow_filter
    }

    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.protocol_version
    }

    /// Filter that hides the refs named by `uploadpack.hiderefs`.
    pub fn ref_filter(&self) -> RefFilter {
        RefFilter::new(self.hide_refs.clone())
    }

    pub fn has_default_ref_filter(&self) -> bool {
        self.hide_refs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;
    use strata_fs::MockSystemReader;
    use strata_types::{ObjectId, ObjectKind};
    use tempfile::TempDir;

    fn transfer(text: &str) -> TransferConfig {
        TransferConfig::new(&Config::parse(text).unwrap(), &MockSystemReader::new()).unwrap()
    }

    // -----------------------------------------------------------------------
    // 1. Checker factories follow the fsckobjects toggles
    // -----------------------------------------------------------------------
    #[test]
    fn checking_is_off_by_default() {
        let tc = transfer("");
        assert!(tc.new_object_checker().is_none());
        assert!(tc.new_receive_object_checker().is_none());
    }

    #[test]
    fn transfer_fsck_sets_both_directions() {
        let tc = transfer("[transfer]\n\tfsckobjects = true\n");
        assert!(tc.new_object_checker().is_some());
        assert!(tc.new_receive_object_checker().is_some());
    }

    #[test]
    fn direction_overrides_transfer() {
        let tc = transfer("[transfer]\n\tfsckobjects\n[receive]\n\tfsckobjects = false\n");
        assert!(tc.is_fetch_fsck());
        assert!(tc.new_receive_object_checker().is_none());

        let tc = transfer("[fetch]\n\tfsckObjects = yes\n");
        assert!(tc.new_object_checker().is_some());
        assert!(!tc.is_receive_fsck());
    }

    // -----------------------------------------------------------------------
    // 2. Error type modes
    // -----------------------------------------------------------------------
    #[test]
    fn error_type_keys_build_the_ignore_set() {
        let tc = transfer(
            "[fsck]\n\tmissingEmail = ignore\n\tbadDate = WARN\n\tbadTimezone = error\n\tnonsense = ignore\n",
        );
        let ignored: Vec<ErrorType> = tc.ignored().iter().copied().collect();
        assert_eq!(ignored, vec![ErrorType::BadDate, ErrorType::MissingEmail]);
    }

    #[test]
    fn later_error_setting_wins() {
        let tc = transfer("[fsck]\n\tnullSha1 = ignore\n[fsck]\n\tnullSha1 = error\n");
        assert!(tc.ignored().is_empty());
    }

    #[test]
    fn invalid_mode_is_an_error() {
        let cfg = Config::parse("[fsck]\n\tbadDate = sometimes\n").unwrap();
        assert!(TransferConfig::new(&cfg, &MockSystemReader::new()).is_err());
    }

    #[test]
    fn reserved_keys_are_not_error_types() {
        let tc = transfer("[fsck]\n\tskipList = /nowhere\n\tsafeForWindows = false\n");
        assert!(tc.ignored().is_empty());
    }

    #[test]
    fn leading_zero_file_mode() {
        let tc = transfer("[fsck]\n\tallowLeadingZeroFileMode = true\n");
        assert!(tc.ignored().contains(&ErrorType::ZeroPaddedFilemode));

        let tc = transfer("[fsck]\n\tallowLeadingZeroFileMode = true\n\tzeroPaddedFilemode = error\n");
        assert!(!tc.ignored().contains(&ErrorType::ZeroPaddedFilemode));
    }

    // -----------------------------------------------------------------------
    // 3. Platform defaults
    // -----------------------------------------------------------------------
    #[test]
    fn platform_safety_defaults_to_the_platform() {
        let cfg = Config::parse("[transfer]\n\tfsckobjects\n").unwrap();
        let windows = TransferConfig::new(&cfg, &MockSystemReader::new().windows()).unwrap();
        let checker = windows.new_object_checker().unwrap();
        assert!(checker.is_safe_for_windows());
        assert!(!checker.is_safe_for_macos());

        let mac = TransferConfig::new(&cfg, &MockSystemReader::new().macos()).unwrap();
        assert!(mac.new_object_checker().unwrap().is_safe_for_macos());

        let cfg = Config::parse("[transfer]\n\tfsckobjects\n[fsck]\n\tsafeForWindows = false\n").unwrap();
        let off = TransferConfig::new(&cfg, &MockSystemReader::new().windows()).unwrap();
        assert!(!off.new_object_checker().unwrap().is_safe_for_windows());
    }

    // -----------------------------------------------------------------------
    // 4. Skip list scenario
    // -----------------------------------------------------------------------
    #[test]
    fn skip_list_exempts_only_listed_objects() {
        let dir = TempDir::new().unwrap();
        let bad_a = b"tree 0000\nauthor nobody\n".to_vec();
        let bad_b = b"tree 1111\nauthor nobody\n".to_vec();
        let listed = ObjectId::hash_object(ObjectKind::Commit, &bad_a);
        let unlisted = ObjectId::hash_object(ObjectKind::Commit, &bad_b);

        let skip = dir.path().join("skip-list");
        fs::write(&skip, format!("# known bad\n{listed}\n")).unwrap();

        let tc = transfer(&format!(
            "[receive]\n\tfsckobjects = true\n[fsck]\n\tskipList = {}\n",
            skip.display()
        ));
        let checker = tc.new_receive_object_checker().unwrap();
        checker.check(Some(&listed), ObjectKind::Commit, &bad_a).unwrap();
        assert!(checker.check(Some(&unlisted), ObjectKind::Commit, &bad_b).is_err());
    }

    #[test]
    fn empty_skip_list_path_means_none() {
        let tc = transfer("[fsck]\n\tskipList =\n");
        assert!(tc.skip_list_path().is_none());
    }

    // -----------------------------------------------------------------------
    // 5. Upload-pack options
    // -----------------------------------------------------------------------
    #[test]
    fn uploadpack_flags_and_protocol() {
        let tc = transfer(
            "[uploadpack]\n\tallowRefInWant\n\tallowFilter = true\n[protocol]\n\tversion = 2\n",
        );
        assert!(tc.is_allow_ref_in_want());
        assert!(tc.is_allow_filter());
        assert!(!tc.is_allow_tip_sha1_in_want());
        assert!(!tc.is_allow_reachable_sha1_in_want());
        assert_eq!(tc.protocol_version(), Some(ProtocolVersion::V2));

        assert_eq!(transfer("[protocol]\n\tversion = 1\n").protocol_version(), None);
        assert_eq!(transfer("").protocol_version(), None);
    }

    #[test]
    fn hidden_refs_filter() {
        let tc = transfer("[uploadpack]\n\thideRefs = refs/hidden/\n\thideRefs = refs/heads/tmp\n");
        assert!(!tc.has_default_ref_filter());
        let refs: BTreeMap<String, ()> = ["refs/heads/main", "refs/heads/tmp", "refs/hidden/x"]
            .iter()
            .map(|n| (n.to_string(), ()))
            .collect();
        let visible: Vec<String> = tc.ref_filter().filter(refs).into_keys().collect();
        assert_eq!(visible, vec!["refs/heads/main".to_string()]);
        assert!(transfer("").has_default_ref_filter());
    }

    #[test]
    fn serializes_for_display() {
        let tc = transfer("[fsck]\n\tbadDate = ignore\n[protocol]\n\tversion = 0\n");
        let json = serde_json::to_value(&tc).unwrap();
        assert_eq!(json["ignore"][0], "BAD_DATE");
        assert_eq!(json["protocol_version"], "0");
    }
}
