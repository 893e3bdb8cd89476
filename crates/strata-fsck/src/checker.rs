use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use strata_types::{FileMode, ObjectId, ObjectKind, OBJECT_ID_HEX_LENGTH, OBJECT_ID_LENGTH};
use tracing::{debug, warn};

use crate::error::{FsckError, Result};
use crate::error_type::ErrorType;
use crate::skip_list::ObjectIdSet;

/// Characters HFS+ drops when comparing names.
const MACOS_IGNORABLE: &[(char, char)] = &[
    ('\u{200C}', '\u{200F}'),
    ('\u{202A}', '\u{202E}'),
    ('\u{206A}', '\u{206F}'),
    ('\u{FEFF}', '\u{FEFF}'),
];

const WINDOWS_DEVICES: &[&str] = &["con", "prn", "aux", "nul"];

/// Verifies that raw object content is well formed.
///
/// A checker is configured once and then shared by every insert that wants
/// validation. Failures are reported as [`FsckError::Corrupt`] unless the
/// error type is in the ignore set or the object id is in the skip list.
#[derive(Clone, Default)]
pub struct ObjectChecker {
    ignore: BTreeSet<ErrorType>,
    skip_list: Option<Arc<dyn ObjectIdSet>>,
    allow_invalid_person_ident: bool,
    safe_for_windows: bool,
    safe_for_macos: bool,
}

impl ObjectChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the set of error types that are reported as success.
    pub fn with_ignore(mut self, ignore: impl IntoIterator<Item = ErrorType>) -> Self {
        self.ignore = ignore.into_iter().collect();
        self
    }

    /// Accept (or stop accepting) tree modes written with a leading zero.
    pub fn with_allow_leading_zero_file_mode(mut self, allow: bool) -> Self {
        if allow {
            self.ignore.insert(ErrorType::ZeroPaddedFilemode);
        } else {
            self.ignore.remove(&ErrorType::ZeroPaddedFilemode);
        }
        self
    }

    pub fn with_skip_list(mut self, skip_list: Option<Arc<dyn ObjectIdSet>>) -> Self {
        self.skip_list = skip_list;
        self
    }

    pub fn with_allow_invalid_person_ident(mut self, allow: bool) -> Self {
        self.allow_invalid_person_ident = allow;
        self
    }

    pub fn with_safe_for_windows(mut self, on: bool) -> Self {
        self.safe_for_windows = on;
        self
    }

    pub fn with_safe_for_macos(mut self, on: bool) -> Self {
        self.safe_for_macos = on;
        self
    }

    pub fn ignored(&self) -> &BTreeSet<ErrorType> {
        &self.ignore
    }

    pub fn is_safe_for_windows(&self) -> bool {
        self.safe_for_windows
    }

    pub fn is_safe_for_macos(&self) -> bool {
        self.safe_for_macos
    }

    pub fn allows_invalid_person_ident(&self) -> bool {
        self.allow_invalid_person_ident
    }

    /// Check an object of a known kind.
    pub fn check(&self, id: Option<&ObjectId>, kind: ObjectKind, data: &[u8]) -> Result<()> {
        match kind {
            ObjectKind::Commit => self.check_commit(id, data),
            ObjectKind::Tag => self.check_tag(id, data),
            ObjectKind::Tree => self.check_tree(id, data),
            ObjectKind::Blob => self.check_blob(id, data),
        }
    }

    /// Check an object whose type name came from an untrusted header.
    pub fn check_raw(&self, id: Option<&ObjectId>, type_name: &str, data: &[u8]) -> Result<()> {
        let kind: ObjectKind = type_name
            .parse()
            .map_err(|_| FsckError::UnknownType(type_name.to_string()))?;
        self.check(id, kind, data)
    }

    pub fn check_commit(&self, id: Option<&ObjectId>, raw: &[u8]) -> Result<()> {
        let at = Report::new(self, id, ObjectKind::Commit);
        let mut cur = Cursor::new(raw);

        if !cur.eat(b"tree ") {
            at.fail(ErrorType::MissingTree, "no tree header")?;
        } else if !is_hex_id(cur.line()) {
            at.fail(ErrorType::BadTreeSha1, "invalid tree")?;
        }

        while cur.eat(b"parent ") {
            if !is_hex_id(cur.line()) {
                at.fail(ErrorType::BadParentSha1, "invalid parent")?;
            }
        }

        if !cur.eat(b"author ") {
            at.fail(ErrorType::MissingAuthor, "no author")?;
        } else {
            self.check_person_ident(&at, cur.line())?;
        }

        if !cur.eat(b"committer ") {
            at.fail(ErrorType::MissingCommitter, "no committer")?;
        } else {
            self.check_person_ident(&at, cur.line())?;
        }
        Ok(())
    }

    pub fn check_tag(&self, id: Option<&ObjectId>, raw: &[u8]) -> Result<()> {
        let at = Report::new(self, id, ObjectKind::Tag);
        let mut cur = Cursor::new(raw);

        if !cur.eat(b"object ") {
            at.fail(ErrorType::MissingObject, "no object header")?;
        } else if !is_hex_id(cur.line()) {
            at.fail(ErrorType::BadObjectSha1, "invalid object")?;
        }

        if !cur.eat(b"type ") {
            at.fail(ErrorType::MissingTypeEntry, "no type header")?;
        } else {
            let name = cur.line();
            let known = std::str::from_utf8(name)
                .ok()
                .and_then(|s| s.parse::<ObjectKind>().ok())
                .is_some();
            if !known {
                at.fail(
                    ErrorType::UnknownType,
                    format!("invalid type {:?}", String::from_utf8_lossy(name)),
                )?;
            }
        }

        if !cur.eat(b"tag ") {
            at.fail(ErrorType::MissingTagEntry, "no tag header")?;
        } else {
            cur.line();
        }

        if cur.eat(b"tagger ") {
            self.check_person_ident(&at, cur.line())?;
        }
        Ok(())
    }

    pub fn check_tree(&self, id: Option<&ObjectId>, raw: &[u8]) -> Result<()> {
        let at = Report::new(self, id, ObjectKind::Tree);
        let mut seen: HashSet<Vec<u8>> = HashSet::new();
        let mut prev: Option<(&[u8], bool)> = None;
        let mut pos = 0;

        while pos < raw.len() {
            let Some(sp) = find(&raw[pos..], b' ') else {
                return Err(at.truncated("truncated in mode"));
            };
            let mode_text = &raw[pos..pos + sp];
            let bits = match parse_octal(mode_text) {
                Some(bits) => bits,
                None => {
                    return Err(at.unparseable(ErrorType::BadFilemode, "invalid mode character"));
                }
            };
            if mode_text[0] == b'0' {
                at.fail(ErrorType::ZeroPaddedFilemode, "mode starts with '0'")?;
            }
            if FileMode::from_bits(bits).is_err() {
                at.fail(ErrorType::BadFilemode, format!("invalid mode {bits:o}"))?;
            }
            let is_tree = bits & 0o170000 == FileMode::Tree.bits();
            pos += sp + 1;

            let Some(nul) = find(&raw[pos..], 0) else {
                return Err(at.truncated("truncated in name"));
            };
            let name = &raw[pos..pos + nul];
            self.check_path_segment(&at, name)?;
            pos += nul + 1;

            if raw.len() - pos < OBJECT_ID_LENGTH {
                return Err(at.truncated("truncated in object id"));
            }
            if raw[pos..pos + OBJECT_ID_LENGTH].iter().all(|&b| b == 0) {
                at.fail(ErrorType::NullSha1, "entry points to null SHA-1")?;
            }
            pos += OBJECT_ID_LENGTH;

            if !seen.insert(self.normalize(name)) {
                at.fail(
                    ErrorType::DuplicateEntries,
                    format!("duplicate entry names {:?}", String::from_utf8_lossy(name)),
                )?;
            }
            if let Some((prev_name, prev_tree)) = prev {
                if path_compare(prev_name, prev_tree, name, is_tree) == Ordering::Greater {
                    at.fail(ErrorType::TreeNotSorted, "incorrectly sorted")?;
                }
            }
            prev = Some((name, is_tree));
        }
        Ok(())
    }

    /// Blobs carry arbitrary bytes.
    pub fn check_blob(&self, _id: Option<&ObjectId>, _raw: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Check a single path component of a tree entry.
    fn check_path_segment(&self, at: &Report<'_>, name: &[u8]) -> Result<()> {
        if name.is_empty() {
            return at.fail(ErrorType::EmptyName, "zero length name");
        }
        if name.contains(&b'/') {
            at.fail(ErrorType::FullPathname, "name contains '/'")?;
        }
        match name {
            b"." => at.fail(ErrorType::HasDot, "invalid name '.'")?,
            b".." => at.fail(ErrorType::HasDotdot, "invalid name '..'")?,
            _ if name.eq_ignore_ascii_case(b".git") => {
                at.fail(ErrorType::HasDotgit, "invalid name '.git'")?
            }
            _ => {}
        }
        if self.safe_for_windows {
            check_windows_name(at, name)?;
        }
        if self.safe_for_macos {
            check_macos_name(at, name)?;
        }
        Ok(())
    }

    /// Names compared for duplicates fold case on case-insensitive targets.
    fn normalize(&self, name: &[u8]) -> Vec<u8> {
        if self.safe_for_windows || self.safe_for_macos {
            name.to_ascii_lowercase()
        } else {
            name.to_vec()
        }
    }

    fn check_person_ident(&self, at: &Report<'_>, line: &[u8]) -> Result<()> {
        if self.allow_invalid_person_ident {
            return Ok(());
        }
        let Some(lt) = find(line, b'<') else {
            return at.fail(ErrorType::MissingEmail, "missing email");
        };
        let Some(gt) = find(&line[lt + 1..], b'>') else {
            return at.fail(ErrorType::BadEmail, "bad email");
        };
        let Some(rest) = line[lt + 1 + gt + 1..].strip_prefix(b" ") else {
            return at.fail(ErrorType::MissingSpaceBeforeDate, "missing space before date");
        };
        let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
        if digits == 0 || rest.get(digits) != Some(&b' ') {
            return at.fail(ErrorType::BadDate, "bad date");
        }
        let tz = &rest[digits + 1..];
        let tz_ok = tz.len() == 5
            && (tz[0] == b'+' || tz[0] == b'-')
            && tz[1..].iter().all(|b| b.is_ascii_digit());
        if !tz_ok {
            return at.fail(ErrorType::BadTimezone, "bad time zone");
        }
        Ok(())
    }
}

impl fmt::Debug for ObjectChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectChecker")
            .field("ignore", &self.ignore)
            .field("skip_list", &self.skip_list.is_some())
            .field("allow_invalid_person_ident", &self.allow_invalid_person_ident)
            .field("safe_for_windows", &self.safe_for_windows)
            .field("safe_for_macos", &self.safe_for_macos)
            .finish()
    }
}

/// Where a failure is reported, and whether it is suppressed.
struct Report<'a> {
    checker: &'a ObjectChecker,
    id: Option<&'a ObjectId>,
    kind: ObjectKind,
}

impl<'a> Report<'a> {
    fn new(checker: &'a ObjectChecker, id: Option<&'a ObjectId>, kind: ObjectKind) -> Self {
        Self { checker, id, kind }
    }

    fn fail(&self, error_type: ErrorType, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        if self.checker.ignore.contains(&error_type) {
            debug!(kind = %self.kind, %error_type, detail = %message, "ignored fsck error");
            return Ok(());
        }
        if let (Some(id), Some(skip)) = (self.id, &self.checker.skip_list) {
            if skip.contains(id) {
                debug!(%id, %error_type, "object is in skip list");
                return Ok(());
            }
        }
        warn!(kind = %self.kind, id = ?self.id, %error_type, detail = %message, "object failed fsck");
        Err(FsckError::Corrupt {
            id: self.id.copied(),
            kind: self.kind,
            error_type,
            message,
        })
    }

    /// A failure that leaves the rest of the object unreadable. Bypasses
    /// the ignore set and the skip list.
    fn unparseable(&self, error_type: ErrorType, message: &str) -> FsckError {
        warn!(kind = %self.kind, id = ?self.id, %error_type, detail = message, "object cannot be parsed");
        FsckError::Corrupt {
            id: self.id.copied(),
            kind: self.kind,
            error_type,
            message: message.to_string(),
        }
    }

    fn truncated(&self, message: &str) -> FsckError {
        FsckError::Truncated {
            id: self.id.copied(),
            kind: self.kind,
            message: message.to_string(),
        }
    }
}

/// Forward-only reader over header lines.
struct Cursor<'a> {
    raw: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(raw: &'a [u8]) -> Self {
        Self { raw, pos: 0 }
    }

    /// Consume `prefix` if the remaining input starts with it.
    fn eat(&mut self, prefix: &[u8]) -> bool {
        if self.raw[self.pos..].starts_with(prefix) {
            self.pos += prefix.len();
            true
        } else {
            false
        }
    }

    /// The rest of the current line, without its LF. Moves past the LF.
    fn line(&mut self) -> &'a [u8] {
        let rest = &self.raw[self.pos..];
        match find(rest, b'\n') {
            Some(n) => {
                self.pos += n + 1;
                &rest[..n]
            }
            None => {
                self.pos = self.raw.len();
                rest
            }
        }
    }
}

fn find(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}

fn is_hex_id(text: &[u8]) -> bool {
    text.len() == OBJECT_ID_HEX_LENGTH && text.iter().all(|b| b.is_ascii_hexdigit())
}

fn parse_octal(text: &[u8]) -> Option<u32> {
    if text.is_empty() || text.len() > 7 {
        return None;
    }
    text.iter().try_fold(0u32, |acc, &b| match b {
        b'0'..=b'7' => Some(acc * 8 + u32::from(b - b'0')),
        _ => None,
    })
}

/// Git tree order: a tree entry sorts as if its name ended in `/`.
fn path_compare(a: &[u8], a_tree: bool, b: &[u8], b_tree: bool) -> Ordering {
    let n = a.len().min(b.len());
    match a[..n].cmp(&b[..n]) {
        Ordering::Equal => {}
        other => return other,
    }
    let next = |name: &[u8], tree: bool| name.get(n).copied().or(tree.then_some(b'/'));
    next(a, a_tree).cmp(&next(b, b_tree))
}

fn check_windows_name(at: &Report<'_>, name: &[u8]) -> Result<()> {
    if let Some(&c) = name.iter().find(|&&c| c < 0x20 || b"<>:\"\\|?*".contains(&c)) {
        return at.fail(
            ErrorType::Win32BadName,
            format!("name contains byte 0x{c:02x}"),
        );
    }
    if let Some(&last) = name.last() {
        if last == b' ' || last == b'.' {
            return at.fail(
                ErrorType::Win32BadName,
                format!("invalid name ends with '{}'", char::from(last)),
            );
        }
    }
    if is_windows_device(name) {
        return at.fail(
            ErrorType::Win32BadName,
            format!("invalid name {:?}", String::from_utf8_lossy(name)),
        );
    }
    if name.eq_ignore_ascii_case(b"git~1") {
        return at.fail(ErrorType::HasDotgit, "invalid name 'GIT~1'");
    }
    Ok(())
}

fn is_windows_device(name: &[u8]) -> bool {
    let stem = match find(name, b'.') {
        Some(dot) => &name[..dot],
        None => name,
    };
    let stem = stem.to_ascii_lowercase();
    if WINDOWS_DEVICES.iter().any(|d| stem == d.as_bytes()) {
        return true;
    }
    stem.len() == 4
        && (stem.starts_with(b"com") || stem.starts_with(b"lpt"))
        && (b'1'..=b'9').contains(&stem[3])
}

fn check_macos_name(at: &Report<'_>, name: &[u8]) -> Result<()> {
    let Ok(text) = std::str::from_utf8(name) else {
        return at.fail(ErrorType::BadUtf8, "invalid name contains byte sequence that is not UTF-8");
    };
    let visible: String = text.chars().filter(|c| !is_macos_ignorable(*c)).collect();
    if visible.len() != text.len() && visible.eq_ignore_ascii_case(".git") {
        return at.fail(
            ErrorType::HasDotgit,
            format!("invalid name {text:?} contains ignorable Unicode characters"),
        );
    }
    Ok(())
}

fn is_macos_ignorable(c: char) -> bool {
    MACOS_IGNORABLE.iter().any(|&(lo, hi)| (lo..=hi).contains(&c))
}
