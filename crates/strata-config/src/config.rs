use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

use tracing::debug;

use crate::error::{ConfigError, Result};

/// One `name = value` line, tagged with the section it appeared in.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Entry {
    /// Lowercased section name.
    section: String,
    subsection: Option<String>,
    /// Key name as written.
    name: String,
    /// `None` for a bare key without `=`.
    value: Option<String>,
}

impl Entry {
    fn matches(&self, section: &str, subsection: Option<&str>, name: &str) -> bool {
        self.in_section(section, subsection) && self.name.eq_ignore_ascii_case(name)
    }

    fn in_section(&self, section: &str, subsection: Option<&str>) -> bool {
        self.section.eq_ignore_ascii_case(section) && self.subsection.as_deref() == subsection
    }
}

/// An in-memory git configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    entries: Vec<Entry>,
}

impl Config {
    /// An empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration text.
    pub fn parse(text: &str) -> Result<Self> {
        Parser::new(text, "<string>").parse()
    }

    /// Read and parse a config file. A missing file is an empty config.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using empty config");
                return Ok(Self::new());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Parser::new(&text, &path.display().to_string()).parse()
    }

    /// Last value of a key. A bare key (no `=`) reads as an empty string.
    pub fn get_string(&self, section: &str, subsection: Option<&str>, name: &str) -> Option<String> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.matches(section, subsection, name))
            .map(|e| e.value.clone().unwrap_or_default())
    }

    /// Every value of a key, in file order.
    pub fn get_string_list(&self, section: &str, subsection: Option<&str>, name: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.matches(section, subsection, name))
            .map(|e| e.value.clone().unwrap_or_default())
            .collect()
    }

    /// Boolean value of a key, or `default` when it is not set.
    pub fn get_bool(
        &self,
        section: &str,
        subsection: Option<&str>,
        name: &str,
        default: bool,
    ) -> Result<bool> {
        let Some(entry) = self
            .entries
            .iter()
            .rev()
            .find(|e| e.matches(section, subsection, name))
        else {
            return Ok(default);
        };
        parse_bool(entry.value.as_deref()).ok_or_else(|| ConfigError::InvalidValue {
            key: key_name(section, subsection, name),
            value: entry.value.clone().unwrap_or_default(),
        })
    }

    /// Parse a key's value through `FromStr`, or return `default` when the
    /// key is not set.
    pub fn get_enum<T: FromStr>(
        &self,
        section: &str,
        subsection: Option<&str>,
        name: &str,
        default: T,
    ) -> Result<T> {
        match self.get_string(section, subsection, name) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                key: key_name(section, subsection, name),
                value,
            }),
        }
    }

    /// Distinct key names of a section, as first written.
    pub fn names(&self, section: &str, subsection: Option<&str>) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for entry in self.entries.iter().filter(|e| e.in_section(section, subsection)) {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&entry.name)) {
                names.push(entry.name.clone());
            }
        }
        names
    }

    /// Distinct section names, lowercased.
    pub fn sections(&self) -> Vec<String> {
        let mut sections: Vec<String> = Vec::new();
        for entry in &self.entries {
            if !sections.contains(&entry.section) {
                sections.push(entry.section.clone());
            }
        }
        sections
    }

    /// Subsection names used with `section`.
    pub fn subsections(&self, section: &str) -> Vec<String> {
        let mut subs: Vec<String> = Vec::new();
        for entry in self.entries.iter().filter(|e| e.section.eq_ignore_ascii_case(section)) {
            if let Some(sub) = &entry.subsection {
                if !subs.contains(sub) {
                    subs.push(sub.clone());
                }
            }
        }
        subs
    }

    /// Replace every value of a key with a single `value`.
    pub fn set_string(&mut self, section: &str, subsection: Option<&str>, name: &str, value: &str) {
        self.entries.retain(|e| !e.matches(section, subsection, name));
        let entry = Entry {
            section: section.to_ascii_lowercase(),
            subsection: subsection.map(str::to_string),
            name: name.to_string(),
            value: Some(value.to_string()),
        };
        // New keys go to the end of their section so it stays contiguous.
        let at = self
            .entries
            .iter()
            .rposition(|e| e.in_section(section, subsection))
            .map_or(self.entries.len(), |i| i + 1);
        self.entries.insert(at, entry);
    }

    pub fn set_bool(&mut self, section: &str, subsection: Option<&str>, name: &str, value: bool) {
        self.set_string(section, subsection, name, if value { "true" } else { "false" });
    }

    /// Remove every value of a key.
    pub fn unset(&mut self, section: &str, subsection: Option<&str>, name: &str) {
        self.entries.retain(|e| !e.matches(section, subsection, name));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize back to config text, grouping keys by section.
    pub fn to_text(&self) -> String {
        let mut groups: Vec<(&str, Option<&str>)> = Vec::new();
        for entry in &self.entries {
            let key = (entry.section.as_str(), entry.subsection.as_deref());
            if !groups.contains(&key) {
                groups.push(key);
            }
        }

        let mut out = String::new();
        for (section, subsection) in groups {
            match subsection {
                Some(sub) => {
                    let escaped = sub.replace('\\', "\\\\").replace('"', "\\\"");
                    let _ = writeln!(out, "[{section} \"{escaped}\"]");
                }
                None => {
                    let _ = writeln!(out, "[{section}]");
                }
            }
            for entry in self.entries.iter().filter(|e| e.in_section(section, subsection)) {
                match &entry.value {
                    Some(value) => {
                        let _ = writeln!(out, "\t{} = {}", entry.name, escape_value(value));
                    }
                    None => {
                        let _ = writeln!(out, "\t{}", entry.name);
                    }
                }
            }
        }
        out
    }
}

/// Interpret a config boolean. `None` is a bare key and means `true`;
/// an empty value means `false`.
pub fn parse_bool(value: Option<&str>) -> Option<bool> {
    let Some(value) = value else {
        return Some(true);
    };
    let value = value.trim();
    if value.is_empty() {
        return Some(false);
    }
    for truthy in ["true", "yes", "on", "1"] {
        if value.eq_ignore_ascii_case(truthy) {
            return Some(true);
        }
    }
    for falsy in ["false", "no", "off", "0"] {
        if value.eq_ignore_ascii_case(falsy) {
            return Some(false);
        }
    }
    None
}

fn key_name(section: &str, subsection: Option<&str>, name: &str) -> String {
    match subsection {
        Some(sub) => format!("{section}.{sub}.{name}"),
        None => format!("{section}.{name}"),
    }
}

fn escape_value(value: &str) -> String {
    let needs_quotes = value.starts_with(' ')
        || value.ends_with(' ')
        || value.contains('#')
        || value.contains(';');
    let mut out = String::with_capacity(value.len() + 2);
    if needs_quotes {
        out.push('"');
    }
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    if needs_quotes {
        out.push('"');
    }
    out
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    origin: &'a str,
    section: Option<(String, Option<String>)>,
    entries: Vec<Entry>,
}

impl<'a> Parser<'a> {
    fn new(text: &str, origin: &'a str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            line: 1,
            origin,
            section: None,
            entries: Vec::new(),
        }
    }

    fn parse(mut self) -> Result<Config> {
        loop {
            self.skip_blanks();
            match self.peek() {
                None => break,
                Some('\n') => self.bump(),
                Some('#' | ';') => self.skip_line(),
                Some('[') => {
                    self.bump();
                    self.parse_section_header()?;
                }
                Some(c) if c.is_ascii_alphabetic() => self.parse_entry()?,
                Some(c) => return Err(self.error(format!("unexpected character {c:?}"))),
            }
        }
        Ok(Config {
            entries: self.entries,
        })
    }

    fn parse_section_header(&mut self) -> Result<()> {
        let mut name = String::new();
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_alphanumeric() || c == '-' || c == '.' => {
                    name.push(c);
                    self.bump();
                }
                Some(']') => {
                    self.bump();
                    break;
                }
                Some(' ' | '\t') => {
                    self.skip_blanks();
                    if self.peek() != Some('"') {
                        return Err(self.error("expected quoted subsection".into()));
                    }
                    self.bump();
                    let sub = self.parse_subsection()?;
                    if self.peek() != Some(']') {
                        return Err(self.error("expected ']' after subsection".into()));
                    }
                    self.bump();
                    return self.start_section(name, Some(sub));
                }
                _ => return Err(self.error("bad section header".into())),
            }
        }

        // Legacy `[section.sub]` form: the part after the first dot is a
        // case-insensitive subsection.
        match name.split_once('.') {
            Some((section, sub)) => {
                let sub = sub.to_ascii_lowercase();
                self.start_section(section.to_string(), Some(sub))
            }
            None => self.start_section(name, None),
        }
    }

    fn parse_subsection(&mut self) -> Result<String> {
        let mut sub = String::new();
        loop {
            match self.peek() {
                Some('"') => {
                    self.bump();
                    return Ok(sub);
                }
                Some('\\') => {
                    self.bump();
                    match self.peek() {
                        Some('\n') | None => {
                            return Err(self.error("unterminated subsection".into()))
                        }
                        Some(c) => {
                            sub.push(c);
                            self.bump();
                        }
                    }
                }
                Some('\n') | None => return Err(self.error("unterminated subsection".into())),
                Some(c) => {
                    sub.push(c);
                    self.bump();
                }
            }
        }
    }

    fn start_section(&mut self, name: String, sub: Option<String>) -> Result<()> {
        if name.is_empty() {
            return Err(self.error("empty section name".into()));
        }
        self.section = Some((name.to_ascii_lowercase(), sub));
        Ok(())
    }

    fn parse_entry(&mut self) -> Result<()> {
        let Some((section, subsection)) = self.section.clone() else {
            return Err(self.error("key outside of any section".into()));
        };

        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '-' {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        self.skip_blanks();

        let value = match self.peek() {
            None | Some('\n') => None,
            Some('#' | ';') => {
                self.skip_line();
                None
            }
            Some('=') => {
                self.bump();
                Some(self.parse_value()?)
            }
            Some(c) => return Err(self.error(format!("unexpected character {c:?} in key"))),
        };

        self.entries.push(Entry {
            section,
            subsection,
            name,
            value,
        });
        Ok(())
    }

    fn parse_value(&mut self) -> Result<String> {
        self.skip_blanks();
        let mut value = String::new();
        let mut pending_space = String::new();
        let mut quoted = false;

        loop {
            let Some(c) = self.peek() else {
                if quoted {
                    return Err(self.error("unterminated quote".into()));
                }
                break;
            };
            match c {
                '\n' => {
                    if quoted {
                        return Err(self.error("unterminated quote".into()));
                    }
                    break;
                }
                '#' | ';' if !quoted => {
                    self.skip_line();
                    break;
                }
                ' ' | '\t' if !quoted => {
                    pending_space.push(c);
                    self.bump();
                }
                '"' => {
                    value.push_str(&pending_space);
                    pending_space.clear();
                    quoted = !quoted;
                    self.bump();
                }
                '\\' => {
                    value.push_str(&pending_space);
                    pending_space.clear();
                    self.bump();
                    match self.peek() {
                        Some('\n') => {
                            self.bump();
                        }
                        Some('n') => {
                            value.push('\n');
                            self.bump();
                        }
                        Some('t') => {
                            value.push('\t');
                            self.bump();
                        }
                        Some('b') => {
                            value.push('\u{8}');
                            self.bump();
                        }
                        Some('\\') => {
                            value.push('\\');
                            self.bump();
                        }
                        Some('"') => {
                            value.push('"');
                            self.bump();
                        }
                        Some(other) => {
                            return Err(self.error(format!("bad escape \\{other}")));
                        }
                        None => return Err(self.error("dangling backslash".into())),
                    }
                }
                c => {
                    value.push_str(&pending_space);
                    pending_space.clear();
                    value.push(c);
                    self.bump();
                }
            }
        }
        Ok(value)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) {
        if self.peek() == Some('\n') {
            self.line += 1;
        }
        self.pos += 1;
    }

    fn skip_blanks(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t' | '\r')) {
            self.bump();
        }
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn error(&self, message: String) -> ConfigError {
        ConfigError::Parse {
            origin: self.origin.to_string(),
            line: self.line,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    const SAMPLE: &str = "\
# top comment
[core]
\trepositoryformatversion = 0
\tBare = false
\tworktree = ../work ; trailing comment
[fsck]
\tskipList = /tmp/skip
\tmissingEmail = ignore
\tZERO_PADDED_FILEMODE = warn
[uploadpack]
\thiderefs = refs/hidden/
\thiderefs = refs/secret
[remote \"Origin\"]
\turl = \"https://example.com/ repo.git\"
[branch.Main]
\tremote = origin
[transfer]
\tfsckobjects
";

    // ----- 1. lookups -----

    #[test]
    fn reads_simple_values() {
        let cfg = Config::parse(SAMPLE).unwrap();
        assert_eq!(cfg.get_string("core", None, "worktree").as_deref(), Some("../work"));
        assert_eq!(cfg.get_string("CORE", None, "bare").as_deref(), Some("false"));
        assert_eq!(cfg.get_string("core", None, "missing"), None);
    }

    #[test]
    fn subsections_are_case_sensitive() {
        let cfg = Config::parse(SAMPLE).unwrap();
        assert_eq!(
            cfg.get_string("remote", Some("Origin"), "url").as_deref(),
            Some("https://example.com/ repo.git")
        );
        assert_eq!(cfg.get_string("remote", Some("origin"), "url"), None);
    }

    #[test]
    fn legacy_dotted_section_lowercases_subsection() {
        let cfg = Config::parse(SAMPLE).unwrap();
        assert_eq!(
            cfg.get_string("branch", Some("main"), "remote").as_deref(),
            Some("origin")
        );
    }

    #[test]
    fn string_lists_keep_order() {
        let cfg = Config::parse(SAMPLE).unwrap();
        assert_eq!(
            cfg.get_string_list("uploadpack", None, "hiderefs"),
            vec!["refs/hidden/".to_string(), "refs/secret".to_string()]
        );
    }

    #[test]
    fn names_are_listed_once_as_written() {
        let cfg = Config::parse(SAMPLE).unwrap();
        assert_eq!(
            cfg.names("fsck", None),
            vec!["skipList", "missingEmail", "ZERO_PADDED_FILEMODE"]
        );
        assert_eq!(cfg.names("uploadpack", None), vec!["hiderefs"]);
    }

    // ----- 2. booleans -----

    #[test]
    fn bare_key_is_true() {
        let cfg = Config::parse(SAMPLE).unwrap();
        assert!(cfg.get_bool("transfer", None, "fsckobjects", false).unwrap());
        assert!(!cfg.get_bool("core", None, "bare", true).unwrap());
        assert!(cfg.get_bool("core", None, "unset", true).unwrap());
    }

    #[test]
    fn invalid_bool_names_the_key() {
        let cfg = Config::parse("[core]\n\tbare = maybe\n").unwrap();
        let err = cfg.get_bool("core", None, "bare", false).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, value } => {
                assert_eq!(key, "core.bare");
                assert_eq!(value, "maybe");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn empty_value_is_false() {
        let cfg = Config::parse("[core]\n\tbare =\n").unwrap();
        assert!(!cfg.get_bool("core", None, "bare", true).unwrap());
    }

    // ----- 3. value syntax -----

    #[test]
    fn escapes_and_continuations() {
        let text = "[a]\n\tx = one\\\n two\n\ty = \"tab\\there\"\n\tz = \"# not a comment\"\n";
        let cfg = Config::parse(text).unwrap();
        assert_eq!(cfg.get_string("a", None, "x").as_deref(), Some("one two"));
        assert_eq!(cfg.get_string("a", None, "y").as_deref(), Some("tab\there"));
        assert_eq!(cfg.get_string("a", None, "z").as_deref(), Some("# not a comment"));
    }

    #[test]
    fn key_outside_section_is_an_error() {
        let err = Config::parse("bare = true\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { line: 1, .. }));
    }

    #[test]
    fn unterminated_quote_reports_line() {
        let err = Config::parse("[core]\n\tbare = false\n\tx = \"open\n").unwrap_err();
        match err {
            ConfigError::Parse { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn bad_section_header_is_an_error() {
        assert!(Config::parse("[core\n").is_err());
        assert!(Config::parse("[remote origin]\n").is_err());
    }

    // ----- 4. files and writing -----

    #[test]
    fn missing_file_is_empty_config() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::from_file(&dir.path().join("config")).unwrap();
        assert!(cfg.is_empty());
    }

    #[test]
    fn malformed_file_names_the_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        fs::write(&path, "[core\n").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(err.to_string().contains(&path.display().to_string()));
    }

    #[test]
    fn set_and_serialize() {
        let mut cfg = Config::new();
        cfg.set_string("core", None, "repositoryformatversion", "0");
        cfg.set_bool("core", None, "bare", false);
        cfg.set_string("remote", Some("origin"), "url", "/srv/repo.git");
        cfg.set_bool("core", None, "bare", true);

        let text = cfg.to_text();
        assert_eq!(
            text,
            "[core]\n\trepositoryformatversion = 0\n\tbare = true\n[remote \"origin\"]\n\turl = /srv/repo.git\n"
        );
        assert_eq!(Config::parse(&text).unwrap(), cfg);
    }

    #[test]
    fn get_enum_uses_from_str() {
        let cfg = Config::parse("[pack]\n\tthreads = 4\n\tbad = x\n").unwrap();
        assert_eq!(cfg.get_enum("pack", None, "threads", 1u32).unwrap(), 4);
        assert_eq!(cfg.get_enum("pack", None, "unset", 1u32).unwrap(), 1);
        assert!(cfg.get_enum("pack", None, "bad", 1u32).is_err());
    }

    proptest! {
        #[test]
        fn prop_bool_words_parse_in_any_case(word in "(?i)(true|yes|on|false|no|off)") {
            let expected = ["true", "yes", "on"].iter().any(|w| w.eq_ignore_ascii_case(&word));
            prop_assert_eq!(parse_bool(Some(&word)), Some(expected));
        }

        #[test]
        fn prop_set_values_survive_serialization(value in "[ -~]{0,20}") {
            let mut cfg = Config::new();
            cfg.set_string("s", None, "k", &value);
            let parsed = Config::parse(&cfg.to_text()).unwrap();
            prop_assert_eq!(parsed.get_string("s", None, "k"), Some(value.clone()));
        }
    }
}
