use std::collections::HashMap;
use std::fmt;

/// Access to the process environment and platform facts.
///
/// Library code never reads `std::env` directly; it asks a `SystemReader`,
/// which tests replace with [`MockSystemReader`].
pub trait SystemReader: Send + Sync + fmt::Debug {
    /// Value of an environment variable, if set and valid unicode.
    fn getenv(&self, key: &str) -> Option<String>;

    fn is_windows(&self) -> bool {
        cfg!(windows)
    }

    fn is_macos(&self) -> bool {
        cfg!(target_os = "macos")
    }

    /// Separator used in path-list variables (`:` or `;`).
    fn path_separator(&self) -> char {
        if self.is_windows() {
            ';'
        } else {
            ':'
        }
    }
}

/// [`SystemReader`] over the real process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvSystemReader;

impl SystemReader for EnvSystemReader {
    fn getenv(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// In-memory [`SystemReader`] for tests.
#[derive(Clone, Debug, Default)]
pub struct MockSystemReader {
    env: HashMap<String, String>,
    windows: bool,
    macos: bool,
}

impl MockSystemReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn windows(mut self) -> Self {
        self.windows = true;
        self
    }

    pub fn macos(mut self) -> Self {
        self.macos = true;
        self
    }
}

impl SystemReader for MockSystemReader {
    fn getenv(&self, key: &str) -> Option<String> {
        self.env.get(key).cloned()
    }

    fn is_windows(&self) -> bool {
        self.windows
    }

    fn is_macos(&self) -> bool {
        self.macos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_reads_only_what_was_set() {
        let sys = MockSystemReader::new().with_env("GIT_DIR", "/repo/.git");
        assert_eq!(sys.getenv("GIT_DIR").as_deref(), Some("/repo/.git"));
        assert_eq!(sys.getenv("GIT_WORK_TREE"), None);
    }

    #[test]
    fn separator_follows_platform_flag() {
        assert_eq!(MockSystemReader::new().path_separator(), ':');
        assert_eq!(MockSystemReader::new().windows().path_separator(), ';');
    }
}
