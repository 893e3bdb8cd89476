use std::collections::BTreeMap;

/// Removes hidden refs from an advertisement.
///
/// A ref is hidden when its name equals a pattern, or when the pattern ends
/// in `/` and the name starts with it. A filter without patterns passes
/// every ref through.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefFilter {
    hidden: Vec<String>,
}

impl RefFilter {
    pub fn new(hidden: Vec<String>) -> Self {
        Self { hidden }
    }

    /// Returns `true` if this filter passes everything through.
    pub fn is_default(&self) -> bool {
        self.hidden.is_empty()
    }

    pub fn patterns(&self) -> &[String] {
        &self.hidden
    }

    pub fn is_hidden(&self, name: &str) -> bool {
        self.hidden
            .iter()
            .any(|p| name == p || (p.ends_with('/') && name.starts_with(p.as_str())))
    }

    /// Keep only the refs that are not hidden.
    pub fn filter<V>(&self, refs: BTreeMap<String, V>) -> BTreeMap<String, V> {
        if self.is_default() {
            return refs;
        }
        refs.into_iter().filter(|(name, _)| !self.is_hidden(name)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(names: &[&str]) -> BTreeMap<String, u32> {
        names.iter().enumerate().map(|(i, n)| (n.to_string(), i as u32)).collect()
    }

    #[test]
    fn default_filter_keeps_everything() {
        let filter = RefFilter::default();
        assert!(filter.is_default());
        let input = refs(&["refs/heads/main", "refs/tags/v1"]);
        assert_eq!(filter.filter(input.clone()), input);
    }

    #[test]
    fn exact_and_prefix_patterns() {
        let filter = RefFilter::new(vec!["refs/heads/secret".into(), "refs/internal/".into()]);
        let out = filter.filter(refs(&[
            "refs/heads/main",
            "refs/heads/secret",
            "refs/heads/secret2",
            "refs/internal/a",
            "refs/internal/b/c",
            "refs/internalx",
        ]));
        let names: Vec<&str> = out.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["refs/heads/main", "refs/heads/secret2", "refs/internalx"]);
    }

    #[test]
    fn pattern_without_slash_is_not_a_prefix() {
        let filter = RefFilter::new(vec!["refs/heads".into()]);
        assert!(filter.is_hidden("refs/heads"));
        assert!(!filter.is_hidden("refs/heads/main"));
    }
}
