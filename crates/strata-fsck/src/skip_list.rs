use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use strata_types::ObjectId;
use tracing::{debug, warn};

/// A set of object ids the checker consults before reporting a failure.
pub trait ObjectIdSet: Send + Sync + fmt::Debug {
    fn contains(&self, id: &ObjectId) -> bool;
}

impl ObjectIdSet for HashSet<ObjectId> {
    fn contains(&self, id: &ObjectId) -> bool {
        HashSet::contains(self, id)
    }
}

/// Object ids read from a text file the first time they are needed.
///
/// The file holds one hex id per line. Blank lines and lines starting with
/// `#` are skipped. A missing file behaves as an empty set.
pub struct LazyObjectIdSetFile {
    path: PathBuf,
    ids: OnceLock<HashSet<ObjectId>>,
}

impl LazyObjectIdSetFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ids: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of ids in the file. Forces the load.
    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids().is_empty()
    }

    /// Whether the file has been read yet.
    pub fn is_loaded(&self) -> bool {
        self.ids.get().is_some()
    }

    fn ids(&self) -> &HashSet<ObjectId> {
        self.ids.get_or_init(|| load(&self.path))
    }
}

impl ObjectIdSet for LazyObjectIdSetFile {
    fn contains(&self, id: &ObjectId) -> bool {
        self.ids().contains(id)
    }
}

impl fmt::Debug for LazyObjectIdSetFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyObjectIdSetFile")
            .field("path", &self.path)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

fn load(path: &Path) -> HashSet<ObjectId> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "skip list file missing");
            return HashSet::new();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read skip list");
            return HashSet::new();
        }
    };
    parse(&text, path)
}

fn parse(text: &str, origin: &Path) -> HashSet<ObjectId> {
    let mut ids = HashSet::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match ObjectId::from_hex(line) {
            Ok(id) => {
                ids.insert(id);
            }
            Err(e) => {
                warn!(path = %origin.display(), line = n + 1, error = %e, "ignoring bad skip list entry");
            }
        }
    }
    debug!(path = %origin.display(), count = ids.len(), "skip list loaded");
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_types::ObjectKind;
    use tempfile::TempDir;

    #[test]
    fn loads_on_first_query() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("skip");
        let id = ObjectId::hash_object(ObjectKind::Blob, b"a");
        fs::write(&path, format!("# header\n\n{id}\n")).unwrap();

        let set = LazyObjectIdSetFile::new(&path);
        assert!(!set.is_loaded());
        assert!(set.contains(&id));
        assert!(set.is_loaded());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let set = LazyObjectIdSetFile::new(dir.path().join("absent"));
        assert!(set.is_empty());
        assert!(!set.contains(&ObjectId::null()));
    }

    #[test]
    fn bad_lines_are_skipped() {
        let a = ObjectId::hash_object(ObjectKind::Blob, b"a");
        let ids = parse(&format!("nothex\n  {a}  \n1234\n"), Path::new("mem"));
        assert_eq!(ids.len(), 1);
        assert!(ids.contains(&a));
    }

    #[test]
    fn contents_are_read_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("skip");
        let a = ObjectId::hash_object(ObjectKind::Blob, b"a");
        let b = ObjectId::hash_object(ObjectKind::Blob, b"b");
        fs::write(&path, format!("{a}\n")).unwrap();

        let set = LazyObjectIdSetFile::new(&path);
        assert!(set.contains(&a));
        fs::write(&path, format!("{a}\n{b}\n")).unwrap();
        assert!(!set.contains(&b));
    }
}
