use std::fs;
use std::path::Path;

use crate::layout::{HEAD, OBJECTS, REFS};

/// Lay out the minimum a directory needs to pass as a git directory.
pub(crate) fn make_git_dir(dir: &Path) {
    fs::create_dir_all(dir.join(OBJECTS)).unwrap();
    fs::create_dir_all(dir.join(REFS)).unwrap();
    fs::write(dir.join(HEAD), "ref: refs/heads/master\n").unwrap();
}
