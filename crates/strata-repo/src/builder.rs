use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use strata_config::Config;
use strata_fs::file_utils;
use strata_fs::{EnvSystemReader, FileSystem, NativeFileSystem, SystemReader};
use tracing::debug;

use crate::error::{RepoError, RepoResult};
use crate::layout::{self, CONFIG, DOT_GIT, INDEX, OBJECTS};
use crate::repository::Repository;

pub const GIT_DIR_KEY: &str = "GIT_DIR";
pub const GIT_OBJECT_DIRECTORY_KEY: &str = "GIT_OBJECT_DIRECTORY";
pub const GIT_ALTERNATE_OBJECT_DIRECTORIES_KEY: &str = "GIT_ALTERNATE_OBJECT_DIRECTORIES";
pub const GIT_WORK_TREE_KEY: &str = "GIT_WORK_TREE";
pub const GIT_INDEX_FILE_KEY: &str = "GIT_INDEX_FILE";
pub const GIT_CEILING_DIRECTORIES_KEY: &str = "GIT_CEILING_DIRECTORIES";

/// The resolved on-disk layout of a repository.
///
/// Produced by [`RepositoryBuilder::setup`]. Every path is absolute and
/// normalized, and nothing changes after construction.
#[derive(Clone, Debug, Serialize)]
pub struct RepositoryConfig {
    git_dir: PathBuf,
    object_dir: PathBuf,
    alternates: Vec<PathBuf>,
    index_file: Option<PathBuf>,
    work_tree: Option<PathBuf>,
    bare: bool,
    ceilings: Vec<PathBuf>,
    #[serde(skip)]
    fs: Arc<dyn FileSystem>,
    #[serde(skip)]
    system: Arc<dyn SystemReader>,
}

impl RepositoryConfig {
    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn object_dir(&self) -> &Path {
        &self.object_dir
    }

    pub fn alternates(&self) -> &[PathBuf] {
        &self.alternates
    }

    /// `None` for bare repositories.
    pub fn index_file(&self) -> Option<&Path> {
        self.index_file.as_deref()
    }

    /// `None` for bare repositories.
    pub fn work_tree(&self) -> Option<&Path> {
        self.work_tree.as_deref()
    }

    pub fn is_bare(&self) -> bool {
        self.bare
    }

    pub fn ceilings(&self) -> &[PathBuf] {
        &self.ceilings
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn system(&self) -> &Arc<dyn SystemReader> {
        &self.system
    }
}

/// Collects repository settings from explicit calls, the environment and
/// directory search, then resolves them into a [`RepositoryConfig`].
///
/// Explicit setters win over environment variables, which win over search
/// results, which win over computed defaults.
#[derive(Debug)]
pub struct RepositoryBuilder {
    git_dir: Option<PathBuf>,
    object_dir: Option<PathBuf>,
    alternates: Vec<PathBuf>,
    index_file: Option<PathBuf>,
    work_tree: Option<PathBuf>,
    ceilings: Vec<PathBuf>,
    bare: bool,
    must_exist: bool,
    fs: Arc<dyn FileSystem>,
    system: Arc<dyn SystemReader>,
    /// Config of `git_dir`, read on first use.
    config: Option<Config>,
}

impl Default for RepositoryBuilder {
    fn default() -> Self {
        Self {
            git_dir: None,
            object_dir: None,
            alternates: Vec::new(),
            index_file: None,
            work_tree: None,
            ceilings: Vec::new(),
            bare: false,
            must_exist: false,
            fs: Arc::new(NativeFileSystem),
            system: Arc::new(EnvSystemReader),
            config: None,
        }
    }
}

impl RepositoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the git directory. Drops any config already read for the old one.
    pub fn git_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.git_dir = Some(path.into());
        self.config = None;
        self
    }

    pub fn object_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.object_dir = Some(path.into());
        self
    }

    pub fn alternate_object_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.alternates.push(path.into());
        self
    }

    pub fn index_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_file = Some(path.into());
        self
    }

    pub fn work_tree(mut self, path: impl Into<PathBuf>) -> Self {
        self.work_tree = Some(path.into());
        self
    }

    /// Stop [`find_git_dir`](Self::find_git_dir) before entering `path`.
    pub fn ceiling_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.ceilings.push(resolve(&path.into()));
        self
    }

    /// Force a bare repository: no work tree and no index.
    pub fn bare(mut self) -> Self {
        self.bare = true;
        self
    }

    /// Fail [`setup`](Self::setup) with `NotFound` unless the git directory
    /// already holds a repository.
    pub fn must_exist(mut self, must_exist: bool) -> Self {
        self.must_exist = must_exist;
        self
    }

    pub fn fs(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn system(mut self, system: Arc<dyn SystemReader>) -> Self {
        self.system = system;
        self
    }

    pub fn get_git_dir(&self) -> Option<&Path> {
        self.git_dir.as_deref()
    }

    pub fn get_work_tree(&self) -> Option<&Path> {
        self.work_tree.as_deref()
    }

    pub fn get_object_dir(&self) -> Option<&Path> {
        self.object_dir.as_deref()
    }

    pub fn get_index_file(&self) -> Option<&Path> {
        self.index_file.as_deref()
    }

    pub fn get_alternates(&self) -> &[PathBuf] {
        &self.alternates
    }

    pub fn get_ceilings(&self) -> &[PathBuf] {
        &self.ceilings
    }

    pub fn is_bare(&self) -> bool {
        self.bare
    }

    /// Fill unset properties from `GIT_*` environment variables.
    pub fn read_environment(mut self) -> Self {
        let env = |key: &str| self.system.getenv(key).filter(|v| !v.is_empty());
        let sep = self.system.path_separator();

        let git_dir = self.git_dir.is_none().then(|| env(GIT_DIR_KEY)).flatten();
        let object_dir = self.object_dir.is_none().then(|| env(GIT_OBJECT_DIRECTORY_KEY)).flatten();
        let alternates = self
            .alternates
            .is_empty()
            .then(|| env(GIT_ALTERNATE_OBJECT_DIRECTORIES_KEY))
            .flatten();
        let work_tree = self.work_tree.is_none().then(|| env(GIT_WORK_TREE_KEY)).flatten();
        let index_file = self.index_file.is_none().then(|| env(GIT_INDEX_FILE_KEY)).flatten();
        let ceilings = self
            .ceilings
            .is_empty()
            .then(|| env(GIT_CEILING_DIRECTORIES_KEY))
            .flatten();

        if let Some(dir) = git_dir {
            self = self.git_dir(dir);
        }
        if let Some(dir) = object_dir {
            self.object_dir = Some(dir.into());
        }
        if let Some(list) = alternates {
            self.alternates.extend(split_paths(&list, sep));
        }
        if let Some(dir) = work_tree {
            self.work_tree = Some(dir.into());
        }
        if let Some(file) = index_file {
            self.index_file = Some(file.into());
        }
        if let Some(list) = ceilings {
            self.ceilings.extend(split_paths(&list, sep).iter().map(|p| resolve(p)));
        }
        self
    }

    /// Search upward from `start` for a git directory and adopt the first
    /// one found. Leaves the builder unchanged when nothing is found or the
    /// git directory is already set.
    ///
    /// At each level this tries `<dir>/.git` as a repository, then
    /// `<dir>/.git` as a `gitdir:` pointer file, then `<dir>` itself.
    pub fn find_git_dir(mut self, start: impl AsRef<Path>) -> Self {
        if self.git_dir.is_some() {
            return self;
        }
        let mut current = Some(resolve(start.as_ref()));
        while let Some(dir) = current {
            let dot_git = dir.join(DOT_GIT);
            if layout::is_git_repository(&*self.fs, &dot_git) {
                debug!(git_dir = %dot_git.display(), "found repository");
                return self.git_dir(dot_git);
            }
            if self.fs.is_file(&dot_git) {
                match layout::read_gitdir_pointer(&*self.fs, &dot_git) {
                    Ok(target) => {
                        debug!(pointer = %dot_git.display(), git_dir = %target.display(), "following gitdir pointer");
                        return self.git_dir(target);
                    }
                    Err(e) => debug!(pointer = %dot_git.display(), error = %e, "skipping bad gitdir pointer"),
                }
            }
            if layout::is_git_repository(&*self.fs, &dir) {
                debug!(git_dir = %dir.display(), "found bare repository");
                return self.git_dir(dir);
            }

            current = dir.parent().map(Path::to_path_buf);
            if let Some(parent) = &current {
                if self.ceilings.contains(parent) {
                    debug!(ceiling = %parent.display(), "stopping at ceiling");
                    break;
                }
            }
        }
        self
    }

    /// The config of the current git directory, read once and cached until
    /// the git directory changes. Empty when no git directory is set.
    pub fn config(&mut self) -> RepoResult<&Config> {
        let cfg = match self.config.take() {
            Some(cfg) => cfg,
            None => match &self.git_dir {
                Some(dir) => Config::from_file(&dir.join(CONFIG))?,
                None => Config::new(),
            },
        };
        Ok(self.config.insert(cfg))
    }

    /// Resolve every property and produce the final layout.
    pub fn setup(mut self) -> RepoResult<RepositoryConfig> {
        if self.git_dir.is_none() && self.work_tree.is_none() {
            return Err(RepoError::Config(
                "either a git directory or a work tree must be set".into(),
            ));
        }
        if self.bare && self.work_tree.is_some() {
            return Err(RepoError::Config(
                "a bare repository cannot have a work tree".into(),
            ));
        }

        let git_dir = self.setup_git_dir()?;
        self.setup_work_tree(&git_dir)?;

        if self.must_exist && !layout::is_git_repository(&*self.fs, &git_dir) {
            return Err(RepoError::NotFound { path: git_dir });
        }

        let object_dir = match self.object_dir.take() {
            Some(dir) => resolve(&dir),
            None => git_dir.join(OBJECTS),
        };
        Ok(RepositoryConfig {
            object_dir,
            alternates: self.alternates.iter().map(|p| resolve(p)).collect(),
            index_file: self.index_file.as_deref().map(resolve),
            work_tree: self.work_tree.as_deref().map(resolve),
            bare: self.bare,
            ceilings: self.ceilings,
            fs: self.fs,
            system: self.system,
            git_dir,
        })
    }

    /// Resolve the layout and open the repository.
    pub fn build(self) -> RepoResult<Repository> {
        Ok(Repository::new(self.setup()?))
    }

    fn setup_git_dir(&mut self) -> RepoResult<PathBuf> {
        if let Some(dir) = &self.git_dir {
            let dir = resolve(dir);
            self.git_dir = Some(dir.clone());
            return Ok(dir);
        }
        let work_tree = match &self.work_tree {
            Some(wt) => resolve(wt),
            None => return Err(RepoError::Config("no work tree to derive a git directory from".into())),
        };
        let dot_git = work_tree.join(DOT_GIT);
        let dir = if self.fs.is_file(&dot_git) {
            layout::read_gitdir_pointer(&*self.fs, &dot_git)?
        } else {
            dot_git
        };
        self.git_dir = Some(dir.clone());
        self.config = None;
        Ok(dir)
    }

    fn setup_work_tree(&mut self, git_dir: &Path) -> RepoResult<()> {
        if !self.bare && self.work_tree.is_none() {
            self.work_tree = self.guess_work_tree(git_dir)?;
        }
        if !self.bare && self.index_file.is_none() {
            self.index_file = Some(git_dir.join(INDEX));
        }
        Ok(())
    }

    /// `core.worktree`, then `core.bare`, then the `.git` naming convention.
    /// Anything else is taken to be bare.
    fn guess_work_tree(&mut self, git_dir: &Path) -> RepoResult<Option<PathBuf>> {
        let fs = Arc::clone(&self.fs);
        let (worktree, bare) = {
            let cfg = self.config()?;
            let worktree = cfg.get_string("core", None, "worktree").filter(|w| !w.is_empty());
            let bare = match cfg.get_string("core", None, "bare") {
                Some(_) => Some(cfg.get_bool("core", None, "bare", false)?),
                None => None,
            };
            (worktree, bare)
        };

        if let Some(worktree) = worktree {
            return Ok(Some(resolve(&fs.resolve(git_dir, &worktree))));
        }
        match bare {
            Some(true) => {
                self.bare = true;
                Ok(None)
            }
            Some(false) => Ok(git_dir.parent().map(Path::to_path_buf)),
            None if git_dir.file_name().is_some_and(|n| n == DOT_GIT) => {
                Ok(git_dir.parent().map(Path::to_path_buf))
            }
            None => {
                self.bare = true;
                Ok(None)
            }
        }
    }
}

/// Absolute, lexically normalized form of `path`.
fn resolve(path: &Path) -> PathBuf {
    file_utils::normalize(&file_utils::absolute(path))
}

fn split_paths(list: &str, sep: char) -> Vec<PathBuf> {
    list.split(sep).filter(|p| !p.is_empty()).map(PathBuf::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use strata_fs::MockSystemReader;
    use tempfile::TempDir;

    use crate::testing::make_git_dir;

    fn mock(env: &[(&str, &str)]) -> Arc<dyn SystemReader> {
        let mut sys = MockSystemReader::new();
        for (k, v) in env {
            sys = sys.with_env(*k, *v);
        }
        Arc::new(sys)
    }

    // -----------------------------------------------------------------------
    // 1. Environment
    // -----------------------------------------------------------------------
    #[test]
    fn environment_fills_unset_properties() {
        let sys = mock(&[
            (GIT_DIR_KEY, "/env/git"),
            (GIT_OBJECT_DIRECTORY_KEY, "/env/objects"),
            (GIT_ALTERNATE_OBJECT_DIRECTORIES_KEY, "/alt/one:/alt/two"),
            (GIT_WORK_TREE_KEY, "/env/wt"),
            (GIT_INDEX_FILE_KEY, "/env/index"),
            (GIT_CEILING_DIRECTORIES_KEY, "/c1::/c2"),
        ]);
        let b = RepositoryBuilder::new().system(sys).read_environment();
        assert_eq!(b.get_git_dir(), Some(Path::new("/env/git")));
        assert_eq!(b.get_object_dir(), Some(Path::new("/env/objects")));
        assert_eq!(b.get_alternates(), &[PathBuf::from("/alt/one"), PathBuf::from("/alt/two")]);
        assert_eq!(b.get_work_tree(), Some(Path::new("/env/wt")));
        assert_eq!(b.get_index_file(), Some(Path::new("/env/index")));
        assert_eq!(b.get_ceilings(), &[PathBuf::from("/c1"), PathBuf::from("/c2")]);
    }

    #[test]
    fn explicit_settings_beat_environment() {
        let sys = mock(&[(GIT_DIR_KEY, "/env/git"), (GIT_CEILING_DIRECTORIES_KEY, "/env/ceiling")]);
        let b = RepositoryBuilder::new()
            .system(sys)
            .git_dir("/explicit")
            .ceiling_dir("/mine")
            .read_environment();
        assert_eq!(b.get_git_dir(), Some(Path::new("/explicit")));
        assert_eq!(b.get_ceilings(), &[PathBuf::from("/mine")]);
    }

    #[test]
    fn windows_lists_split_on_semicolon() {
        let sys: Arc<dyn SystemReader> = Arc::new(
            MockSystemReader::new()
                .windows()
                .with_env(GIT_ALTERNATE_OBJECT_DIRECTORIES_KEY, "/a;/b"),
        );
        let b = RepositoryBuilder::new().system(sys).read_environment();
        assert_eq!(b.get_alternates().len(), 2);
    }

    // -----------------------------------------------------------------------
    // 2. Upward search
    // -----------------------------------------------------------------------
    #[test]
    fn search_walks_up_to_the_repository() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        make_git_dir(&a.join(".git"));
        let c = a.join("b").join("c");
        fs::create_dir_all(&c).unwrap();

        let b = RepositoryBuilder::new().find_git_dir(&c);
        assert_eq!(b.get_git_dir(), Some(a.join(".git").as_path()));
    }

    #[test]
    fn search_stops_at_ceiling() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        make_git_dir(&a.join(".git"));
        let c = a.join("b").join("c");
        fs::create_dir_all(&c).unwrap();

        let b = RepositoryBuilder::new().ceiling_dir(a.join("b")).find_git_dir(&c);
        assert!(b.get_git_dir().is_none());
    }

    #[test]
    fn search_finds_bare_directory_itself() {
        let tmp = TempDir::new().unwrap();
        let bare = tmp.path().join("repo.git");
        make_git_dir(&bare);
        let b = RepositoryBuilder::new().find_git_dir(bare.join(OBJECTS));
        assert_eq!(b.get_git_dir(), Some(bare.as_path()));
    }

    #[test]
    fn search_follows_gitdir_pointer() {
        let tmp = TempDir::new().unwrap();
        let real = tmp.path().join("real.git");
        make_git_dir(&real);
        let wt = tmp.path().join("wt");
        fs::create_dir_all(wt.join("src")).unwrap();
        fs::write(wt.join(".git"), "gitdir: ../real.git\n").unwrap();

        let b = RepositoryBuilder::new().find_git_dir(wt.join("src"));
        assert_eq!(b.get_git_dir(), Some(real.as_path()));
    }

    #[test]
    fn bad_pointer_is_skipped() {
        let tmp = TempDir::new().unwrap();
        make_git_dir(&tmp.path().join(".git"));
        let inner = tmp.path().join("inner");
        fs::create_dir_all(&inner).unwrap();
        fs::write(inner.join(".git"), "gitdir: \n").unwrap();

        let b = RepositoryBuilder::new().find_git_dir(&inner);
        assert_eq!(b.get_git_dir(), Some(tmp.path().join(".git").as_path()));
    }

    // -----------------------------------------------------------------------
    // 3. Setup
    // -----------------------------------------------------------------------
    #[test]
    fn setup_requires_git_dir_or_work_tree() {
        let err = RepositoryBuilder::new().setup().unwrap_err();
        assert!(matches!(err, RepoError::Config(_)));
    }

    #[test]
    fn bare_with_work_tree_is_contradictory() {
        let err = RepositoryBuilder::new().bare().work_tree("/wt").setup().unwrap_err();
        assert!(matches!(err, RepoError::Config(_)));
    }

    #[test]
    fn work_tree_pointer_resolves_to_sibling() {
        let tmp = TempDir::new().unwrap();
        let real = tmp.path().join("real.git");
        make_git_dir(&real);
        let wt = tmp.path().join("wt");
        fs::create_dir_all(&wt).unwrap();
        fs::write(wt.join(".git"), "gitdir: ../real.git\n").unwrap();

        let cfg = RepositoryBuilder::new().work_tree(&wt).must_exist(true).setup().unwrap();
        assert_eq!(cfg.git_dir(), real.as_path());
        assert_eq!(cfg.work_tree(), Some(wt.as_path()));
        assert_eq!(cfg.object_dir(), real.join("objects").as_path());
        assert_eq!(cfg.index_file(), Some(real.join("index").as_path()));
    }

    #[test]
    fn dot_git_implies_parent_work_tree() {
        let tmp = TempDir::new().unwrap();
        let git = tmp.path().join(".git");
        make_git_dir(&git);
        let cfg = RepositoryBuilder::new().git_dir(&git).setup().unwrap();
        assert!(!cfg.is_bare());
        assert_eq!(cfg.work_tree(), Some(tmp.path()));
    }

    #[test]
    fn other_names_are_bare() {
        let tmp = TempDir::new().unwrap();
        let git = tmp.path().join("repo.git");
        make_git_dir(&git);
        let cfg = RepositoryBuilder::new().git_dir(&git).setup().unwrap();
        assert!(cfg.is_bare());
        assert!(cfg.work_tree().is_none());
        assert!(cfg.index_file().is_none());
    }

    #[test]
    fn core_bare_and_worktree_settings() {
        let tmp = TempDir::new().unwrap();
        let git = tmp.path().join(".git");
        make_git_dir(&git);

        fs::write(git.join(CONFIG), "[core]\n\tbare = true\n").unwrap();
        let cfg = RepositoryBuilder::new().git_dir(&git).setup().unwrap();
        assert!(cfg.is_bare());

        let other = tmp.path().join("repo.git");
        make_git_dir(&other);
        fs::write(other.join(CONFIG), "[core]\n\tbare = false\n").unwrap();
        let cfg = RepositoryBuilder::new().git_dir(&other).setup().unwrap();
        assert_eq!(cfg.work_tree(), Some(tmp.path()));

        fs::write(other.join(CONFIG), "[core]\n\tworktree = ../checkout\n").unwrap();
        let cfg = RepositoryBuilder::new().git_dir(&other).setup().unwrap();
        assert_eq!(cfg.work_tree(), Some(tmp.path().join("checkout").as_path()));
    }

    #[test]
    fn must_exist_reports_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = RepositoryBuilder::new()
            .git_dir(tmp.path().join("missing.git"))
            .must_exist(true)
            .setup()
            .unwrap_err();
        assert!(matches!(err, RepoError::NotFound { .. }));
    }

    #[test]
    fn explicit_paths_are_kept() {
        let tmp = TempDir::new().unwrap();
        let git = tmp.path().join(".git");
        let cfg = RepositoryBuilder::new()
            .git_dir(&git)
            .object_dir(tmp.path().join("objs"))
            .index_file(tmp.path().join("idx"))
            .alternate_object_dir(tmp.path().join("alt"))
            .setup()
            .unwrap();
        assert_eq!(cfg.object_dir(), tmp.path().join("objs").as_path());
        assert_eq!(cfg.index_file(), Some(tmp.path().join("idx").as_path()));
        assert_eq!(cfg.alternates(), &[tmp.path().join("alt")]);
    }

    #[test]
    fn config_cache_follows_git_dir() {
        let tmp = TempDir::new().unwrap();
        let one = tmp.path().join("one");
        let two = tmp.path().join("two");
        fs::create_dir_all(&one).unwrap();
        fs::create_dir_all(&two).unwrap();
        fs::write(one.join(CONFIG), "[user]\n\tname = one\n").unwrap();
        fs::write(two.join(CONFIG), "[user]\n\tname = two\n").unwrap();

        let mut b = RepositoryBuilder::new().git_dir(&one);
        assert_eq!(b.config().unwrap().get_string("user", None, "name").as_deref(), Some("one"));

        // cached: a change on disk is not seen
        fs::write(one.join(CONFIG), "[user]\n\tname = changed\n").unwrap();
        assert_eq!(b.config().unwrap().get_string("user", None, "name").as_deref(), Some("one"));

        let mut b = b.git_dir(&two);
        assert_eq!(b.config().unwrap().get_string("user", None, "name").as_deref(), Some("two"));
    }
}
