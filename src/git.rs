// src/git.rs

use crate::model::{Commit, DiffEntry};
use chrono::{FixedOffset, TimeZone};
use git2::{
    Diff, DiffOptions, ErrorCode, ObjectType, Oid, Patch, Repository, Sort, Tree, TreeWalkMode,
    TreeWalkResult,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("git object not found: {0}")]
    MissingObject(String),

    #[error("git error: {0}")]
    Git(git2::Error),

    #[error("commit {hash} has an invalid timestamp")]
    InvalidTimestamp { hash: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RepositoryError {
    /// A missing object only affects the class being read; anything else is fatal
    pub fn is_local(&self) -> bool {
        matches!(self, RepositoryError::MissingObject(_))
    }
}

impl From<git2::Error> for RepositoryError {
    fn from(e: git2::Error) -> Self {
        if e.code() == ErrorCode::NotFound {
            RepositoryError::MissingObject(e.message().to_string())
        } else {
            RepositoryError::Git(e)
        }
    }
}

/// Read-only view of a repository history, restricted to source files
pub trait RepositoryAccess: Sync {
    /// Every commit reachable from any branch, deduplicated, ascending by date
    fn list_commits(&self) -> Result<Vec<Commit>, RepositoryError>;

    /// Source files in the tree of `commit`, sorted by path
    fn class_inventory(&self, commit: &Commit) -> Result<Vec<String>, RepositoryError>;

    fn file_contents(&self, commit: &Commit, path: &str) -> Result<Vec<u8>, RepositoryError>;

    /// Per-file line counts of the source files changed between two trees
    fn diff(&self, from: &Commit, to: &Commit)
        -> Result<BTreeMap<String, DiffEntry>, RepositoryError>;

    /// Line counts of one path between two trees; `None` means the empty tree
    fn diff_path(
        &self,
        from: Option<&Commit>,
        to: &Commit,
        path: &str,
    ) -> Result<DiffEntry, RepositoryError>;

    /// Commits reachable from `to` but not from `from` that changed `path`, ascending
    fn commits_between(
        &self,
        from: Option<&Commit>,
        to: &Commit,
        path: &str,
    ) -> Result<Vec<Commit>, RepositoryError>;

    /// Source files changed by `commit` against each of its parents
    fn modified_paths(&self, commit: &Commit) -> Result<Vec<String>, RepositoryError>;
}

/// libgit2-backed repository access.
///
/// `git2::Repository` is not `Sync`, so every operation opens its own handle
/// and the miner can fan classes out over rayon.
pub struct GitRepository {
    path: PathBuf,
    extension: String,
}

impl GitRepository {
    pub fn open(path: &Path, extension: impl Into<String>) -> Result<Self, RepositoryError> {
        let repo = Repository::open(path)?;
        debug!("Opened git repository at {:?}", repo.path());
        Ok(Self {
            path: path.to_path_buf(),
            extension: extension.into(),
        })
    }

    pub fn clone_remote(
        url: &str,
        branch: &str,
        dest: &Path,
        extension: impl Into<String>,
    ) -> Result<Self, RepositoryError> {
        info!("Cloning {} ({}) into {} (this might take a while)", url, branch, dest.display());
        git2::build::RepoBuilder::new().branch(branch).clone(url, dest)?;
        Self::open(dest, extension)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_repo(&self) -> Result<Repository, RepositoryError> {
        Ok(Repository::open(&self.path)?)
    }

    fn is_source(&self, path: &str) -> bool {
        path.ends_with(&self.extension)
    }

    fn line_counts(&self, diff: &Diff<'_>) -> Result<BTreeMap<String, DiffEntry>, RepositoryError> {
        let mut entries = BTreeMap::new();
        for idx in 0..diff.deltas().len() {
            let Some(delta) = diff.get_delta(idx) else {
                continue;
            };
            let Some(path) = delta
                .new_file()
                .path()
                .or_else(|| delta.old_file().path())
                .and_then(|p| p.to_str())
                .map(String::from)
            else {
                continue;
            };
            if !self.is_source(&path) {
                continue;
            }
            // Binary files produce no patch
            let counts = match Patch::from_diff(diff, idx)? {
                Some(patch) => {
                    let (_, added, deleted) = patch.line_stats()?;
                    DiffEntry::new(added, deleted)
                }
                None => DiffEntry::default(),
            };
            entries.insert(path, counts);
        }
        Ok(entries)
    }
}

impl RepositoryAccess for GitRepository {
    fn list_commits(&self) -> Result<Vec<Commit>, RepositoryError> {
        let repo = self.open_repo()?;
        let mut revwalk = repo.revwalk()?;
        // Local and remote-tracking branches; the walk visits each commit once
        revwalk.push_glob("refs/heads/*")?;
        revwalk.push_glob("refs/remotes/*")?;
        revwalk.set_sorting(Sort::TIME)?;

        let mut commits = Vec::new();
        for oid in revwalk {
            let commit = repo.find_commit(oid?)?;
            commits.push(to_commit(&commit)?);
        }
        sort_chronologically(&mut commits);
        debug!("Loaded {} commits from {}", commits.len(), self.path.display());
        Ok(commits)
    }

    fn class_inventory(&self, commit: &Commit) -> Result<Vec<String>, RepositoryError> {
        let repo = self.open_repo()?;
        let tree = find_tree(&repo, commit)?;

        let mut classes = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |dir, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    let path = format!("{}{}", dir, name);
                    if self.is_source(&path) {
                        classes.push(path);
                    }
                }
            }
            TreeWalkResult::Ok
        })?;
        classes.sort();
        Ok(classes)
    }

    fn file_contents(&self, commit: &Commit, path: &str) -> Result<Vec<u8>, RepositoryError> {
        let repo = self.open_repo()?;
        let tree = find_tree(&repo, commit)?;
        let entry = tree.get_path(Path::new(path))?;
        let blob = repo.find_blob(entry.id())?;
        Ok(blob.content().to_vec())
    }

    fn diff(
        &self,
        from: &Commit,
        to: &Commit,
    ) -> Result<BTreeMap<String, DiffEntry>, RepositoryError> {
        let repo = self.open_repo()?;
        let old_tree = find_tree(&repo, from)?;
        let new_tree = find_tree(&repo, to)?;

        let mut diff_opts = DiffOptions::new();
        diff_opts.ignore_filemode(true);

        let diff = repo.diff_tree_to_tree(Some(&old_tree), Some(&new_tree), Some(&mut diff_opts))?;
        self.line_counts(&diff)
    }

    fn diff_path(
        &self,
        from: Option<&Commit>,
        to: &Commit,
        path: &str,
    ) -> Result<DiffEntry, RepositoryError> {
        let repo = self.open_repo()?;
        let old_tree = from.map(|c| find_tree(&repo, c)).transpose()?;
        let new_tree = find_tree(&repo, to)?;

        let mut diff_opts = DiffOptions::new();
        diff_opts
            .pathspec(path)
            .disable_pathspec_match(true)
            .ignore_filemode(true);

        let diff = repo.diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), Some(&mut diff_opts))?;
        Ok(self.line_counts(&diff)?.remove(path).unwrap_or_default())
    }

    fn commits_between(
        &self,
        from: Option<&Commit>,
        to: &Commit,
        path: &str,
    ) -> Result<Vec<Commit>, RepositoryError> {
        let repo = self.open_repo()?;
        let mut revwalk = repo.revwalk()?;
        revwalk.push(Oid::from_str(&to.hash)?)?;
        if let Some(from) = from {
            revwalk.hide(Oid::from_str(&from.hash)?)?;
        }
        revwalk.set_sorting(Sort::TIME)?;

        let target = Path::new(path);
        let mut commits = Vec::new();
        for oid in revwalk {
            let commit = repo.find_commit(oid?)?;
            if touches_path(&commit, target)? {
                commits.push(to_commit(&commit)?);
            }
        }
        sort_chronologically(&mut commits);
        Ok(commits)
    }

    fn modified_paths(&self, commit: &Commit) -> Result<Vec<String>, RepositoryError> {
        let repo = self.open_repo()?;
        let git_commit = repo.find_commit(Oid::from_str(&commit.hash)?)?;
        let tree = git_commit.tree()?;

        let mut parent_trees = Vec::new();
        for parent in git_commit.parents() {
            parent_trees.push(parent.tree()?);
        }

        let mut paths = BTreeSet::new();
        if parent_trees.is_empty() {
            let diff = repo.diff_tree_to_tree(None, Some(&tree), None)?;
            paths.extend(self.line_counts(&diff)?.into_keys());
        }
        for parent_tree in &parent_trees {
            let diff = repo.diff_tree_to_tree(Some(parent_tree), Some(&tree), None)?;
            paths.extend(self.line_counts(&diff)?.into_keys());
        }
        Ok(paths.into_iter().collect())
    }
}

fn find_tree<'r>(repo: &'r Repository, commit: &Commit) -> Result<Tree<'r>, RepositoryError> {
    Ok(repo.find_tree(Oid::from_str(&commit.tree)?)?)
}

fn to_commit(commit: &git2::Commit<'_>) -> Result<Commit, RepositoryError> {
    let hash = commit.id().to_string();
    let time = commit.time();
    let date = FixedOffset::east_opt(time.offset_minutes() * 60)
        .and_then(|offset| offset.timestamp_opt(time.seconds(), 0).single())
        .ok_or_else(|| RepositoryError::InvalidTimestamp { hash: hash.clone() })?;
    let author = commit.author();

    Ok(Commit {
        hash,
        message: commit.summary().unwrap_or("").to_string(),
        author: author.name().unwrap_or("Unknown").to_string(),
        email: author.email().unwrap_or("").to_string(),
        date,
        tree: commit.tree_id().to_string(),
        parents: commit.parent_ids().map(|id| id.to_string()).collect(),
    })
}

/// Ascending by commit time; the hash breaks ties so the order is reproducible
pub fn sort_chronologically(commits: &mut [Commit]) {
    commits.sort_by(|a, b| {
        a.timestamp()
            .cmp(&b.timestamp())
            .then_with(|| a.hash.cmp(&b.hash))
    });
}

/// A commit changes a path unless its entry is identical in some parent
fn touches_path(commit: &git2::Commit<'_>, path: &Path) -> Result<bool, RepositoryError> {
    let current = entry_id(&commit.tree()?, path)?;
    if commit.parent_count() == 0 {
        return Ok(current.is_some());
    }
    for parent in commit.parents() {
        if entry_id(&parent.tree()?, path)? == current {
            return Ok(false);
        }
    }
    Ok(true)
}

fn entry_id(tree: &Tree<'_>, path: &Path) -> Result<Option<Oid>, RepositoryError> {
    match tree.get_path(path) {
        Ok(entry) => Ok(Some(entry.id())),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Signature, Time};
    use std::fs;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        dir: TempDir,
        repo: Repository,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let repo = Repository::init(dir.path()).unwrap();
            Self { dir, repo }
        }

        fn commit(&self, message: &str, author: &str, secs: i64, changes: &[(&str, Option<&str>)]) -> Oid {
            let mut index = self.repo.index().unwrap();
            for (path, content) in changes {
                let full = self.dir.path().join(path);
                match content {
                    Some(text) => {
                        fs::create_dir_all(full.parent().unwrap()).unwrap();
                        fs::write(&full, text).unwrap();
                        index.add_path(Path::new(path)).unwrap();
                    }
                    None => {
                        fs::remove_file(&full).unwrap();
                        index.remove_path(Path::new(path)).unwrap();
                    }
                }
            }
            index.write().unwrap();
            let tree = self.repo.find_tree(index.write_tree().unwrap()).unwrap();
            let sig = Signature::new(author, &format!("{author}@example.com"), &Time::new(secs, 0)).unwrap();
            let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
            let parents: Vec<&git2::Commit> = parent.iter().collect();
            self.repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
                .unwrap()
        }

        fn open(&self) -> GitRepository {
            GitRepository::open(self.dir.path(), ".java").unwrap()
        }
    }

    const DAY: i64 = 86_400;
    const BASE: i64 = 1_577_836_800; // 2020-01-01T00:00:00Z

    fn history() -> Fixture {
        let fixture = Fixture::new();
        fixture.commit(
            "Initial import",
            "alice",
            BASE,
            &[("src/A.java", Some("a\nb\n")), ("README.md", Some("readme\n"))],
        );
        fixture.commit(
            "Grow A and add B",
            "bob",
            BASE + DAY,
            &[("src/A.java", Some("a\nb\nc\n")), ("src/pkg/B.java", Some("x\n"))],
        );
        fixture.commit("Touch docs", "alice", BASE + 2 * DAY, &[("README.md", Some("docs\n"))]);
        fixture
    }

    #[test]
    fn test_list_commits_ascending() {
        let fixture = history();
        let commits = fixture.open().list_commits().unwrap();
        let messages: Vec<_> = commits.iter().map(|c| c.message.as_str()).collect();
        assert_eq!(messages, vec!["Initial import", "Grow A and add B", "Touch docs"]);
        assert_eq!(commits[1].author, "bob");
        assert_eq!(commits[1].parents, vec![commits[0].hash.clone()]);
        assert_eq!(commits[0].timestamp(), BASE);
    }

    #[test]
    fn test_class_inventory_only_source_files() {
        let fixture = history();
        let repo = fixture.open();
        let commits = repo.list_commits().unwrap();
        assert_eq!(repo.class_inventory(&commits[0]).unwrap(), vec!["src/A.java"]);
        assert_eq!(
            repo.class_inventory(&commits[2]).unwrap(),
            vec!["src/A.java", "src/pkg/B.java"]
        );
    }

    #[test]
    fn test_file_contents_and_missing_blob() {
        let fixture = history();
        let repo = fixture.open();
        let commits = repo.list_commits().unwrap();
        assert_eq!(repo.file_contents(&commits[1], "src/A.java").unwrap(), b"a\nb\nc\n");

        let err = repo.file_contents(&commits[0], "src/pkg/B.java").unwrap_err();
        assert!(err.is_local());
    }

    #[test]
    fn test_diff_counts_source_lines() {
        let fixture = history();
        let repo = fixture.open();
        let commits = repo.list_commits().unwrap();
        let diff = repo.diff(&commits[0], &commits[2]).unwrap();
        assert_eq!(diff.get("src/A.java"), Some(&DiffEntry::new(1, 0)));
        assert_eq!(diff.get("src/pkg/B.java"), Some(&DiffEntry::new(1, 0)));
        assert!(!diff.contains_key("README.md"));
    }

    #[test]
    fn test_diff_path_from_empty_tree() {
        let fixture = history();
        let repo = fixture.open();
        let commits = repo.list_commits().unwrap();
        assert_eq!(repo.diff_path(None, &commits[0], "src/A.java").unwrap(), DiffEntry::new(2, 0));
        assert_eq!(
            repo.diff_path(Some(&commits[1]), &commits[2], "src/A.java").unwrap(),
            DiffEntry::default()
        );
    }

    #[test]
    fn test_commits_between_filters_by_path() {
        let fixture = history();
        let repo = fixture.open();
        let commits = repo.list_commits().unwrap();

        let all = repo.commits_between(None, &commits[2], "src/A.java").unwrap();
        assert_eq!(all.len(), 2);

        let later = repo
            .commits_between(Some(&commits[0]), &commits[2], "src/A.java")
            .unwrap();
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].hash, commits[1].hash);

        let none = repo
            .commits_between(Some(&commits[1]), &commits[2], "src/A.java")
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_modified_paths_against_parent() {
        let fixture = history();
        let repo = fixture.open();
        let commits = repo.list_commits().unwrap();
        assert_eq!(
            repo.modified_paths(&commits[1]).unwrap(),
            vec!["src/A.java", "src/pkg/B.java"]
        );
        assert!(repo.modified_paths(&commits[2]).unwrap().is_empty());
        assert_eq!(repo.modified_paths(&commits[0]).unwrap(), vec!["src/A.java"]);
    }
}
