// tests/common/mod.rs

#![allow(dead_code)]

use chrono::NaiveDate;
use git2::{Oid, Repository, Signature, Time};
use git_defects::config::Config;
use git_defects::model::{DefectReport, Release};
use git_defects::tracker::{IssueTracker, TrackerError};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const DAY: i64 = 86_400;
pub const BASE: i64 = 1_577_836_800; // 2020-01-01T00:00:00Z

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// A git repository built commit by commit
pub struct GitFixture {
    pub path: PathBuf,
    repo: Repository,
}

impl GitFixture {
    pub fn init(path: &Path) -> Self {
        fs::create_dir_all(path).unwrap();
        let repo = Repository::init(path).unwrap();
        Self {
            path: path.to_path_buf(),
            repo,
        }
    }

    /// Commit `changes` at `BASE + day * DAY`; `None` deletes the file
    pub fn commit(&self, message: &str, author: &str, day: i64, changes: &[(&str, Option<&str>)]) -> Oid {
        let mut index = self.repo.index().unwrap();
        for (path, content) in changes {
            let full = self.path.join(path);
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
        let time = Time::new(BASE + day * DAY, 0);
        let sig = Signature::new(author, &format!("{author}@example.com"), &time).unwrap();
        let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        self.repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
    }
}

/// Issue tracker serving fixed data per project key
#[derive(Default)]
pub struct StaticTracker {
    projects: HashMap<String, (Vec<Release>, Vec<DefectReport>)>,
}

impl StaticTracker {
    pub fn with_project(mut self, key: &str, releases: Vec<Release>, reports: Vec<DefectReport>) -> Self {
        self.projects.insert(key.to_string(), (releases, reports));
        self
    }

    fn project(&self, key: &str) -> Result<&(Vec<Release>, Vec<DefectReport>), TrackerError> {
        self.projects.get(key).ok_or_else(|| TrackerError::Status {
            url: format!("memory://{key}"),
            status: 404,
        })
    }
}

impl IssueTracker for StaticTracker {
    fn list_releases(&self, project: &str) -> Result<Vec<Release>, TrackerError> {
        Ok(self.project(project)?.0.clone())
    }

    fn list_resolved_defects(
        &self,
        project: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DefectReport>, TrackerError> {
        Ok(self
            .project(project)?
            .1
            .iter()
            .filter(|r| r.resolved >= from && r.resolved <= to)
            .cloned()
            .collect())
    }
}

/// The demo project: four tagged releases in the repository, eight published
pub struct DemoProject {
    pub dir: TempDir,
    pub tracker: StaticTracker,
}

impl DemoProject {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let git = GitFixture::init(&dir.path().join("repos").join("demo"));

        git.commit(
            "Initial import",
            "alice",
            0,
            &[
                ("src/A.java", Some("a\nb\n")),
                ("src/B.java", Some("b\n")),
                ("README.md", Some("demo\n")),
            ],
        );
        git.commit("Tag 1.0 release", "alice", 5, &[]);
        git.commit("DEMO-1: fix null check in A", "bob", 10, &[("src/A.java", Some("a\nb\nc\n"))]);
        git.commit("Tag 2.0 release", "alice", 15, &[]);
        git.commit("Refactor B", "carol", 20, &[("src/B.java", Some("b\nb2\n"))]);
        git.commit("Tag 3.0 release", "alice", 25, &[]);
        git.commit("DEMO-2 fix B", "bob", 30, &[("src/B.java", Some("b\nb3\n"))]);
        git.commit("Tag 4.0 release", "alice", 35, &[]);

        let releases = vec![
            Release::new("1", "1.0", date(2020, 1, 6)),
            Release::new("2", "2.0", date(2020, 1, 16)),
            Release::new("3", "3.0", date(2020, 1, 26)),
            Release::new("4", "4.0", date(2020, 2, 5)),
            Release::new("5", "5.0", date(2020, 6, 1)),
            Release::new("6", "6.0", date(2020, 7, 1)),
            Release::new("7", "7.0", date(2020, 8, 1)),
            Release::new("8", "8.0", date(2020, 9, 1)),
        ];
        let reports = vec![
            DefectReport::new("DEMO-1", date(2020, 1, 3), date(2020, 1, 11), vec![date(2020, 1, 6)]),
            DefectReport::new("DEMO-2", date(2020, 1, 7), date(2020, 1, 31), vec![]),
            // Resolved after the last kept release
            DefectReport::new("DEMO-3", date(2020, 5, 1), date(2020, 6, 15), vec![]),
        ];

        Self {
            dir,
            tracker: StaticTracker::default().with_project("DEMO", releases, reports),
        }
    }

    pub fn config(&self) -> Config {
        let mut config = Config::parse(
            r#"
            [proportion]
            cold_start = 1.0

            [[projects]]
            name = "demo"
            tracker_key = "DEMO"
            repository = "https://example.invalid/demo.git"
            "#,
        )
        .unwrap();
        config.repositories_dir = self.dir.path().join("repos");
        config.output_dir = self.dir.path().join("out");
        config
    }

    pub fn datasets(&self, output: &Path) -> PathBuf {
        output.join("demo").join("datasets")
    }
}

/// Parsed CSV rows keyed by (version, file)
pub fn rows(csv: &str) -> HashMap<(String, String), Vec<String>> {
    csv.lines()
        .skip(1)
        .map(|line| {
            let cells: Vec<String> = line.split(',').map(String::from).collect();
            ((cells[0].clone(), cells[1].clone()), cells)
        })
        .collect()
}
