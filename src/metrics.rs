// src/metrics.rs

use crate::git::{RepositoryAccess, RepositoryError};
use crate::model::*;
use chrono::NaiveDate;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressIterator, ProgressStyle};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::BufRead;
use tracing::{info, warn};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Everything shared by the classes of one release
pub struct ReleaseWindow<'a> {
    pub index: ReleaseIndex,
    /// Commit of the previous release; `None` for the first release
    pub previous: Option<&'a Commit>,
    pub current: &'a Commit,
    /// Date of the previous release, or of the first commit for release 0
    pub previous_date: NaiveDate,
    pub current_date: NaiveDate,
    /// Source files changed between the two release commits
    pub release_diff: BTreeMap<String, DiffEntry>,
    /// Fix commits of the reports fixed in this release
    pub fix_hashes: HashSet<String>,
}

/// One class inside a release window, with its intervening commits loaded once
pub struct ClassWindow<'a> {
    pub release: &'a ReleaseWindow<'a>,
    pub class: &'a str,
    history: Result<Vec<Commit>, String>,
}

impl<'a> ClassWindow<'a> {
    /// Fails only on fatal errors; a missing object is kept for the strategies that need history
    pub fn load(
        repo: &dyn RepositoryAccess,
        release: &'a ReleaseWindow<'a>,
        class: &'a str,
    ) -> Result<Self, RepositoryError> {
        let history = match repo.commits_between(release.previous, release.current, class) {
            Ok(commits) => Ok(commits),
            Err(e) if e.is_local() => Err(e.to_string()),
            Err(e) => return Err(e),
        };
        Ok(Self {
            release,
            class,
            history,
        })
    }

    /// Commits touching the class in `(previous, current]`, ascending
    pub fn history(&self) -> Result<&[Commit], RepositoryError> {
        self.history
            .as_deref()
            .map_err(|e| RepositoryError::MissingObject(e.clone()))
    }
}

/// A family of metrics computed for one class in one release
pub trait MetricStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn compute(
        &self,
        repo: &dyn RepositoryAccess,
        window: &ClassWindow<'_>,
    ) -> Result<Vec<MetricValue>, RepositoryError>;
}

/// LOC of the file at the release commit
pub struct SizeMetric;

impl MetricStrategy for SizeMetric {
    fn name(&self) -> &'static str {
        "size"
    }

    fn compute(
        &self,
        repo: &dyn RepositoryAccess,
        window: &ClassWindow<'_>,
    ) -> Result<Vec<MetricValue>, RepositoryError> {
        let contents = repo.file_contents(window.release.current, window.class)?;
        let loc = contents.as_slice().lines().count();
        Ok(vec![MetricValue::new(Metric::Loc, loc as f64)])
    }
}

/// LOC_TOUCHED and CHURN against the previous release
pub struct DifferenceMetric;

impl MetricStrategy for DifferenceMetric {
    fn name(&self) -> &'static str {
        "difference"
    }

    fn compute(
        &self,
        _repo: &dyn RepositoryAccess,
        window: &ClassWindow<'_>,
    ) -> Result<Vec<MetricValue>, RepositoryError> {
        let diff = window
            .release
            .release_diff
            .get(window.class)
            .copied()
            .unwrap_or_default();
        Ok(vec![
            MetricValue::new(Metric::LocTouched, diff.touched() as f64),
            MetricValue::new(Metric::Churn, diff.churn() as f64),
        ])
    }
}

/// Max and mean of LOC added and churn over each commit touching the class
pub struct CumulativeMetric;

impl MetricStrategy for CumulativeMetric {
    fn name(&self) -> &'static str {
        "cumulative"
    }

    fn compute(
        &self,
        repo: &dyn RepositoryAccess,
        window: &ClassWindow<'_>,
    ) -> Result<Vec<MetricValue>, RepositoryError> {
        let history = window.history()?;

        let mut links = Vec::with_capacity(history.len());
        let mut from = window.release.previous;
        for commit in history {
            links.push(repo.diff_path(from, commit, window.class)?);
            from = Some(commit);
        }

        let (max_added, max_churn, avg_added, avg_churn) = if links.is_empty() {
            (0.0, 0.0, 0.0, 0.0)
        } else {
            let count = links.len() as f64;
            let added: Vec<f64> = links.iter().map(|d| d.added as f64).collect();
            let churn: Vec<f64> = links.iter().map(|d| d.churn() as f64).collect();
            (
                added.iter().copied().fold(f64::MIN, f64::max),
                churn.iter().copied().fold(f64::MIN, f64::max),
                added.iter().sum::<f64>() / count,
                churn.iter().sum::<f64>() / count,
            )
        };

        Ok(vec![
            MetricValue::new(Metric::AverageLocAdded, avg_added),
            MetricValue::new(Metric::MaxLocAdded, max_added),
            MetricValue::new(Metric::AverageChurn, avg_churn),
            MetricValue::new(Metric::MaxChurn, max_churn),
        ])
    }
}

/// NR, N_AUTH, N_FIX and AGE from the intervening commits
pub struct HistoryMetric;

impl MetricStrategy for HistoryMetric {
    fn name(&self) -> &'static str {
        "history"
    }

    fn compute(
        &self,
        _repo: &dyn RepositoryAccess,
        window: &ClassWindow<'_>,
    ) -> Result<Vec<MetricValue>, RepositoryError> {
        let history = window.history()?;
        let release = window.release;

        let authors: BTreeSet<&str> = history.iter().map(|c| c.author.as_str()).collect();
        let fixes = history
            .iter()
            .filter(|c| release.fix_hashes.contains(&c.hash))
            .count();

        let age = match (history.first(), history.last()) {
            (Some(first), Some(last)) => {
                let span = (last.timestamp() - first.timestamp()).abs() as f64 / SECONDS_PER_DAY;
                let days = (release.current_date - release.previous_date).num_days();
                if days > 0 {
                    span / days as f64
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        Ok(vec![
            MetricValue::new(Metric::Nr, history.len() as f64),
            MetricValue::new(Metric::NAuth, authors.len() as f64),
            MetricValue::new(Metric::NFix, fixes as f64),
            MetricValue::new(Metric::Age, age),
        ])
    }
}

pub fn default_strategies() -> Vec<Box<dyn MetricStrategy>> {
    vec![
        Box::new(SizeMetric),
        Box::new(DifferenceMetric),
        Box::new(CumulativeMetric),
        Box::new(HistoryMetric),
    ]
}

/// Walks the release chain and fills a [`ClassReleaseTable`]
pub struct MetricMiner<'r> {
    repo: &'r dyn RepositoryAccess,
    strategies: Vec<Box<dyn MetricStrategy>>,
    parallel: bool,
    show_progress: bool,
}

impl<'r> MetricMiner<'r> {
    pub fn new(repo: &'r dyn RepositoryAccess) -> Self {
        Self {
            repo,
            strategies: default_strategies(),
            parallel: true,
            show_progress: false,
        }
    }

    pub fn with_strategies(mut self, strategies: Vec<Box<dyn MetricStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Releases are mined strictly in order; classes of one release may run in parallel
    pub fn mine(
        &self,
        snapshots: &[ReleaseSnapshot],
        timeline: &ReleaseTimeline,
        commits: &[Commit],
    ) -> Result<ClassReleaseTable, RepositoryError> {
        let mut table = ClassReleaseTable::new(snapshots.len());
        let first_commit_date = commits.first().map(|c| c.local_date().date());

        for (i, snapshot) in snapshots.iter().enumerate() {
            let previous = i.checked_sub(1).map(|p| &snapshots[p]);
            let Some(current_date) = timeline.release(snapshot.release).map(|r| r.release_date) else {
                continue;
            };
            let previous_date = previous
                .and_then(|p| timeline.release(p.release))
                .map(|r| r.release_date)
                .or(first_commit_date)
                .unwrap_or(current_date);

            let release_diff = match previous {
                Some(p) => self.repo.diff(&p.commit, &snapshot.commit)?,
                None => BTreeMap::new(),
            };
            let fix_hashes = timeline
                .fixed_in(snapshot.release)
                .filter_map(|r| timeline.report(r)?.fix_commit())
                .filter_map(|c| commits.get(c))
                .map(|c| c.hash.clone())
                .collect();

            let window = ReleaseWindow {
                index: snapshot.release,
                previous: previous.map(|p| &p.commit),
                current: &snapshot.commit,
                previous_date,
                current_date,
                release_diff,
                fix_hashes,
            };

            for entry in self.mine_release(&window, &snapshot.classes)? {
                table.insert(entry);
            }
        }
        Ok(table)
    }

    pub fn mine_release(
        &self,
        window: &ReleaseWindow<'_>,
        classes: &[String],
    ) -> Result<Vec<ClassReleaseEntry>, RepositoryError> {
        let bar = self.progress_bar(window.index, classes.len());

        let entries: Result<Vec<_>, _> = if self.parallel {
            classes
                .par_iter()
                .progress_with(bar.clone())
                .map(|class| self.mine_class(window, class))
                .collect()
        } else {
            classes
                .iter()
                .progress_with(bar.clone())
                .map(|class| self.mine_class(window, class))
                .collect()
        };
        bar.finish_and_clear();

        let entries = entries?;
        let failed = entries.iter().filter(|e| !e.failures.is_empty()).count();
        info!(
            "Release {}: mined {} classes ({} with missing objects)",
            window.index + 1,
            entries.len(),
            failed
        );
        Ok(entries)
    }

    fn mine_class(
        &self,
        window: &ReleaseWindow<'_>,
        class: &str,
    ) -> Result<ClassReleaseEntry, RepositoryError> {
        let mut entry = ClassReleaseEntry::new(window.index, class);
        let class_window = ClassWindow::load(self.repo, window, class)?;

        for strategy in &self.strategies {
            match strategy.compute(self.repo, &class_window) {
                Ok(values) => entry.merge(values),
                Err(e) if e.is_local() => {
                    warn!(
                        "{} in release {}: {} metrics unavailable: {}",
                        class,
                        window.index + 1,
                        strategy.name(),
                        e
                    );
                    entry.failures.push(format!("{}: {}", strategy.name(), e));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(entry)
    }

    fn progress_bar(&self, release: ReleaseIndex, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} ({eta})") {
            bar.set_style(style);
        }
        bar.set_message(format!("Release {}", release + 1));
        bar
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::memory::MemoryRepository;
    use crate::resolver::Strategy;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct Project {
        repo: MemoryRepository,
        commits: Vec<Commit>,
        snapshots: Vec<ReleaseSnapshot>,
        timeline: ReleaseTimeline,
    }

    /// Two releases: r1 at commit 1, r2 at commit 4
    fn project() -> Project {
        let mut repo = MemoryRepository::new();
        let c0 = repo.commit("Import", "alice", "2020-01-01T10:00:00+00:00", &[("A.java", Some("a\nb\n"))]);
        let c1 = repo.commit(
            "Add B",
            "bob",
            "2020-01-05T10:00:00+00:00",
            &[("B.java", Some("x\n"))],
        );
        let c2 = repo.commit(
            "P-1 grow A",
            "bob",
            "2020-01-11T10:00:00+00:00",
            &[("A.java", Some("a\nb\nc\nd\n"))],
        );
        let c3 = repo.commit(
            "Shrink A",
            "carol",
            "2020-01-16T10:00:00+00:00",
            &[("A.java", Some("a\nc\nd\n"))],
        );
        let c4 = repo.commit("Docs", "alice", "2020-01-20T10:00:00+00:00", &[("C.java", Some("c\n"))]);
        let commits = vec![c0, c1.clone(), c2, c3, c4.clone()];

        let mut timeline = ReleaseTimeline::new(vec![
            Release::new("1", "1.0", date(2020, 1, 6)),
            Release::new("2", "2.0", date(2020, 1, 21)),
        ]);
        let mut report = DefectReport::new("P-1", date(2020, 1, 7), date(2020, 1, 12), vec![]);
        report.opening = Some(1);
        report.fixing = Some(1);
        report.injected = Some(0);
        report.resolution = Resolution::Resolved(2);
        timeline.set_reports(vec![report]);

        let snapshots = [(0, c1), (1, c4)]
            .into_iter()
            .map(|(release, commit)| ReleaseSnapshot {
                release,
                strategy: Strategy::Semantic,
                classes: repo.class_inventory(&commit).unwrap(),
                commit,
            })
            .collect();

        Project {
            repo,
            commits,
            snapshots,
            timeline,
        }
    }

    fn mine(project: &Project, parallel: bool) -> ClassReleaseTable {
        MetricMiner::new(&project.repo)
            .parallel(parallel)
            .mine(&project.snapshots, &project.timeline, &project.commits)
            .unwrap()
    }

    #[test]
    fn test_first_release_has_no_touched_lines() {
        let project = project();
        let table = mine(&project, false);
        for entry in table.release(0) {
            assert_eq!(entry.metric(Metric::LocTouched), Some(0.0));
            assert_eq!(entry.metric(Metric::Churn), Some(0.0));
        }
        let a = table.get(0, "A.java").unwrap();
        assert_eq!(a.metric(Metric::Loc), Some(2.0));
        assert_eq!(a.metric(Metric::Nr), Some(1.0));
        assert_eq!(a.metric(Metric::MaxLocAdded), Some(2.0));
    }

    #[test]
    fn test_release_diff_metrics() {
        let project = project();
        let table = mine(&project, false);
        let a = table.get(1, "A.java").unwrap();
        // a,b -> a,c,d
        assert_eq!(a.metric(Metric::Loc), Some(3.0));
        assert_eq!(a.metric(Metric::LocTouched), Some(3.0));
        assert_eq!(a.metric(Metric::Churn), Some(1.0));

        let b = table.get(1, "B.java").unwrap();
        assert_eq!(b.metric(Metric::LocTouched), Some(0.0));
        assert_eq!(b.metric(Metric::Nr), Some(0.0));
    }

    #[test]
    fn test_cumulative_metrics_follow_each_commit() {
        let project = project();
        let table = mine(&project, false);
        let a = table.get(1, "A.java").unwrap();
        // Links: r1 -> c2 (+2, churn 2), c2 -> c3 (-1, churn -1)
        assert_eq!(a.metric(Metric::MaxLocAdded), Some(2.0));
        assert_eq!(a.metric(Metric::AverageLocAdded), Some(1.0));
        assert_eq!(a.metric(Metric::MaxChurn), Some(2.0));
        assert_eq!(a.metric(Metric::AverageChurn), Some(0.5));
    }

    #[test]
    fn test_history_metrics() {
        let project = project();
        let table = mine(&project, false);
        let a = table.get(1, "A.java").unwrap();
        assert_eq!(a.metric(Metric::Nr), Some(2.0));
        assert_eq!(a.metric(Metric::NAuth), Some(2.0));
        assert_eq!(a.metric(Metric::NFix), Some(1.0));
        // 5 days between the commits over 15 days between the releases
        assert_eq!(a.metric(Metric::Age), Some(5.0 / 15.0));

        let c = table.get(1, "C.java").unwrap();
        assert_eq!(c.metric(Metric::Age), Some(0.0));
        assert_eq!(c.metric(Metric::NFix), Some(0.0));
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let project = project();
        assert_eq!(mine(&project, true), mine(&project, false));
    }

    #[test]
    fn test_missing_blob_is_local_to_its_class() {
        let mut project = project();
        let hash = project.snapshots[1].commit.hash.clone();
        project.repo.missing.push((hash, "A.java".to_string()));

        let table = mine(&project, true);
        let a = table.get(1, "A.java").unwrap();
        assert_eq!(a.metric(Metric::Loc), None);
        assert_eq!(a.metric(Metric::Nr), Some(2.0));
        assert_eq!(a.failures.len(), 1);

        let b = table.get(1, "B.java").unwrap();
        assert!(b.failures.is_empty());
        assert_eq!(b.metric(Metric::Loc), Some(1.0));
    }

    #[test]
    fn test_custom_strategy_table() {
        struct Constant;
        impl MetricStrategy for Constant {
            fn name(&self) -> &'static str {
                "constant"
            }
            fn compute(
                &self,
                _repo: &dyn RepositoryAccess,
                _window: &ClassWindow<'_>,
            ) -> Result<Vec<MetricValue>, RepositoryError> {
                Ok(vec![MetricValue::new(Metric::Nr, 7.0)])
            }
        }

        let project = project();
        let table = MetricMiner::new(&project.repo)
            .with_strategies(vec![Box::new(Constant)])
            .mine(&project.snapshots, &project.timeline, &project.commits)
            .unwrap();
        let entry = table.get(0, "A.java").unwrap();
        assert_eq!(entry.metrics.len(), 1);
        assert_eq!(entry.metric(Metric::Nr), Some(7.0));
    }
}
