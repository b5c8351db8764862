// src/pipeline.rs

//! Per-project orchestration: resolution, proportion, mining, labeling, output.

use crate::cli::OutputMode;
use crate::config::{Config, ProjectConfig};
use crate::dataset::{self, DatasetWriter};
use crate::error::{Error, Result};
use crate::git::{GitRepository, RepositoryAccess};
use crate::labeler::BuggyLabeler;
use crate::metrics::MetricMiner;
use crate::model::*;
use crate::proportion::{self, ClassificationSummary, ProportionAudit, ProportionEstimator};
use crate::resolver::{RevisionResolver, Strategy};
use crate::tracker::IssueTracker;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub threshold: usize,
    pub parallel: bool,
    pub show_progress: bool,
    pub release_phrase: Option<String>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            threshold: proportion::DEFAULT_THRESHOLD,
            parallel: true,
            show_progress: false,
            release_phrase: None,
        }
    }
}

/// Everything known about one project before labeling
pub struct Analysis {
    pub timeline: ReleaseTimeline,
    pub commits: Vec<Commit>,
    pub snapshots: Vec<ReleaseSnapshot>,
    /// Metrics only; labels are applied per output
    pub table: ClassReleaseTable,
    pub classification: ClassificationSummary,
    pub audits: Vec<ProportionAudit>,
    labeler: BuggyLabeler,
}

impl Analysis {
    pub fn release_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Table labeled with the reports fixed in releases `<= up_to`
    pub fn labeled(&self, up_to: ReleaseIndex) -> ClassReleaseTable {
        let mut table = self.table.clone();
        self.labeler.label(&mut table, up_to);
        table
    }

    /// First `k` releases, labeled only with what was known at release `k - 1`
    pub fn walk_forward(&self, k: usize) -> String {
        let table = self.labeled(k.saturating_sub(1));
        dataset::render(&table, k)
    }

    pub fn oracle(&self) -> String {
        let releases = self.release_count();
        let table = self.labeled(releases.saturating_sub(1));
        dataset::render(&table, releases)
    }

    pub fn write(&self, writer: &DatasetWriter, mode: OutputMode) -> std::io::Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        if matches!(mode, OutputMode::WalkForward | OutputMode::Both) {
            for k in 2..=self.release_count() {
                written.push(writer.write(&k.to_string(), &self.walk_forward(k))?);
            }
        }
        if matches!(mode, OutputMode::Oracle | OutputMode::Both) {
            written.push(writer.write("oracle", &self.oracle())?);
        }
        Ok(written)
    }
}

/// Runs the core pipeline over an already loaded timeline
pub fn analyze(
    repo: &dyn RepositoryAccess,
    mut timeline: ReleaseTimeline,
    cold_start: f64,
    options: &AnalysisOptions,
) -> Result<Analysis> {
    let commits = repo.list_commits()?;
    info!("Resolving {} releases against {} commits", timeline.len(), commits.len());

    let resolver = RevisionResolver::new(&commits, options.release_phrase.as_deref());
    let mut snapshots = Vec::with_capacity(timeline.len());
    for (index, release) in timeline.releases().iter().enumerate() {
        let (commit, strategy) = resolver.resolve_release(release)?;
        let commit = commits[commit].clone();
        let classes = repo.class_inventory(&commit)?;
        snapshots.push(ReleaseSnapshot {
            release: index,
            commit,
            strategy,
            classes,
        });
    }
    let dated = snapshots.iter().filter(|s| s.strategy == Strategy::Date).count();
    if dated > 0 {
        info!("{} of {} releases resolved by date", dated, snapshots.len());
    }

    let mut missing = 0;
    let mut by_date = 0;
    for report in timeline.reports_mut() {
        report.resolution = match resolver.resolve_report(report) {
            Ok((commit, strategy)) => {
                if strategy == Strategy::Date {
                    by_date += 1;
                }
                Resolution::Resolved(commit)
            }
            Err(e) => {
                warn!("No fix commit for {}: {}", report.key, e);
                missing += 1;
                Resolution::NotFound
            }
        };
    }
    if missing > 0 {
        info!("{} of {} reports have no fix commit", missing, timeline.reports().len());
    }
    debug!("{} reports resolved by date", by_date);

    let classification = proportion::classify(&mut timeline);
    let audits = ProportionEstimator::new(cold_start)
        .with_threshold(options.threshold)
        .apply(&mut timeline);

    let start = Instant::now();
    let table = MetricMiner::new(repo)
        .parallel(options.parallel)
        .show_progress(options.show_progress)
        .mine(&snapshots, &timeline, &commits)?;
    info!("Mined {} entries in {:.2?}", table.entries().count(), start.elapsed());

    let labeler = BuggyLabeler::new(repo, &timeline, &commits)?;

    Ok(Analysis {
        timeline,
        commits,
        snapshots,
        table,
        classification,
        audits,
        labeler,
    })
}

/// Result of a finished project
#[derive(Debug)]
pub struct ProjectSummary {
    pub project: String,
    pub releases: usize,
    pub rows: usize,
    pub buggy: usize,
    pub files: Vec<PathBuf>,
}

pub struct Pipeline<'a> {
    config: &'a Config,
    tracker: &'a dyn IssueTracker,
    mode: OutputMode,
    show_progress: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, tracker: &'a dyn IssueTracker) -> Self {
        Self {
            config,
            tracker,
            mode: OutputMode::Both,
            show_progress: false,
        }
    }

    pub fn mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Releases kept for a project, with the reports resolved in their window
    pub fn load_timeline(&self, tracker_key: &str) -> Result<ReleaseTimeline> {
        let mut timeline = ReleaseTimeline::new(self.tracker.list_releases(tracker_key)?);
        timeline.truncate_to_fraction(self.config.proportion.release_fraction);

        let (Some(first), Some(last)) = (timeline.first_date(), timeline.last_date()) else {
            return Err(Error::NoReleases {
                project: tracker_key.to_string(),
            });
        };
        let reports = self.tracker.list_resolved_defects(tracker_key, first, last)?;
        info!(
            "{}: {} releases from {} to {}, {} fixed bugs",
            tracker_key,
            timeline.len(),
            first,
            last,
            reports.len()
        );
        timeline.set_reports(reports);
        Ok(timeline)
    }

    /// Fixed prior from the configuration, or the median of the cold-start projects
    pub fn cold_start(&self) -> Result<f64> {
        if let Some(p) = self.config.proportion.cold_start {
            return Ok(p);
        }
        let mut values = Vec::new();
        for key in &self.config.proportion.cold_start_projects {
            let mut timeline = self.load_timeline(key)?;
            proportion::classify(&mut timeline);
            match proportion::cold_start_proportion(&timeline) {
                Some(p) => {
                    info!("Cold start of {}: {:.3}", key, p);
                    values.push(p);
                }
                None => warn!("{} has no report with a known injected version", key),
            }
        }
        proportion::median(values).ok_or_else(|| Error::NoColdStart {
            projects: self.config.proportion.cold_start_projects.join(", "),
        })
    }

    pub fn run_project(&self, project: &ProjectConfig, cold_start: f64) -> Result<ProjectSummary> {
        let start = Instant::now();
        let timeline = self.load_timeline(&project.tracker_key)?;

        let path = self.config.repositories_dir.join(&project.name);
        let extension = self.config.mining.source_extension.as_str();
        let cloned = !path.exists();
        let repo = if cloned {
            GitRepository::clone_remote(&project.repository, &project.branch, &path, extension)?
        } else {
            GitRepository::open(&path, extension)?
        };

        let result = self.mine_and_write(&repo, project, timeline, cold_start);

        if cloned && !self.config.keep_clones {
            remove_clone(repo.path());
        }
        let summary = result?;
        info!(
            "{}: {} releases, {} rows ({} buggy) in {:.2?}",
            summary.project,
            summary.releases,
            summary.rows,
            summary.buggy,
            start.elapsed()
        );
        Ok(summary)
    }

    fn mine_and_write(
        &self,
        repo: &GitRepository,
        project: &ProjectConfig,
        timeline: ReleaseTimeline,
        cold_start: f64,
    ) -> Result<ProjectSummary> {
        let options = AnalysisOptions {
            threshold: self.config.proportion.threshold,
            parallel: self.config.mining.parallel,
            show_progress: self.show_progress,
            release_phrase: project.release_phrase.clone(),
        };
        let analysis = analyze(repo, timeline, cold_start, &options)?;

        let writer = DatasetWriter::new(&self.config.output_dir, &project.name);
        let files = analysis.write(&writer, self.mode)?;

        let oracle = analysis.labeled(analysis.release_count().saturating_sub(1));
        Ok(ProjectSummary {
            project: project.name.clone(),
            releases: analysis.release_count(),
            rows: oracle.entries().count(),
            buggy: oracle.entries().filter(|e| e.buggy).count(),
            files,
        })
    }

    /// Runs every project; a failing project does not stop the others
    pub fn run(&self, projects: &[&ProjectConfig]) -> Result<Vec<(String, Result<ProjectSummary>)>> {
        let cold_start = self.cold_start()?;
        info!("Using cold start proportion {:.3}", cold_start);

        let mut results = Vec::with_capacity(projects.len());
        for project in projects {
            let result = self.run_project(project, cold_start);
            if let Err(e) = &result {
                error!("{} failed: {}", project.name, e);
            }
            results.push((project.name.clone(), result));
        }
        Ok(results)
    }
}

fn remove_clone(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path) {
        warn!("Could not remove clone at {}: {}", path.display(), e);
    }
}
