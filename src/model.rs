// src/model.rs

use crate::resolver::Strategy;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::BTreeMap;
use std::fmt;

/// Position of a release in date order
pub type ReleaseIndex = usize;

/// Position of a defect report in the timeline arena
pub type ReportIndex = usize;

/// Position of a commit in the ascending commit log
pub type CommitIndex = usize;

/// A released version as published by the issue tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub id: String,
    pub name: String,
    pub release_date: NaiveDate,
}

impl Release {
    pub fn new(id: impl Into<String>, name: impl Into<String>, release_date: NaiveDate) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            release_date,
        }
    }

    /// Last instant of the release day, used by the date filter
    pub fn end_of_day(&self) -> NaiveDateTime {
        end_of_day(self.release_date)
    }
}

pub fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).unwrap_or_default())
}

/// Where the fix of a defect report lives in the repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    /// Not looked up (e.g. reports of a cold-start project)
    #[default]
    Pending,
    Resolved(CommitIndex),
    NotFound,
}

/// A resolved bug ticket
#[derive(Debug, Clone, PartialEq)]
pub struct DefectReport {
    pub key: String,
    pub created: NaiveDate,
    pub resolved: NaiveDate,
    /// Release dates of the affected versions, ascending
    pub affected_release_dates: Vec<NaiveDate>,
    pub injected: Option<ReleaseIndex>,
    pub opening: Option<ReleaseIndex>,
    pub fixing: Option<ReleaseIndex>,
    pub resolution: Resolution,
}

impl DefectReport {
    pub fn new(
        key: impl Into<String>,
        created: NaiveDate,
        resolved: NaiveDate,
        mut affected_release_dates: Vec<NaiveDate>,
    ) -> Self {
        affected_release_dates.sort();
        Self {
            key: key.into(),
            created,
            resolved,
            affected_release_dates,
            injected: None,
            opening: None,
            fixing: None,
            resolution: Resolution::Pending,
        }
    }

    /// Both opening and fixing release are known
    pub fn is_classified(&self) -> bool {
        self.opening.is_some() && self.fixing.is_some()
    }

    /// FV - OV, floored at one when the ticket was opened and fixed in the same release
    pub fn fixing_minus_opening(&self) -> Option<usize> {
        match (self.opening, self.fixing) {
            (Some(ov), Some(fv)) => Some(fv.saturating_sub(ov).max(1)),
            _ => None,
        }
    }

    /// (FV - IV) / max(FV - OV, 1)
    pub fn proportion(&self) -> Option<f64> {
        let fv = self.fixing?;
        let iv = self.injected?;
        let denominator = self.fixing_minus_opening()?;
        Some(fv.saturating_sub(iv) as f64 / denominator as f64)
    }

    pub fn fix_commit(&self) -> Option<CommitIndex> {
        match self.resolution {
            Resolution::Resolved(commit) => Some(commit),
            _ => None,
        }
    }
}

/// A commit as read from the repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub hash: String,
    /// First line of the commit message
    pub message: String,
    pub author: String,
    pub email: String,
    /// Committer time in the committer's own offset
    pub date: DateTime<FixedOffset>,
    pub tree: String,
    pub parents: Vec<String>,
}

impl Commit {
    pub fn local_date(&self) -> NaiveDateTime {
        self.date.naive_local()
    }

    pub fn timestamp(&self) -> i64 {
        self.date.timestamp()
    }
}

/// Line counts of one source file between two commits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffEntry {
    pub added: usize,
    pub deleted: usize,
}

impl DiffEntry {
    pub fn new(added: usize, deleted: usize) -> Self {
        Self { added, deleted }
    }

    pub fn touched(&self) -> i64 {
        (self.added + self.deleted) as i64
    }

    pub fn churn(&self) -> i64 {
        self.added as i64 - self.deleted as i64
    }
}

/// Dataset columns, in output order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    Loc,
    LocTouched,
    Churn,
    AverageLocAdded,
    MaxLocAdded,
    AverageChurn,
    MaxChurn,
    Nr,
    NAuth,
    NFix,
    Age,
}

impl Metric {
    pub const ALL: [Metric; 11] = [
        Metric::Loc,
        Metric::LocTouched,
        Metric::Churn,
        Metric::AverageLocAdded,
        Metric::MaxLocAdded,
        Metric::AverageChurn,
        Metric::MaxChurn,
        Metric::Nr,
        Metric::NAuth,
        Metric::NFix,
        Metric::Age,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::Loc => "LOC",
            Metric::LocTouched => "LOC_TOUCHED",
            Metric::Churn => "CHURN",
            Metric::AverageLocAdded => "AVERAGE_LOC_ADDED",
            Metric::MaxLocAdded => "MAX_LOC_ADDED",
            Metric::AverageChurn => "AVERAGE_CHURN",
            Metric::MaxChurn => "MAX_CHURN",
            Metric::Nr => "NR",
            Metric::NAuth => "N_AUTH",
            Metric::NFix => "N_FIX",
            Metric::Age => "AGE",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single computed metric
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricValue {
    pub metric: Metric,
    pub value: f64,
}

impl MetricValue {
    pub fn new(metric: Metric, value: f64) -> Self {
        Self { metric, value }
    }
}

/// One dataset row: a class as it exists in one release
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClassReleaseEntry {
    pub release: ReleaseIndex,
    pub class: String,
    pub metrics: BTreeMap<Metric, f64>,
    pub buggy: bool,
    /// Per-class repository failures (missing objects)
    pub failures: Vec<String>,
}

impl ClassReleaseEntry {
    pub fn new(release: ReleaseIndex, class: impl Into<String>) -> Self {
        Self {
            release,
            class: class.into(),
            ..Default::default()
        }
    }

    pub fn merge(&mut self, values: impl IntoIterator<Item = MetricValue>) {
        for value in values {
            self.metrics.insert(value.metric, value.value);
        }
    }

    /// Buggy is write-once: it is never reset to false
    pub fn mark_buggy(&mut self) {
        self.buggy = true;
    }

    pub fn metric(&self, metric: Metric) -> Option<f64> {
        self.metrics.get(&metric).copied()
    }
}

/// All class entries of a project run, one ordered map per release
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClassReleaseTable {
    releases: Vec<BTreeMap<String, ClassReleaseEntry>>,
}

impl ClassReleaseTable {
    pub fn new(release_count: usize) -> Self {
        Self {
            releases: vec![BTreeMap::new(); release_count],
        }
    }

    pub fn release_count(&self) -> usize {
        self.releases.len()
    }

    pub fn insert(&mut self, entry: ClassReleaseEntry) {
        if let Some(release) = self.releases.get_mut(entry.release) {
            release.insert(entry.class.clone(), entry);
        }
    }

    pub fn get(&self, release: ReleaseIndex, class: &str) -> Option<&ClassReleaseEntry> {
        self.releases.get(release)?.get(class)
    }

    pub fn get_mut(&mut self, release: ReleaseIndex, class: &str) -> Option<&mut ClassReleaseEntry> {
        self.releases.get_mut(release)?.get_mut(class)
    }

    /// Entries of one release, ordered by class path
    pub fn release(&self, release: ReleaseIndex) -> impl Iterator<Item = &ClassReleaseEntry> {
        self.releases.get(release).into_iter().flat_map(|r| r.values())
    }

    pub fn entries(&self) -> impl Iterator<Item = &ClassReleaseEntry> {
        self.releases.iter().flat_map(|r| r.values())
    }
}

/// A release bound to the commit that represents it, with its class inventory
#[derive(Debug, Clone)]
pub struct ReleaseSnapshot {
    pub release: ReleaseIndex,
    pub commit: Commit,
    /// How the commit was found
    pub strategy: Strategy,
    pub classes: Vec<String>,
}

/// Flat arenas of releases and defect reports, cross-referenced by index
#[derive(Debug, Clone, Default)]
pub struct ReleaseTimeline {
    releases: Vec<Release>,
    reports: Vec<DefectReport>,
}

impl ReleaseTimeline {
    /// Sorts releases by date; indices are assigned after sorting
    pub fn new(mut releases: Vec<Release>) -> Self {
        releases.sort_by_key(|r| r.release_date);
        Self {
            releases,
            reports: Vec::new(),
        }
    }

    /// Keep only the oldest `floor(len * fraction)` releases
    pub fn truncate_to_fraction(&mut self, fraction: f64) {
        let keep = (self.releases.len() as f64 * fraction).floor() as usize;
        self.releases.truncate(keep);
    }

    pub fn set_reports(&mut self, reports: Vec<DefectReport>) {
        self.reports = reports;
    }

    pub fn releases(&self) -> &[Release] {
        &self.releases
    }

    pub fn reports(&self) -> &[DefectReport] {
        &self.reports
    }

    pub fn reports_mut(&mut self) -> &mut [DefectReport] {
        &mut self.reports
    }

    /// Releases read-only alongside mutable reports
    pub fn parts_mut(&mut self) -> (&[Release], &mut [DefectReport]) {
        (&self.releases, &mut self.reports)
    }

    pub fn release(&self, index: ReleaseIndex) -> Option<&Release> {
        self.releases.get(index)
    }

    pub fn report(&self, index: ReportIndex) -> Option<&DefectReport> {
        self.reports.get(index)
    }

    pub fn len(&self) -> usize {
        self.releases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.releases.first().map(|r| r.release_date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.releases.last().map(|r| r.release_date)
    }

    pub fn fixed_in(&self, release: ReleaseIndex) -> impl Iterator<Item = ReportIndex> + '_ {
        self.indices_where(move |r| r.fixing == Some(release))
    }

    pub fn opened_in(&self, release: ReleaseIndex) -> impl Iterator<Item = ReportIndex> + '_ {
        self.indices_where(move |r| r.opening == Some(release))
    }

    pub fn injected_in(&self, release: ReleaseIndex) -> impl Iterator<Item = ReportIndex> + '_ {
        self.indices_where(move |r| r.injected == Some(release))
    }

    fn indices_where<'a>(
        &'a self,
        predicate: impl Fn(&DefectReport) -> bool + 'a,
    ) -> impl Iterator<Item = ReportIndex> + 'a {
        self.reports
            .iter()
            .enumerate()
            .filter(move |(_, r)| predicate(r))
            .map(|(i, _)| i)
    }
}
