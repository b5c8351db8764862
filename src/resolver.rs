// src/resolver.rs

use crate::model::{end_of_day, Commit, CommitIndex, DefectReport, Release};
use chrono::NaiveDate;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("commit for {target} was not found")]
pub struct ResolutionNotFound {
    pub target: String,
}

/// Which heuristic produced a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Semantic,
    Date,
}

/// Maps releases and defect reports onto commits of an ascending commit log
pub struct RevisionResolver<'a> {
    commits: &'a [Commit],
    /// Project name as written in release commits, e.g. "BookKeeper 4.0.0 release"
    release_phrase: Option<&'a str>,
}

impl<'a> RevisionResolver<'a> {
    pub fn new(commits: &'a [Commit], release_phrase: Option<&'a str>) -> Self {
        Self {
            commits,
            release_phrase,
        }
    }

    pub fn resolve_release(
        &self,
        release: &Release,
    ) -> Result<(CommitIndex, Strategy), ResolutionNotFound> {
        if let Some(index) = self.semantic_filter(&release.name) {
            debug!("Release {} resolved by message to {}", release.name, self.commits[index].hash);
            return Ok((index, Strategy::Semantic));
        }
        self.date_filter(release.release_date)
            .map(|index| {
                debug!("Release {} resolved by date to {}", release.name, self.commits[index].hash);
                (index, Strategy::Date)
            })
            .ok_or_else(|| ResolutionNotFound {
                target: format!("release {}", release.name),
            })
    }

    pub fn resolve_report(
        &self,
        report: &DefectReport,
    ) -> Result<(CommitIndex, Strategy), ResolutionNotFound> {
        if let Some(index) = self.key_filter(&report.key) {
            return Ok((index, Strategy::Semantic));
        }
        self.date_filter(report.resolved)
            .map(|index| (index, Strategy::Date))
            .ok_or_else(|| ResolutionNotFound {
                target: format!("issue {}", report.key),
            })
    }

    /// Latest commit whose message looks like the tagging of `name`.
    ///
    /// The name must end at a non-version character, so `3.4.1` does not
    /// match `Tag 3.4.10`.
    fn semantic_filter(&self, name: &str) -> Option<CommitIndex> {
        let name = regex::escape(name);
        let tag = Regex::new(&format!(r"Tag.* {name}\.?(?:[^0-9A-Za-z.]|$)")).ok()?;
        let phrase = match self.release_phrase {
            Some(project) => {
                let pattern = format!(r"{} {name} release", regex::escape(project));
                Some(Regex::new(&pattern).ok()?)
            }
            None => None,
        };

        self.commits.iter().rposition(|c| {
            tag.is_match(&c.message) || phrase.as_ref().is_some_and(|p| p.is_match(&c.message))
        })
    }

    /// First commit at or after the end of `date`, in committer-local time
    fn date_filter(&self, date: NaiveDate) -> Option<CommitIndex> {
        let threshold = end_of_day(date);
        self.commits.iter().position(|c| c.local_date() >= threshold)
    }

    /// First commit whose message starts with `key` as a whole token
    fn key_filter(&self, key: &str) -> Option<CommitIndex> {
        self.commits.iter().position(|c| {
            c.message
                .strip_prefix(key)
                .is_some_and(|rest| !rest.starts_with(|ch: char| ch.is_ascii_digit()))
        })
    }
}
