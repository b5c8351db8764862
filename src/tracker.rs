// src/tracker.rs

//! Issue tracker access: released versions and fixed bug reports.

use crate::model::{DefectReport, Release};
use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("could not parse tracker response: {0}")]
    Parse(String),

    #[error("invalid date {0:?}")]
    InvalidDate(String),
}

impl From<serde_json::Error> for TrackerError {
    fn from(e: serde_json::Error) -> Self {
        TrackerError::Parse(e.to_string())
    }
}

pub trait IssueTracker {
    /// Released versions that carry a release date, ascending by date
    fn list_releases(&self, project: &str) -> Result<Vec<Release>, TrackerError>;

    /// Fixed bugs resolved within `[from, to]`
    fn list_resolved_defects(
        &self,
        project: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DefectReport>, TrackerError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JiraVersion {
    #[serde(default)]
    id: String,
    name: String,
    #[serde(default)]
    released: bool,
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    max_results: usize,
    #[serde(default)]
    total: usize,
    #[serde(default)]
    issues: Vec<JiraIssue>,
}

#[derive(Debug, Deserialize)]
struct JiraIssue {
    key: Option<String>,
    #[serde(default)]
    fields: IssueFields,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueFields {
    #[serde(rename = "resolutiondate")]
    resolution_date: Option<String>,
    created: Option<String>,
    #[serde(default)]
    versions: Vec<JiraVersion>,
    #[serde(default)]
    fix_versions: Vec<JiraVersion>,
}

/// One page of a search, already converted to reports
#[derive(Debug)]
pub struct SearchPage {
    pub total: usize,
    pub max_results: usize,
    pub issues: usize,
    pub reports: Vec<DefectReport>,
}

/// Tracker dates are ISO timestamps; only the calendar day is kept
fn parse_day(value: &str) -> Result<NaiveDate, TrackerError> {
    value
        .get(..10)
        .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
        .ok_or_else(|| TrackerError::InvalidDate(value.to_string()))
}

fn release_dates(versions: &[JiraVersion]) -> Result<Vec<NaiveDate>, TrackerError> {
    versions
        .iter()
        .filter_map(|v| v.release_date.as_deref())
        .map(parse_day)
        .collect()
}

/// Released versions with a release date, sorted by date
pub fn parse_versions(json: &str) -> Result<Vec<Release>, TrackerError> {
    let versions: Vec<JiraVersion> = serde_json::from_str(json)?;
    let mut releases = Vec::new();
    for version in versions {
        let Some(date) = version.release_date.as_deref().filter(|_| version.released) else {
            debug!("Skipping version {} without a release", version.name);
            continue;
        };
        releases.push(Release::new(version.id, version.name, parse_day(date)?));
    }
    releases.sort_by_key(|r| r.release_date);
    Ok(releases)
}

/// Converts a search page; issues without key, creation or resolution date are dropped.
///
/// The latest fix version replaces the resolution date when it is after the
/// creation date and not after `last_release`, since reopened issues keep
/// their first resolution date.
pub fn parse_search_page(json: &str, last_release: NaiveDate) -> Result<SearchPage, TrackerError> {
    let response: SearchResponse = serde_json::from_str(json)?;
    let issues = response.issues.len();
    let mut reports = Vec::with_capacity(issues);

    for issue in response.issues {
        let fields = issue.fields;
        let (Some(key), Some(resolved), Some(created)) =
            (issue.key, fields.resolution_date, fields.created)
        else {
            continue;
        };
        let created = parse_day(&created)?;
        let mut resolved = parse_day(&resolved)?;

        if let Some(fix) = release_dates(&fields.fix_versions)?.into_iter().max() {
            if fix > created && fix <= last_release {
                resolved = fix;
            }
        }

        let affected = release_dates(&fields.versions)?;
        reports.push(DefectReport::new(key, created, resolved, affected));
    }

    Ok(SearchPage {
        total: response.total,
        max_results: response.max_results,
        issues,
        reports,
    })
}

pub fn defect_query(project: &str, from: NaiveDate, to: NaiveDate) -> String {
    format!(
        "project={} AND issueType=Bug AND (status=closed OR status=resolved) \
         AND resolution=fixed AND resolved>={} AND resolved<={}",
        project,
        from.format("%Y-%m-%d"),
        to.format("%Y-%m-%d")
    )
}

const ISSUE_FIELDS: &str = "key,versions,fixVersions,resolutiondate,created";

/// Jira REST v2 client
pub struct JiraClient {
    base_url: String,
    page_size: usize,
    agent: ureq::Agent,
}

impl JiraClient {
    pub fn new(base_url: &str, page_size: usize, timeout: Duration) -> Self {
        let agent = ureq::config::Config::builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build()
            .new_agent();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            page_size: page_size.max(1),
            agent,
        }
    }

    fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String, TrackerError> {
        let mut request = self.agent.get(url);
        for (key, value) in query {
            request = request.query(*key, value);
        }
        let response = request.call().map_err(|e| TrackerError::Http {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status().as_u16();
        if status >= 400 {
            return Err(TrackerError::Status {
                url: url.to_string(),
                status,
            });
        }
        response
            .into_body()
            .read_to_string()
            .map_err(|e| TrackerError::Http {
                url: url.to_string(),
                message: e.to_string(),
            })
    }
}

impl IssueTracker for JiraClient {
    fn list_releases(&self, project: &str) -> Result<Vec<Release>, TrackerError> {
        let url = format!("{}/rest/api/2/project/{}/versions", self.base_url, project.to_uppercase());
        let releases = parse_versions(&self.get(&url, &[])?)?;
        info!("Loaded {} released versions of {}", releases.len(), project);
        Ok(releases)
    }

    fn list_resolved_defects(
        &self,
        project: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DefectReport>, TrackerError> {
        let url = format!("{}/rest/api/2/search", self.base_url);
        let jql = defect_query(project, from, to);

        let mut reports = Vec::new();
        let mut start_at = 0;
        loop {
            let json = self.get(
                &url,
                &[
                    ("jql", jql.clone()),
                    ("fields", ISSUE_FIELDS.to_string()),
                    ("startAt", start_at.to_string()),
                    ("maxResults", self.page_size.to_string()),
                ],
            )?;
            let page = parse_search_page(&json, to)?;
            debug!("Fetched {} issues of {} at offset {}", page.issues, page.total, start_at);
            reports.extend(page.reports);

            start_at += page.max_results.max(page.issues);
            if page.issues == 0 || start_at >= page.total {
                break;
            }
        }
        // The search returns newest keys first
        reports.reverse();
        info!("Loaded {} fixed bugs of {}", reports.len(), project);
        Ok(reports)
    }
}
