// src/proportion.rs

//! Injected-version estimation with the Proportion technique.
//!
//! Every classified report carries opening (OV) and fixing (FV) release
//! indices derived from its dates. The injected version (IV) comes from the
//! first affected version when the tracker has one; otherwise it is estimated
//! as `FV - ceil(max(FV - OV, 1) * P)`, where `P` is the running mean of
//! `(FV - IV) / max(FV - OV, 1)` over the reports seen so far, or a cold-start
//! prior when a release has too few complete reports.

use crate::model::{DefectReport, Release, ReleaseIndex, ReleaseTimeline, Resolution};
use tracing::{debug, info};

/// Minimum number of complete reports in a release for its own mean to be used
pub const DEFAULT_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassificationSummary {
    pub classified: usize,
    pub skipped: usize,
    /// Reports whose tracker metadata contradicted their dates
    pub repaired: usize,
}

/// Assigns opening, fixing and (when derivable) injected release indices
pub fn classify(timeline: &mut ReleaseTimeline) -> ClassificationSummary {
    let (releases, reports) = timeline.parts_mut();
    let mut summary = ClassificationSummary::default();
    for report in reports.iter_mut() {
        match classify_report(releases, report) {
            Outcome::Skipped => summary.skipped += 1,
            Outcome::Classified { repaired } => {
                summary.classified += 1;
                if repaired {
                    summary.repaired += 1;
                }
            }
        }
    }
    info!(
        "Classified {} reports ({} skipped, {} repaired)",
        summary.classified, summary.skipped, summary.repaired
    );
    summary
}

enum Outcome {
    Skipped,
    Classified { repaired: bool },
}

fn classify_report(releases: &[Release], report: &mut DefectReport) -> Outcome {
    report.injected = None;
    report.opening = None;
    report.fixing = None;

    let Some(first) = releases.first() else {
        return Outcome::Skipped;
    };
    // Created and resolved before tracking starts: IV, OV and FV would all collapse onto release 0
    if report.created < first.release_date && report.resolved < first.release_date {
        return Outcome::Skipped;
    }

    let opening = releases.iter().position(|r| r.release_date > report.created);
    let fixing = releases.iter().position(|r| r.release_date >= report.resolved);
    let (Some(mut opening), Some(fixing)) = (opening, fixing) else {
        debug!("{} falls outside the tracked releases", report.key);
        return Outcome::Skipped;
    };

    let mut repaired = false;
    if opening > fixing {
        debug!("{} was resolved before it was created", report.key);
        opening = fixing;
        repaired = true;
    }

    let mut injected = None;
    if let Some(&first_affected) = report.affected_release_dates.first() {
        if first_affected > releases[fixing].release_date {
            debug!("{} lists an affected version after its fix, discarding it", report.key);
            report.affected_release_dates.clear();
            repaired = true;
        } else {
            injected = releases.iter().position(|r| r.release_date == first_affected);
        }
    }
    if injected.is_some_and(|iv| iv > opening) {
        debug!("{} lists an affected version after its opening", report.key);
        injected = None;
        repaired = true;
    }
    // Nothing can be injected before the first tracked release
    if injected.is_none() && opening == 0 {
        injected = Some(0);
    }

    report.injected = injected;
    report.opening = Some(opening);
    report.fixing = Some(fixing);
    Outcome::Classified { repaired }
}

/// `FV - ceil(max(FV - OV, 1) * P)`, floored at release 0
pub fn estimate_injected(opening: ReleaseIndex, fixing: ReleaseIndex, proportion: f64) -> ReleaseIndex {
    let span = fixing.saturating_sub(opening).max(1) as f64;
    let estimate = fixing as f64 - (span * proportion).ceil();
    if estimate.is_nan() || estimate < 0.0 {
        0
    } else {
        estimate as ReleaseIndex
    }
}

/// Mean proportion over the classified reports with a known injected version
pub fn cold_start_proportion(timeline: &ReleaseTimeline) -> Option<f64> {
    let proportions: Vec<f64> = timeline
        .reports()
        .iter()
        .filter(|r| r.is_classified())
        .filter_map(DefectReport::proportion)
        .collect();
    if proportions.is_empty() {
        return None;
    }
    Some(proportions.iter().sum::<f64>() / proportions.len() as f64)
}

/// Upper median, matching the element at `len / 2` of the sorted values
pub fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    Some(values[values.len() / 2])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProportionSource {
    /// Fewer than the threshold of complete reports were fixed in the release
    ColdStart,
    Incremental,
}

/// What the estimator used for one release
#[derive(Debug, Clone, PartialEq)]
pub struct ProportionAudit {
    pub release: ReleaseIndex,
    pub valid: usize,
    pub estimated: usize,
    pub proportion: f64,
    pub source: ProportionSource,
}

pub struct ProportionEstimator {
    cold_start: f64,
    threshold: usize,
}

impl ProportionEstimator {
    pub fn new(cold_start: f64) -> Self {
        Self {
            cold_start,
            threshold: DEFAULT_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    /// Fills in the injected version of every classified report, release by release.
    ///
    /// The mean is kept as a running sum and count, so each release only adds
    /// its own reports; estimated reports join the sum as soon as they are set.
    pub fn apply(&self, timeline: &mut ReleaseTimeline) -> Vec<ProportionAudit> {
        let mut sum = 0.0;
        let mut count = 0usize;
        let mut audits = Vec::with_capacity(timeline.len());

        for release in 0..timeline.len() {
            let (mut valid, invalid): (Vec<_>, Vec<_>) = timeline
                .fixed_in(release)
                .partition(|&i| timeline.reports()[i].injected.is_some());
            // Without a fix commit a report can still be estimated, but never anchors the mean
            valid.retain(|&i| timeline.reports()[i].resolution != Resolution::NotFound);

            let current: f64 = valid
                .iter()
                .filter_map(|&i| timeline.reports()[i].proportion())
                .sum();

            let (proportion, source) = if valid.len() < self.threshold {
                (self.cold_start, ProportionSource::ColdStart)
            } else {
                (
                    (sum + current) / (count + valid.len()) as f64,
                    ProportionSource::Incremental,
                )
            };
            sum += current;
            count += valid.len();

            let reports = timeline.reports_mut();
            for &i in &invalid {
                let report = &mut reports[i];
                let (Some(opening), Some(fixing)) = (report.opening, report.fixing) else {
                    continue;
                };
                let injected = estimate_injected(opening, fixing, proportion).min(opening);
                report.injected = Some(injected);
                if let Some(p) = report.proportion() {
                    sum += p;
                    count += 1;
                }
            }

            if source == ProportionSource::ColdStart && !invalid.is_empty() {
                info!(
                    "Release {}: {} complete reports, using cold start {:.3} for {} estimates",
                    release,
                    valid.len(),
                    proportion,
                    invalid.len()
                );
            } else {
                debug!("Release {}: proportion {:.3} ({:?})", release, proportion, source);
            }

            audits.push(ProportionAudit {
                release,
                valid: valid.len(),
                estimated: invalid.len(),
                proportion,
                source,
            });
        }
        audits
    }
}
