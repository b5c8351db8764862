// src/labeler.rs

use crate::git::{RepositoryAccess, RepositoryError};
use crate::model::{ClassReleaseTable, Commit, ReleaseIndex, ReleaseTimeline};
use tracing::debug;

/// Paths changed by the fix of one report, with the releases it was live in
#[derive(Debug, Clone)]
struct FixFootprint {
    injected: ReleaseIndex,
    fixing: ReleaseIndex,
    paths: Vec<String>,
}

/// Marks classes buggy in every release between a defect's injection and its fix
#[derive(Debug, Clone)]
pub struct BuggyLabeler {
    footprints: Vec<FixFootprint>,
}

impl BuggyLabeler {
    /// Reads the modified paths of each fix commit once, up front
    pub fn new(
        repo: &dyn RepositoryAccess,
        timeline: &ReleaseTimeline,
        commits: &[Commit],
    ) -> Result<Self, RepositoryError> {
        let mut footprints = Vec::new();
        for report in timeline.reports() {
            let (Some(injected), Some(fixing)) = (report.injected, report.fixing) else {
                continue;
            };
            let Some(commit) = report.fix_commit().and_then(|c| commits.get(c)) else {
                continue;
            };
            let paths = repo.modified_paths(commit)?;
            debug!("{} fixed by {} touching {} files", report.key, commit.hash, paths.len());
            footprints.push(FixFootprint {
                injected,
                fixing,
                paths,
            });
        }
        Ok(Self { footprints })
    }

    /// Applies the reports fixed in releases `<= up_to`; returns how many entries were marked.
    ///
    /// The fixing release itself is not buggy. Classes missing from a release are skipped.
    pub fn label(&self, table: &mut ClassReleaseTable, up_to: ReleaseIndex) -> usize {
        let mut marked = 0;
        for footprint in self.footprints.iter().filter(|f| f.fixing <= up_to) {
            for release in footprint.injected..footprint.fixing {
                for path in &footprint.paths {
                    if let Some(entry) = table.get_mut(release, path) {
                        if !entry.buggy {
                            marked += 1;
                        }
                        entry.mark_buggy();
                    }
                }
            }
        }
        marked
    }
}
