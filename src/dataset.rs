// src/dataset.rs

use crate::model::{ClassReleaseEntry, ClassReleaseTable, Metric};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

pub fn header() -> String {
    let mut columns = vec!["Version", "File_Name"];
    columns.extend(Metric::ALL.iter().map(|m| m.name()));
    columns.push("Buggy");
    columns.join(",")
}

/// CSV of the first `releases` releases, ordered by release then class path
pub fn render(table: &ClassReleaseTable, releases: usize) -> String {
    let mut out = header();
    out.push('\n');
    for release in 0..releases.min(table.release_count()) {
        for entry in table.release(release) {
            write_row(&mut out, entry);
        }
    }
    out
}

fn write_row(out: &mut String, entry: &ClassReleaseEntry) {
    let mut cells = vec![(entry.release + 1).to_string(), quote(&entry.class)];
    // A metric lost to a missing object stays empty
    cells.extend(
        Metric::ALL
            .iter()
            .map(|&metric| entry.metric(metric).map(|v| v.to_string()).unwrap_or_default()),
    );
    cells.push(entry.buggy.to_string());
    out.push_str(&cells.join(","));
    out.push('\n');
}

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Writes `<output>/<project>/datasets/<name>.csv`
pub struct DatasetWriter {
    dir: PathBuf,
}

impl DatasetWriter {
    pub fn new(output: &Path, project: &str) -> Self {
        Self {
            dir: output.join(project).join("datasets"),
        }
    }

    pub fn write(&self, name: &str, contents: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{name}.csv"));
        fs::write(&path, contents)?;
        info!("Wrote {}", path.display());
        Ok(path)
    }
}
