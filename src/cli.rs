// src/cli.rs

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "git-defects.toml")]
    pub config: PathBuf,

    /// Only process these projects (name or tracker key); repeatable
    #[arg(short, long = "project")]
    pub projects: Vec<String>,

    /// Directory to write the datasets to, overrides `output_dir`
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Directory holding local clones, overrides `repositories_dir`
    #[arg(long)]
    pub repos: Option<PathBuf>,

    /// Which datasets to write
    #[arg(long, value_enum, default_value_t = OutputMode::Both)]
    pub mode: OutputMode,

    /// Fixed cold-start proportion, skips the cold-start projects
    #[arg(long)]
    pub cold_start: Option<f64>,

    /// Mine classes one at a time
    #[arg(long)]
    pub sequential: bool,

    /// Keep repositories cloned during the run
    #[arg(long)]
    pub keep_clones: bool,

    /// Hide progress bars
    #[arg(short, long)]
    pub quiet: bool,

    /// Log debug output (RUST_LOG takes precedence)
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(clap::ValueEnum, Clone, Debug, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// One dataset per release count, labeled with the fixes known at that point
    WalkForward,
    /// A single dataset labeled with every fix
    Oracle,
    /// Walk-forward datasets followed by the oracle
    Both,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["git-defects"]).unwrap();
        assert_eq!(args.config, PathBuf::from("git-defects.toml"));
        assert_eq!(args.mode, OutputMode::Both);
        assert!(args.projects.is_empty());
        assert!(!args.sequential);
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "git-defects",
            "--config",
            "run.toml",
            "-p",
            "bookkeeper",
            "--project",
            "avro",
            "--mode",
            "walk-forward",
            "--cold-start",
            "1.75",
            "--sequential",
            "--quiet",
        ])
        .unwrap();
        assert_eq!(args.projects, vec!["bookkeeper", "avro"]);
        assert_eq!(args.mode, OutputMode::WalkForward);
        assert_eq!(args.cold_start, Some(1.75));
        assert!(args.sequential && args.quiet);
    }
}
