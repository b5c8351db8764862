// src/config.rs

//! Run configuration loaded from a TOML file.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Where repositories are looked up and cloned
    #[serde(default = "default_repositories_dir")]
    pub repositories_dir: PathBuf,

    #[serde(default)]
    pub keep_clones: bool,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub proportion: ProportionConfig,

    #[serde(default)]
    pub mining: MiningConfig,

    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    pub base_url: String,
    pub page_size: usize,
    pub timeout_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://issues.apache.org/jira".to_string(),
            page_size: 1000,
            timeout_secs: 60,
        }
    }
}

impl TrackerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProportionConfig {
    /// Complete reports a release needs before its own mean is trusted
    pub threshold: usize,
    /// Share of the oldest releases kept
    pub release_fraction: f64,
    /// Tracker keys whose proportions seed the cold start
    pub cold_start_projects: Vec<String>,
    /// Fixed cold start; when set the cold-start projects are not queried
    pub cold_start: Option<f64>,
}

impl Default for ProportionConfig {
    fn default() -> Self {
        Self {
            threshold: crate::proportion::DEFAULT_THRESHOLD,
            release_fraction: 0.5,
            cold_start_projects: Vec::new(),
            cold_start: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MiningConfig {
    pub source_extension: String,
    pub parallel: bool,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            source_extension: ".java".to_string(),
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Directory name under `repositories_dir` and under `output_dir`
    pub name: String,
    pub tracker_key: String,
    /// Clone URL, used when the local directory is missing
    pub repository: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Project name as written in release commit messages
    pub release_phrase: Option<String>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("dataset")
}

fn default_repositories_dir() -> PathBuf {
    PathBuf::from("repos")
}

fn default_branch() -> String {
    "master".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::Invalid(message.to_string()));

        if self.projects.is_empty() {
            return invalid("at least one [[projects]] entry is required");
        }
        let fraction = self.proportion.release_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return invalid("proportion.release_fraction must be in (0, 1]");
        }
        if self.proportion.threshold == 0 {
            return invalid("proportion.threshold must be at least 1");
        }
        match self.proportion.cold_start {
            Some(p) if !p.is_finite() || p < 0.0 => {
                return invalid("proportion.cold_start must be a non-negative number")
            }
            None if self.proportion.cold_start_projects.is_empty() => {
                return invalid("set proportion.cold_start or proportion.cold_start_projects")
            }
            _ => {}
        }
        let extension = &self.mining.source_extension;
        if extension.len() < 2 || !extension.starts_with('.') {
            return invalid("mining.source_extension must look like \".java\"");
        }
        if self.tracker.page_size == 0 {
            return invalid("tracker.page_size must be at least 1");
        }
        Ok(())
    }

    /// Projects selected by name; all of them when `names` is empty
    pub fn select_projects(&self, names: &[String]) -> Result<Vec<&ProjectConfig>, ConfigError> {
        if names.is_empty() {
            return Ok(self.projects.iter().collect());
        }
        names
            .iter()
            .map(|name| {
                self.projects
                    .iter()
                    .find(|p| p.name == *name || p.tracker_key.eq_ignore_ascii_case(name))
                    .ok_or_else(|| ConfigError::Invalid(format!("unknown project {name}")))
            })
            .collect()
    }
}
