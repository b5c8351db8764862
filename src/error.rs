// src/error.rs

use crate::config::ConfigError;
use crate::git::RepositoryError;
use crate::resolver::ResolutionNotFound;
use crate::tracker::TrackerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Resolution(#[from] ResolutionNotFound),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("project {project} has no usable releases")]
    NoReleases { project: String },

    #[error("none of the cold-start projects ({projects}) has a complete defect report")]
    NoColdStart { projects: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
