// src/lib.rs

//! Builds per-class, per-release defect datasets from a git history and an issue tracker.

pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod git;
pub mod labeler;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod proportion;
pub mod resolver;
pub mod tracker;

pub use error::{Error, Result};
