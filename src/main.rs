// src/main.rs

use anyhow::{bail, Context, Result};
use clap::Parser;
use git_defects::cli::Args;
use git_defects::config::Config;
use git_defects::pipeline::Pipeline;
use git_defects::tracker::JiraClient;
use std::time::Instant;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let start_time = Instant::now();
    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    if let Some(output) = args.output {
        config.output_dir = output;
    }
    if let Some(repos) = args.repos {
        config.repositories_dir = repos;
    }
    if args.cold_start.is_some() {
        config.proportion.cold_start = args.cold_start;
    }
    config.mining.parallel &= !args.sequential;
    config.keep_clones |= args.keep_clones;
    config.validate()?;

    let projects = config.select_projects(&args.projects)?;
    let tracker = JiraClient::new(
        &config.tracker.base_url,
        config.tracker.page_size,
        config.tracker.timeout(),
    );

    let results = Pipeline::new(&config, &tracker)
        .mode(args.mode)
        .show_progress(!args.quiet)
        .run(&projects)
        .context("Failed to compute the cold-start proportion")?;

    let mut failed = Vec::new();
    for (project, result) in &results {
        match result {
            Ok(summary) => println!(
                "{}: {} releases, {} rows, {} buggy, {} files written",
                project,
                summary.releases,
                summary.rows,
                summary.buggy,
                summary.files.len()
            ),
            Err(e) => {
                eprintln!("{}: {}", project, e);
                failed.push(project.as_str());
            }
        }
    }
    println!("Total time: {:.2?}", start_time.elapsed());

    if !failed.is_empty() {
        bail!("{} of {} projects failed: {}", failed.len(), results.len(), failed.join(", "));
    }
    Ok(())
}
