pub mod executor;
pub mod expand;
pub mod jobs;

pub use executor::{BatchReport, JobOutcome, ResumableExecutor};
pub use expand::{config_token, expand, grid_product, load_sweep, ExpandedConfig, OverrideSet, Sweep};
pub use jobs::{build_jobs, Job};

use expl_core::{Backend, ExplError};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub num_trials: usize,
    pub workers: usize,
    pub out_dir: PathBuf,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            num_trials: 1,
            workers: 1,
            out_dir: PathBuf::from("log"),
        }
    }
}

/// Resolves every sweep file into its job list without touching the output
/// directory. Any config error aborts before a single job is built.
pub fn plan_experiments(
    sweep_files: &[PathBuf],
    opts: &RunOptions,
    backend: &dyn Backend,
) -> Result<Vec<Job>, ExplError> {
    let mut jobs = Vec::new();
    let mut seen: BTreeSet<PathBuf> = BTreeSet::new();
    for path in sweep_files {
        let sweep = load_sweep(path)?;
        let expanded = expand(&sweep.base, &sweep.override_sets)?;
        for exp in &expanded {
            backend
                .validate(&exp.config)
                .map_err(|e| ExplError::config(format!("{}/{}: {:#}", sweep.name, exp.token, e)))?;
        }
        let built = build_jobs(&opts.out_dir, &sweep.name, &expanded, opts.num_trials)?;
        info!(
            sweep = %sweep.name,
            configs = expanded.len(),
            jobs = built.len(),
            "planned sweep"
        );
        for job in built {
            if !seen.insert(job.dir.clone()) {
                return Err(ExplError::config(format!(
                    "{} is produced by more than one sweep file",
                    job.dir.display()
                )));
            }
            jobs.push(job);
        }
    }
    Ok(jobs)
}

pub fn run_experiments(
    sweep_files: &[PathBuf],
    opts: &RunOptions,
    backend: &dyn Backend,
) -> Result<BatchReport, ExplError> {
    let jobs = plan_experiments(sweep_files, opts, backend)?;
    ResumableExecutor::new(backend, opts.workers).run(&jobs)
}
