use crate::expand::ExpandedConfig;
use expl_core::{ExplError, RunConfig, COMPLETED_MARKER};
use std::path::{Path, PathBuf};

/// One trial of one configuration, addressed by its output directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub dir: PathBuf,
    pub trial: usize,
    pub config: RunConfig,
}

impl Job {
    pub fn marker_path(&self) -> PathBuf {
        self.dir.join(COMPLETED_MARKER)
    }

    pub fn is_completed(&self) -> bool {
        self.marker_path().is_file()
    }
}

/// Emits `num_trials` jobs per config at
/// `<out_dir>/<config_name>/<token>/run-<i>`.
pub fn build_jobs(
    out_dir: &Path,
    config_name: &str,
    expanded: &[ExpandedConfig],
    num_trials: usize,
) -> Result<Vec<Job>, ExplError> {
    if num_trials == 0 {
        return Err(ExplError::config("trial count must be at least 1"));
    }
    let mut jobs = Vec::with_capacity(expanded.len() * num_trials);
    for exp in expanded {
        let config_dir = out_dir.join(config_name).join(&exp.token);
        for trial in 0..num_trials {
            jobs.push(Job {
                dir: config_dir.join(format!("run-{}", trial)),
                trial,
                config: exp.config.clone(),
            });
        }
    }
    Ok(jobs)
}
