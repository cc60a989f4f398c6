//! Reference episode lengths for an agent restricted to `n` fixed directions.
//!
//! The codebook policy always moves along the codebook vector nearest to the
//! observed goal direction; the codebook is rotated randomly every episode.

use anyhow::{anyhow, Context, Result};
use expl_core::{Action, Backend, RunConfig};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::f64::consts::PI;
use tracing::info;

pub const CODEBOOK_SIZES: &[usize] = &[3, 4, 5, 6, 7, 8, 12, 16, 32];
pub const DEFAULT_EPISODES: usize = 1000;
pub const STEP_CAP: u64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaselineRow {
    pub n: usize,
    pub mean_steps: f64,
    /// Population standard deviation over episodes divided by sqrt(episodes).
    pub stderr: f64,
}

impl BaselineRow {
    pub fn line(&self) -> String {
        format!("{:>2}: {:.1} +- {:.2}", self.n, self.mean_steps, 2.0 * self.stderr)
    }
}

fn codebook(n: usize, offset: f64) -> Vec<[f64; 2]> {
    let sep = 2.0 * PI / n as f64;
    (0..n)
        .map(|i| {
            let a = offset + i as f64 * sep;
            [a.cos(), a.sin()]
        })
        .collect()
}

fn nearest(book: &[[f64; 2]], obs: &[f64]) -> Result<[f64; 2]> {
    if obs.len() != 2 {
        return Err(anyhow!("codebook policy needs 2-d observations, got {}", obs.len()));
    }
    let dist = |v: &[f64; 2]| (obs[0] - v[0]).powi(2) + (obs[1] - v[1]).powi(2);
    book.iter()
        .min_by(|a, b| dist(*a).total_cmp(&dist(*b)))
        .copied()
        .ok_or_else(|| anyhow!("empty codebook"))
}

pub fn codebook_baseline(
    backend: &dyn Backend,
    config: &RunConfig,
    sizes: &[usize],
    episodes: usize,
    seed: u64,
) -> Result<Vec<BaselineRow>> {
    let episodes = episodes.max(1);
    let mut env = backend
        .make_env(config, seed, true)
        .context("build evaluation environment")?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut rows = Vec::with_capacity(sizes.len());
    for &n in sizes.iter().filter(|n| **n > 0) {
        let sep = 2.0 * PI / n as f64;
        let mut lengths = Vec::with_capacity(episodes);
        for _ in 0..episodes {
            let book = codebook(n, rng.gen_range(0.0..sep));
            let mut obs = env.reset();
            let mut steps = 0u64;
            while steps < STEP_CAP {
                let v = nearest(&book, &obs)?;
                let step = env.step(&Action::Continuous(v.to_vec()))?;
                steps += 1;
                obs = step.observation;
                if step.done {
                    break;
                }
            }
            lengths.push(steps as f64);
        }
        let count = lengths.len() as f64;
        let mean = lengths.iter().sum::<f64>() / count;
        let var = lengths.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / count;
        let row = BaselineRow {
            n,
            mean_steps: mean,
            stderr: var.sqrt() / count.sqrt(),
        };
        info!(n, mean_steps = row.mean_steps, "codebook baseline");
        rows.push(row);
    }
    Ok(rows)
}
