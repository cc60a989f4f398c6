use crate::entropy::{channel_usage, entropy_stats, EntropyStats};
use anyhow::{Context, Result};
use expl_core::{
    upgrade_config, Backend, DecisionMode, ExplError, RunConfig, CONFIG_JSON, MODEL_STATE,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_EPISODES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalVariant {
    Discretized,
    Continuous,
}

impl EvalVariant {
    pub const ALL: [EvalVariant; 2] = [EvalVariant::Discretized, EvalVariant::Continuous];

    pub fn name(&self) -> &'static str {
        match self {
            EvalVariant::Discretized => "discretized",
            EvalVariant::Continuous => "continuous",
        }
    }

    pub fn discretize(&self) -> bool {
        matches!(self, EvalVariant::Discretized)
    }

    pub fn mode(&self) -> DecisionMode {
        match self {
            EvalVariant::Discretized => DecisionMode::Discretized,
            EvalVariant::Continuous => DecisionMode::Native,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    pub episodes: usize,
    pub seed: u64,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            episodes: DEFAULT_EPISODES,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub steps: f64,
    pub success_rate: f64,
    pub episodes: usize,
    #[serde(flatten)]
    pub entropy: EntropyStats,
    pub usages: Vec<f64>,
    pub vectors: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub id: Uuid,
    pub artifact: PathBuf,
    pub variant: EvalVariant,
    pub config: RunConfig,
    pub metrics: Metrics,
}

impl MetricRecord {
    pub fn to_row(&self) -> Result<Map<String, Value>, ExplError> {
        let mut row: Map<String, Value> = self
            .config
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        row.insert("uuid".to_string(), json!(self.id.to_string()));
        row.insert("artifact".to_string(), json!(self.artifact.display().to_string()));
        row.insert("variant".to_string(), json!(self.variant.name()));
        row.insert("discretize".to_string(), json!(self.variant.discretize()));
        if let Value::Object(metrics) = serde_json::to_value(&self.metrics)? {
            row.extend(metrics);
        }
        Ok(row)
    }
}

fn read_required(artifact: &Path, file: &str) -> Result<Vec<u8>> {
    let path = artifact.join(file);
    if !path.is_file() {
        return Err(ExplError::Artifact {
            path: artifact.to_path_buf(),
            file: file.to_string(),
        }
        .into());
    }
    fs::read(&path).with_context(|| format!("read {}", path.display()))
}

/// Loads the artifact's config, upgraded to the current schema. The file on
/// disk is left as it is.
pub fn load_artifact_config(artifact: &Path) -> Result<RunConfig> {
    let raw: Value = serde_json::from_slice(&read_required(artifact, CONFIG_JSON)?)
        .with_context(|| format!("parse {}", artifact.join(CONFIG_JSON).display()))?;
    let upgraded = upgrade_config(raw)?;
    if !upgraded.backfilled.is_empty() {
        debug!(
            artifact = %artifact.display(),
            fields = ?upgraded.backfilled,
            "backfilled fields from an older config"
        );
    }
    Ok(upgraded.config)
}

pub fn extract(
    backend: &dyn Backend,
    artifact: &Path,
    variant: EvalVariant,
    opts: &ExtractOptions,
) -> Result<MetricRecord> {
    let config = load_artifact_config(artifact)?;
    let state = read_required(artifact, MODEL_STATE)?;
    let agent = backend.load_agent(&config, &state).context("load agent")?;
    let mut env = backend
        .make_env(&config, opts.seed, true)
        .context("build evaluation environment")?;
    let mode = variant.mode();
    let channels = agent.bottleneck_size();

    let episodes = opts.episodes.max(1);
    let mut total_steps = 0u64;
    let mut successes = 0usize;
    let mut activations = Vec::new();
    for _ in 0..episodes {
        let mut obs = env.reset();
        loop {
            activations.push(agent.bottleneck(&obs, mode)?);
            let step = env.step(&agent.act(&obs, mode)?)?;
            total_steps += 1;
            obs = step.observation;
            if step.done {
                if step.info.at_goal {
                    successes += 1;
                }
                break;
            }
        }
    }
    let vectors = (0..channels)
        .map(|c| agent.channel_output(c))
        .collect::<Result<Vec<_>>>()?;

    Ok(MetricRecord {
        id: Uuid::new_v4(),
        artifact: artifact.to_path_buf(),
        variant,
        metrics: Metrics {
            steps: total_steps as f64 / episodes as f64,
            success_rate: successes as f64 / episodes as f64,
            episodes,
            entropy: entropy_stats(&activations, channels),
            usages: channel_usage(&activations, channels),
            vectors,
        },
        config,
    })
}
