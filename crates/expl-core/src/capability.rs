use crate::config::RunConfig;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    Continuous(Vec<f64>),
    Discrete(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionSpace {
    Continuous { dim: usize },
    Discrete { n: usize },
}

impl ActionSpace {
    pub fn output_size(&self) -> usize {
        match *self {
            ActionSpace::Continuous { dim } => dim,
            ActionSpace::Discrete { n } => n,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    pub at_goal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub observation: Vec<f64>,
    pub reward: f64,
    pub done: bool,
    pub info: StepInfo,
}

pub trait Environment {
    fn reset(&mut self) -> Vec<f64>;
    fn step(&mut self, action: &Action) -> Result<Step>;
    fn action_space(&self) -> ActionSpace;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionMode {
    Native,
    Discretized,
}

pub trait DecisionAgent {
    fn act(&self, observation: &[f64], mode: DecisionMode) -> Result<Action>;
    fn bottleneck(&self, observation: &[f64], mode: DecisionMode) -> Result<Vec<f64>>;
    fn bottleneck_size(&self) -> usize;
    fn channel_output(&self, channel: usize) -> Result<Vec<f64>>;
    fn save_state(&self) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalSnapshot {
    pub timesteps: u64,
    pub episodes: usize,
    pub mean_reward: f64,
    pub mean_length: f64,
    pub success_rate: f64,
}

pub trait TrainingHooks {
    fn on_evaluation(&mut self, snapshot: &EvalSnapshot, agent: &dyn DecisionAgent) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct TrainContext {
    pub job_dir: PathBuf,
    pub trial: usize,
    pub seed: u64,
}

/// The set of external capabilities a sweep runs against.
pub trait Backend: Send + Sync {
    fn validate(&self, _config: &RunConfig) -> Result<()> {
        Ok(())
    }

    fn make_env(&self, config: &RunConfig, seed: u64, is_eval: bool)
        -> Result<Box<dyn Environment>>;

    fn train(
        &self,
        config: &RunConfig,
        ctx: &TrainContext,
        eval_env: Box<dyn Environment>,
        hooks: &mut dyn TrainingHooks,
    ) -> Result<Box<dyn DecisionAgent>>;

    fn load_agent(&self, config: &RunConfig, state: &[u8]) -> Result<Box<dyn DecisionAgent>>;
}
