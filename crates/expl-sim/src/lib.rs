//! Reference implementations of the capabilities a sweep runs against: a
//! planar goal-reaching environment, a bottleneck policy and a hill-climbing
//! trainer for it.

pub mod nav;
pub mod policy;
pub mod trainer;

use anyhow::{anyhow, Result};
use expl_core::{
    Backend, DecisionAgent, EnvSettings, Environment, PolicySettings, RunConfig, TrainContext,
    TrainSettings, TrainingHooks,
};
use nav::{NavEnv, OBS_DIM};
use policy::BottleneckPolicy;
use rand::Rng;
use std::f64::consts::PI;
use trainer::HillClimbTrainer;

// Box-Muller
pub(crate) fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimBackend;

impl Backend for SimBackend {
    fn validate(&self, config: &RunConfig) -> Result<()> {
        let env: EnvSettings = config.settings()?;
        NavEnv::new(env, 0, false)?;
        let policy: PolicySettings = config.settings()?;
        if policy.fe_out_size == 0 {
            return Err(anyhow!("fe_out_size must be at least 1"));
        }
        if policy.bottleneck_temperature <= 0.0 {
            return Err(anyhow!("bottleneck_temperature must be positive"));
        }
        let train: TrainSettings = config.settings()?;
        if train.eval_episodes == 0 {
            return Err(anyhow!("eval_episodes must be at least 1"));
        }
        Ok(())
    }

    fn make_env(
        &self,
        config: &RunConfig,
        seed: u64,
        is_eval: bool,
    ) -> Result<Box<dyn Environment>> {
        Ok(Box::new(NavEnv::new(config.settings()?, seed, is_eval)?))
    }

    fn train(
        &self,
        config: &RunConfig,
        ctx: &TrainContext,
        eval_env: Box<dyn Environment>,
        hooks: &mut dyn TrainingHooks,
    ) -> Result<Box<dyn DecisionAgent>> {
        let trainer = HillClimbTrainer::from_config(config)?;
        Ok(Box::new(trainer.train(ctx, eval_env, hooks)?))
    }

    fn load_agent(&self, config: &RunConfig, state: &[u8]) -> Result<Box<dyn DecisionAgent>> {
        let settings: PolicySettings = config.settings()?;
        let space = NavEnv::new(config.settings()?, 0, true)?.action_space();
        Ok(Box::new(BottleneckPolicy::from_state(
            state, &settings, OBS_DIM, space,
        )?))
    }
}
