//! Perturbation hill-climbing over the policy parameters.
//!
//! Each round draws one Gaussian perturbation of the incumbent and keeps it
//! when it does at least as well on a shared set of training episodes.
//! Both evaluations count towards the `total_timesteps` budget.

use crate::nav::{NavEnv, OBS_DIM};
use crate::policy::BottleneckPolicy;
use crate::standard_normal;
use anyhow::Result;
use expl_core::{
    DecisionAgent, DecisionMode, EnvSettings, Environment, EvalSnapshot, PolicySettings,
    RunConfig, TrainContext, TrainSettings, TrainingHooks,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

pub struct HillClimbTrainer {
    env: EnvSettings,
    policy: PolicySettings,
    train: TrainSettings,
}

impl HillClimbTrainer {
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        Ok(Self {
            env: config.settings()?,
            policy: config.settings()?,
            train: config.settings()?,
        })
    }

    pub fn train(
        &self,
        ctx: &TrainContext,
        mut eval_env: Box<dyn Environment>,
        hooks: &mut dyn TrainingHooks,
    ) -> Result<BottleneckPolicy> {
        let mut rng = ChaCha8Rng::seed_from_u64(ctx.seed);
        let space = NavEnv::new(self.env.clone(), ctx.seed, false)?.action_space();
        let mut policy = BottleneckPolicy::init(&self.policy, OBS_DIM, space, &mut rng)?;

        let eval_freq = self.train.eval_freq.max(1);
        let mut used: u64 = 0;
        let mut next_eval = eval_freq;
        let mut evaluated_at = None;
        while used < self.train.total_timesteps {
            let round_seed: u64 = rng.gen();
            let candidate = perturbed(&policy, &mut rng, self.train.perturbation_scale);
            let (incumbent_return, a) = self.rollout(&policy, round_seed)?;
            let (candidate_return, b) = self.rollout(&candidate, round_seed)?;
            used += a + b;
            if candidate_return >= incumbent_return {
                policy = candidate;
            }
            if used >= next_eval {
                let snapshot = evaluate(&policy, eval_env.as_mut(), self.train.eval_episodes, used)?;
                debug!(
                    job = %ctx.job_dir.display(),
                    timesteps = used,
                    success_rate = snapshot.success_rate,
                    "evaluation"
                );
                hooks.on_evaluation(&snapshot, &policy)?;
                evaluated_at = Some(used);
                while next_eval <= used {
                    next_eval += eval_freq;
                }
                if snapshot.success_rate >= self.train.reward_threshold {
                    info!(
                        job = %ctx.job_dir.display(),
                        timesteps = used,
                        success_rate = snapshot.success_rate,
                        "reward threshold reached, stopping early"
                    );
                    break;
                }
            }
        }
        if evaluated_at != Some(used) {
            let snapshot = evaluate(&policy, eval_env.as_mut(), self.train.eval_episodes, used)?;
            hooks.on_evaluation(&snapshot, &policy)?;
        }
        Ok(policy)
    }

    /// Mean return over whole episodes until at least `n_steps` environment
    /// steps were taken. Returns the return and the steps used.
    fn rollout(&self, policy: &BottleneckPolicy, seed: u64) -> Result<(f64, u64)> {
        let mut env = NavEnv::new(self.env.clone(), seed, false)?;
        let budget = self.train.n_steps.max(1);
        let mut steps = 0;
        let mut total = 0.0;
        let mut episodes = 0;
        while steps < budget {
            let mut obs = env.reset();
            loop {
                let step = env.step(&policy.act(&obs, DecisionMode::Native)?)?;
                steps += 1;
                total += step.reward;
                obs = step.observation;
                if step.done {
                    break;
                }
            }
            episodes += 1;
        }
        Ok((total / episodes as f64, steps))
    }
}

fn perturbed<R: Rng>(policy: &BottleneckPolicy, rng: &mut R, scale: f64) -> BottleneckPolicy {
    let mut out = policy.clone();
    for p in out.params_mut() {
        *p += scale * standard_normal(&mut *rng);
    }
    out
}

pub fn evaluate(
    agent: &dyn DecisionAgent,
    env: &mut dyn Environment,
    episodes: usize,
    timesteps: u64,
) -> Result<EvalSnapshot> {
    let episodes = episodes.max(1);
    let mut total_reward = 0.0;
    let mut total_length = 0u64;
    let mut successes = 0usize;
    for _ in 0..episodes {
        let mut obs = env.reset();
        loop {
            let step = env.step(&agent.act(&obs, DecisionMode::Native)?)?;
            total_reward += step.reward;
            total_length += 1;
            obs = step.observation;
            if step.done {
                if step.info.at_goal {
                    successes += 1;
                }
                break;
            }
        }
    }
    Ok(EvalSnapshot {
        timesteps,
        episodes,
        mean_reward: total_reward / episodes as f64,
        mean_length: total_length as f64 / episodes as f64,
        success_rate: successes as f64 / episodes as f64,
    })
}
