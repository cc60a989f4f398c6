//! Goal-reaching navigation on the plane.
//!
//! The agent starts somewhere inside a disc of radius `env_lsize` and must
//! walk to within [`GOAL_RADIUS`] of the origin. Each step moves it by at
//! most one unit.

use crate::standard_normal;
use anyhow::{anyhow, Result};
use expl_core::{
    Action, ActionSpace, EnvSettings, Environment, ObsType, RewardStructure, Step, StepInfo,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::f64::consts::PI;

pub const GOAL_RADIUS: f64 = 1.0;
/// Both observation types are 2-d.
pub const OBS_DIM: usize = 2;

pub struct NavEnv {
    settings: EnvSettings,
    is_eval: bool,
    rng: ChaCha8Rng,
    pos: [f64; 2],
    steps: u64,
    max_steps: u64,
}

impl NavEnv {
    pub fn new(settings: EnvSettings, seed: u64, is_eval: bool) -> Result<Self> {
        if settings.pixel_space {
            return Err(anyhow!("pixel observations are not supported by the navigation environment"));
        }
        if settings.env_lsize <= GOAL_RADIUS {
            return Err(anyhow!(
                "env_lsize must exceed the goal radius ({}), got {}",
                GOAL_RADIUS,
                settings.env_lsize
            ));
        }
        if settings.discrete_action && settings.action_scale == 0 {
            return Err(anyhow!("discrete actions need action_scale >= 1"));
        }
        let max_steps = (settings.max_step_scale * settings.env_lsize).ceil().max(1.0) as u64;
        Ok(Self {
            settings,
            is_eval,
            rng: ChaCha8Rng::seed_from_u64(seed),
            pos: [0.0, 0.0],
            steps: 0,
            max_steps,
        })
    }

    pub fn max_steps(&self) -> u64 {
        self.max_steps
    }

    pub fn is_eval(&self) -> bool {
        self.is_eval
    }

    fn distance(&self) -> f64 {
        (self.pos[0] * self.pos[0] + self.pos[1] * self.pos[1]).sqrt()
    }

    fn observe(&self) -> Vec<f64> {
        let d = self.distance();
        match self.settings.obs_type {
            ObsType::Direction if d > 0.0 => vec![-self.pos[0] / d, -self.pos[1] / d],
            ObsType::Direction => vec![0.0, 0.0],
            ObsType::Vector => vec![
                -self.pos[0] / self.settings.env_lsize,
                -self.pos[1] / self.settings.env_lsize,
            ],
        }
    }

    fn displacement(&self, action: &Action) -> Result<[f64; 2]> {
        match action {
            Action::Continuous(v) => {
                if v.len() != 2 {
                    return Err(anyhow!("expected a 2-d continuous action, got {} values", v.len()));
                }
                let norm = (v[0] * v[0] + v[1] * v[1]).sqrt();
                let scale = if norm > 1.0 { 1.0 / norm } else { 1.0 };
                Ok([v[0] * scale, v[1] * scale])
            }
            Action::Discrete(i) => {
                let n = self.settings.action_scale;
                if *i >= n {
                    return Err(anyhow!("discrete action {} out of range 0..{}", i, n));
                }
                let angle = 2.0 * PI * (*i as f64) / (n as f64);
                Ok([angle.cos(), angle.sin()])
            }
        }
    }
}

impl Environment for NavEnv {
    fn reset(&mut self) -> Vec<f64> {
        let lsize = self.settings.env_lsize;
        let r = loop {
            let u: f64 = self.rng.gen();
            let r = lsize * u.sqrt();
            if r > GOAL_RADIUS {
                break r;
            }
        };
        let theta = self.rng.gen_range(0.0..2.0 * PI);
        self.pos = [r * theta.cos(), r * theta.sin()];
        self.steps = 0;
        self.observe()
    }

    fn step(&mut self, action: &Action) -> Result<Step> {
        let mut d = self.displacement(action)?;
        if self.settings.action_noise > 0.0 {
            d[0] += self.settings.action_noise * standard_normal(&mut self.rng);
            d[1] += self.settings.action_noise * standard_normal(&mut self.rng);
        }
        let before = self.distance();
        self.pos[0] += d[0];
        self.pos[1] += d[1];
        self.steps += 1;
        let after = self.distance();
        let at_goal = after < GOAL_RADIUS;
        let done = at_goal || self.steps >= self.max_steps || self.settings.single_step;

        let goal_bonus = if at_goal { 1.0 } else { 0.0 };
        let step_cost = 1.0 / self.max_steps as f64;
        let reward = match self.settings.reward_structure {
            RewardStructure::Proximity => (before - after) / self.settings.env_lsize + goal_bonus,
            RewardStructure::Constant => goal_bonus - step_cost,
            RewardStructure::None => goal_bonus,
            RewardStructure::ConstantOnly => -step_cost,
        };
        Ok(Step {
            observation: self.observe(),
            reward,
            done,
            info: StepInfo { at_goal },
        })
    }

    fn action_space(&self) -> ActionSpace {
        if self.settings.discrete_action {
            ActionSpace::Discrete {
                n: self.settings.action_scale,
            }
        } else {
            ActionSpace::Continuous { dim: 2 }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expl_core::RunConfig;

    fn settings() -> EnvSettings {
        RunConfig::template().settings().unwrap()
    }

    #[test]
    fn walking_towards_the_goal_terminates_with_success() {
        let mut env = NavEnv::new(settings(), 3, true).unwrap();
        let mut obs = env.reset();
        let mut steps = 0;
        loop {
            let step = env.step(&Action::Continuous(obs.clone())).unwrap();
            steps += 1;
            obs = step.observation;
            if step.done {
                assert!(step.info.at_goal);
                break;
            }
        }
        assert!(steps as f64 <= settings().env_lsize.ceil());
    }

    #[test]
    fn episodes_are_capped_by_max_steps() {
        let mut env = NavEnv::new(settings(), 5, false).unwrap();
        env.reset();
        let mut steps = 0;
        loop {
            // stand still
            let step = env.step(&Action::Continuous(vec![0.0, 0.0])).unwrap();
            steps += 1;
            if step.done {
                assert!(!step.info.at_goal);
                break;
            }
        }
        assert_eq!(steps, env.max_steps());
    }

    #[test]
    fn single_step_episodes_end_after_one_step() {
        let mut s = settings();
        s.single_step = true;
        let mut env = NavEnv::new(s, 1, false).unwrap();
        env.reset();
        assert!(env.step(&Action::Continuous(vec![1.0, 0.0])).unwrap().done);
    }

    #[test]
    fn discrete_actions_are_range_checked() {
        let mut s = settings();
        s.discrete_action = true;
        s.action_scale = 4;
        let mut env = NavEnv::new(s, 1, false).unwrap();
        assert_eq!(env.action_space(), ActionSpace::Discrete { n: 4 });
        env.reset();
        assert!(env.step(&Action::Discrete(3)).is_ok());
        assert!(env.step(&Action::Discrete(4)).is_err());
    }

    #[test]
    fn same_seed_gives_same_start() {
        let mut a = NavEnv::new(settings(), 11, true).unwrap();
        let mut b = NavEnv::new(settings(), 11, true).unwrap();
        assert_eq!(a.reset(), b.reset());
    }

    #[test]
    fn pixel_space_is_rejected() {
        let mut s = settings();
        s.pixel_space = true;
        assert!(NavEnv::new(s, 0, false).is_err());
    }
}
