//! Feed-forward policy with a categorical bottleneck between an encoder
//! (`pre`) and a decoder (`post` + `head`).

use anyhow::{anyhow, Context, Result};
use expl_core::{
    Action, ActionSpace, Activation, BottleneckKind, DecisionAgent, DecisionMode, PolicySettings,
};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dense {
    /// Row-major, `outputs x inputs`.
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

impl Dense {
    pub fn init<R: Rng>(inputs: usize, outputs: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (inputs.max(1) as f64).sqrt();
        let weights = (0..outputs)
            .map(|_| (0..inputs).map(|_| rng.gen_range(-bound..=bound)).collect())
            .collect();
        Self {
            weights,
            bias: vec![0.0; outputs],
        }
    }

    pub fn inputs(&self) -> usize {
        self.weights.first().map(|r| r.len()).unwrap_or(0)
    }

    pub fn outputs(&self) -> usize {
        self.bias.len()
    }

    fn forward(&self, x: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(x).map(|(w, v)| w * v).sum::<f64>() + b)
            .collect()
    }

    fn params_mut(&mut self) -> impl Iterator<Item = &mut f64> {
        self.weights
            .iter_mut()
            .flat_map(|r| r.iter_mut())
            .chain(self.bias.iter_mut())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BottleneckPolicy {
    pub pre: Vec<Dense>,
    pub post: Vec<Dense>,
    pub head: Dense,
    pub bottleneck: BottleneckKind,
    pub temperature: f64,
    pub activation: Activation,
    pub action_space: ActionSpace,
}

impl BottleneckPolicy {
    pub fn init<R: Rng>(
        settings: &PolicySettings,
        obs_dim: usize,
        action_space: ActionSpace,
        rng: &mut R,
    ) -> Result<Self> {
        if settings.fe_out_size == 0 {
            return Err(anyhow!("fe_out_size must be at least 1"));
        }
        if settings.bottleneck_temperature <= 0.0 {
            return Err(anyhow!("bottleneck_temperature must be positive"));
        }
        let mut widths = vec![obs_dim];
        widths.extend(&settings.pre_arch);
        widths.push(settings.fe_out_size);
        let pre = widths
            .windows(2)
            .map(|w| Dense::init(w[0], w[1], &mut *rng))
            .collect();

        let mut widths = vec![settings.fe_out_size];
        widths.extend(&settings.post_arch);
        let post: Vec<Dense> = widths
            .windows(2)
            .map(|w| Dense::init(w[0], w[1], &mut *rng))
            .collect();
        let last = *widths.last().unwrap_or(&settings.fe_out_size);
        let head = Dense::init(last, action_space.output_size(), &mut *rng);

        Ok(Self {
            pre,
            post,
            head,
            bottleneck: settings.bottleneck,
            temperature: settings.bottleneck_temperature,
            activation: settings.policy_activation,
            action_space,
        })
    }

    /// Restores a saved policy and checks it matches the configured shape.
    pub fn from_state(
        state: &[u8],
        settings: &PolicySettings,
        obs_dim: usize,
        action_space: ActionSpace,
    ) -> Result<Self> {
        let policy: Self = serde_json::from_slice(state).context("decode policy state")?;
        if policy.bottleneck_size() != settings.fe_out_size {
            return Err(anyhow!(
                "saved bottleneck has {} channels, config says {}",
                policy.bottleneck_size(),
                settings.fe_out_size
            ));
        }
        if policy.pre.first().map(|l| l.inputs()) != Some(obs_dim) {
            return Err(anyhow!("saved policy does not accept {}-d observations", obs_dim));
        }
        if policy.action_space != action_space {
            return Err(anyhow!(
                "saved policy acts in {:?}, environment expects {:?}",
                policy.action_space,
                action_space
            ));
        }
        Ok(policy)
    }

    fn activate(&self, x: &mut [f64]) {
        for v in x.iter_mut() {
            *v = match self.activation {
                Activation::Tanh => v.tanh(),
                Activation::Relu => v.max(0.0),
            };
        }
    }

    fn run_stack(&self, layers: &[Dense], mut x: Vec<f64>, activate_last: bool) -> Vec<f64> {
        for (i, layer) in layers.iter().enumerate() {
            x = layer.forward(&x);
            if activate_last || i + 1 < layers.len() {
                self.activate(&mut x);
            }
        }
        x
    }

    fn logits(&self, observation: &[f64]) -> Vec<f64> {
        self.run_stack(&self.pre, observation.to_vec(), false)
    }

    fn squash(&self, logits: &[f64], mode: DecisionMode) -> Vec<f64> {
        if mode == DecisionMode::Discretized {
            return one_hot(argmax(logits), logits.len());
        }
        match self.bottleneck {
            BottleneckKind::Gsm | BottleneckKind::Softmax => softmax(logits, self.temperature),
            BottleneckKind::None => logits.to_vec(),
        }
    }

    fn decode(&self, z: Vec<f64>) -> Vec<f64> {
        let hidden = self.run_stack(&self.post, z, true);
        self.head.forward(&hidden)
    }

    pub fn params_mut(&mut self) -> impl Iterator<Item = &mut f64> {
        self.pre
            .iter_mut()
            .chain(self.post.iter_mut())
            .chain(std::iter::once(&mut self.head))
            .flat_map(|l| l.params_mut())
    }
}

impl DecisionAgent for BottleneckPolicy {
    fn act(&self, observation: &[f64], mode: DecisionMode) -> Result<Action> {
        let z = self.bottleneck(observation, mode)?;
        let out = self.decode(z);
        Ok(match self.action_space {
            ActionSpace::Discrete { .. } => Action::Discrete(argmax(&out)),
            ActionSpace::Continuous { .. } => {
                Action::Continuous(out.iter().map(|v| v.tanh()).collect())
            }
        })
    }

    fn bottleneck(&self, observation: &[f64], mode: DecisionMode) -> Result<Vec<f64>> {
        let expected = self.pre.first().map(|l| l.inputs()).unwrap_or(0);
        if observation.len() != expected {
            return Err(anyhow!(
                "observation has {} values, policy expects {}",
                observation.len(),
                expected
            ));
        }
        Ok(self.squash(&self.logits(observation), mode))
    }

    fn bottleneck_size(&self) -> usize {
        self.pre.last().map(|l| l.outputs()).unwrap_or(0)
    }

    fn channel_output(&self, channel: usize) -> Result<Vec<f64>> {
        let size = self.bottleneck_size();
        if channel >= size {
            return Err(anyhow!("channel {} out of range 0..{}", channel, size));
        }
        Ok(self.decode(one_hot(channel, size)))
    }

    fn save_state(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

pub fn softmax(logits: &[f64], temperature: f64) -> Vec<f64> {
    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits
        .iter()
        .map(|l| ((l - max) / temperature).exp())
        .collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Index of the largest value; the first one wins ties.
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

pub fn one_hot(index: usize, size: usize) -> Vec<f64> {
    let mut v = vec![0.0; size];
    if index < size {
        v[index] = 1.0;
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use expl_core::RunConfig;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn policy(space: ActionSpace) -> BottleneckPolicy {
        let settings: PolicySettings = RunConfig::template().settings().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        BottleneckPolicy::init(&settings, 2, space, &mut rng).unwrap()
    }

    #[test]
    fn bottleneck_is_a_distribution() {
        let p = policy(ActionSpace::Continuous { dim: 2 });
        let z = p.bottleneck(&[0.3, -0.9], DecisionMode::Native).unwrap();
        assert_eq!(z.len(), 16);
        assert!((z.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(z.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn discretized_bottleneck_is_one_hot_at_the_native_argmax() {
        let p = policy(ActionSpace::Continuous { dim: 2 });
        let obs = [0.6, 0.8];
        let native = p.bottleneck(&obs, DecisionMode::Native).unwrap();
        let discrete = p.bottleneck(&obs, DecisionMode::Discretized).unwrap();
        assert_eq!(discrete, one_hot(argmax(&native), native.len()));
    }

    #[test]
    fn discrete_space_yields_discrete_actions() {
        let p = policy(ActionSpace::Discrete { n: 8 });
        match p.act(&[1.0, 0.0], DecisionMode::Native).unwrap() {
            Action::Discrete(i) => assert!(i < 8),
            other => panic!("unexpected action {:?}", other),
        }
        assert_eq!(p.channel_output(0).unwrap().len(), 8);
        assert!(p.channel_output(16).is_err());
    }

    #[test]
    fn state_round_trip_checks_shape() {
        let p = policy(ActionSpace::Continuous { dim: 2 });
        let state = p.save_state().unwrap();
        let settings: PolicySettings = RunConfig::template().settings().unwrap();
        let restored =
            BottleneckPolicy::from_state(&state, &settings, 2, ActionSpace::Continuous { dim: 2 })
                .unwrap();
        assert_eq!(restored, p);
        let mut wider = settings.clone();
        wider.fe_out_size = 32;
        assert!(BottleneckPolicy::from_state(&state, &wider, 2, ActionSpace::Continuous { dim: 2 })
            .is_err());
    }

    #[test]
    fn wrong_observation_width_is_an_error() {
        let p = policy(ActionSpace::Continuous { dim: 2 });
        assert!(p.act(&[1.0, 0.0, 0.0], DecisionMode::Native).is_err());
    }
}
