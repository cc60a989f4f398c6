use crate::error::ExplError;
use crate::schema::CURRENT_SCHEMA_VERSION;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// A fully resolved set of run parameters.
///
/// Values are never mutated in place: merging produces a new config, so one
/// config can be shared by every trial built from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunConfig(BTreeMap<String, Value>);

impl RunConfig {
    pub fn template() -> Self {
        let value = json!({
            "schema_version": CURRENT_SCHEMA_VERSION,
            "env_lsize": 7,
            "action_scale": 8,
            "discrete_action": false,
            "bottleneck": "gsm",
            "bottleneck_temperature": 1.0,
            "reward_structure": "proximity",
            "policy_net_arch": [],
            "pre_arch": [16, 16],
            "post_arch": [16],
            "policy_activation": "tanh",
            "action_noise": 0.0,
            "obs_type": "direction",
            "entropy_samples": 400,
            "eval_freq": 20000,
            "total_timesteps": 5_000_000,
            "reward_threshold": 0.95,
            "max_step_scale": 4.5,
            "eval_episodes": 500,
            "fe_out_size": 16,
            "fe_out_ratio": 4,
            "pixel_space": false,
            "device": "cpu",
            "n_proc_alg": 1,
            "alg": "ppo",
            "n_steps": 1024,
            "batch_size": 256,
            "learning_rate": 0.0003,
            "single_step": false,
            "perturbation_scale": 0.05,
        });
        match value {
            Value::Object(map) => Self::from_object(map),
            _ => Self(BTreeMap::new()),
        }
    }

    pub fn from_map(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }

    pub fn from_object(map: Map<String, Value>) -> Self {
        Self(map.into_iter().collect())
    }

    pub fn from_json_value(value: Value) -> Result<Self, ExplError> {
        match value {
            Value::Object(map) => Ok(Self::from_object(map)),
            other => Err(ExplError::config(format!(
                "expected a mapping of parameters, found {}",
                value_kind(&other)
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a new config where `overrides` replace matching keys and all
    /// other keys are inherited unchanged.
    pub fn merged(&self, overrides: &BTreeMap<String, Value>) -> Self {
        let mut out = self.0.clone();
        for (k, v) in overrides {
            out.insert(k.clone(), v.clone());
        }
        Self(out)
    }

    pub(crate) fn with(&self, key: &str, value: Value) -> Self {
        let mut out = self.0.clone();
        out.insert(key.to_string(), value);
        Self(out)
    }

    pub fn schema_version(&self) -> u64 {
        self.get("schema_version")
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    }

    pub fn settings<T: DeserializeOwned>(&self) -> Result<T, ExplError> {
        serde_json::from_value(self.to_json())
            .map_err(|e| ExplError::config(format!("invalid parameter value: {}", e)))
    }

    pub fn validate(&self) -> Result<(), ExplError> {
        let template = Self::template();
        let missing: Vec<&str> = template.keys().filter(|k| !self.contains(k)).collect();
        if !missing.is_empty() {
            return Err(ExplError::config(format!(
                "missing required parameters: {}",
                missing.join(", ")
            )));
        }
        let _: EnvSettings = self.settings()?;
        let _: PolicySettings = self.settings()?;
        let _: TrainSettings = self.settings()?;
        Ok(())
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.0.clone().into_iter().collect())
    }

    pub fn to_yaml_string(&self) -> Result<String, ExplError> {
        Ok(serde_yaml::to_string(&self.0)?)
    }
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RewardStructure {
    Constant,
    None,
    Proximity,
    ConstantOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObsType {
    Vector,
    Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BottleneckKind {
    Gsm,
    Softmax,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Tanh,
    Relu,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvSettings {
    pub env_lsize: f64,
    pub action_scale: usize,
    pub discrete_action: bool,
    pub reward_structure: RewardStructure,
    pub action_noise: f64,
    pub obs_type: ObsType,
    pub max_step_scale: f64,
    pub single_step: bool,
    pub pixel_space: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySettings {
    pub bottleneck: BottleneckKind,
    pub bottleneck_temperature: f64,
    pub pre_arch: Vec<usize>,
    pub post_arch: Vec<usize>,
    pub policy_activation: Activation,
    pub fe_out_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainSettings {
    pub total_timesteps: u64,
    pub eval_freq: u64,
    pub eval_episodes: usize,
    pub reward_threshold: f64,
    pub n_steps: u64,
    pub learning_rate: f64,
    pub perturbation_scale: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_is_valid_and_current() {
        let cfg = RunConfig::template();
        cfg.validate().expect("template must validate");
        assert_eq!(cfg.schema_version(), CURRENT_SCHEMA_VERSION);
        let env: EnvSettings = cfg.settings().unwrap();
        assert_eq!(env.obs_type, ObsType::Direction);
        assert_eq!(env.reward_structure, RewardStructure::Proximity);
        assert_eq!(env.action_scale, 8);
    }

    #[test]
    fn merge_replaces_matching_keys_only() {
        let base = RunConfig::template();
        let mut overrides = BTreeMap::new();
        overrides.insert("learning_rate".to_string(), json!(0.01));
        let merged = base.merged(&overrides);
        assert_eq!(merged.get("learning_rate"), Some(&json!(0.01)));
        assert_eq!(base.get("learning_rate"), Some(&json!(0.0003)));
        for key in base.keys().filter(|k| *k != "learning_rate") {
            assert_eq!(merged.get(key), base.get(key), "key {}", key);
        }
    }

    #[test]
    fn validate_reports_missing_and_mistyped_values() {
        let mut map: BTreeMap<String, Value> = RunConfig::template().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        map.remove("eval_freq");
        let err = RunConfig::from_map(map).validate().expect_err("missing key");
        assert!(err.to_string().contains("eval_freq"), "{}", err);

        let mut overrides = BTreeMap::new();
        overrides.insert("obs_type".to_string(), json!("pixels"));
        let err = RunConfig::template()
            .merged(&overrides)
            .validate()
            .expect_err("bad enum");
        assert!(matches!(err, ExplError::Config(_)));
    }

    #[test]
    fn non_mapping_config_is_rejected() {
        let err = RunConfig::from_json_value(json!([1, 2])).expect_err("array");
        assert!(err.to_string().contains("array"), "{}", err);
    }
}
