//! Upgrades persisted run configurations written by older versions.
//!
//! Every field introduced after the first artifacts were produced has a
//! backfill rule here. The table is append-only: a rule is never edited or
//! removed once artifacts may depend on it.

use crate::config::RunConfig;
use crate::error::ExplError;
use serde_json::{json, Value};

pub const CURRENT_SCHEMA_VERSION: u64 = 2;

pub struct Backfill {
    pub field: &'static str,
    pub since: u64,
    pub default: fn() -> Value,
}

pub const BACKFILLS: &[Backfill] = &[
    // Old runs observed the raw offset vector, not the unit direction.
    Backfill { field: "obs_type", since: 1, default: || json!("vector") },
    Backfill { field: "policy_activation", since: 1, default: || json!("tanh") },
    Backfill { field: "action_noise", since: 1, default: || json!(0.0) },
    Backfill { field: "bottleneck_temperature", since: 1, default: || json!(1.0) },
    Backfill { field: "reward_structure", since: 1, default: || json!("proximity") },
    Backfill { field: "n_proc_alg", since: 1, default: || json!(1) },
    Backfill { field: "discrete_action", since: 1, default: || json!(false) },
    Backfill { field: "perturbation_scale", since: 2, default: || json!(0.05) },
];

#[derive(Debug, Clone)]
pub struct Upgraded {
    pub config: RunConfig,
    pub backfilled: Vec<&'static str>,
}

/// Fills every missing field from [`BACKFILLS`] and stamps the current schema
/// version. Present values are never touched.
pub fn upgrade_config(raw: Value) -> Result<Upgraded, ExplError> {
    let mut config = RunConfig::from_json_value(raw)?;
    if config.schema_version() > CURRENT_SCHEMA_VERSION {
        return Err(ExplError::config(format!(
            "config schema version {} is newer than supported version {}",
            config.schema_version(),
            CURRENT_SCHEMA_VERSION
        )));
    }
    let mut backfilled = Vec::new();
    for rule in BACKFILLS {
        if !config.contains(rule.field) {
            config = config.with(rule.field, (rule.default)());
            backfilled.push(rule.field);
        }
    }
    let config = config.with("schema_version", json!(CURRENT_SCHEMA_VERSION));
    Ok(Upgraded { config, backfilled })
}
