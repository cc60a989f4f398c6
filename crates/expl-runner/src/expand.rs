use expl_core::{ExplError, RunConfig};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::warn;

pub type OverrideSet = BTreeMap<String, Value>;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SweepFile {
    #[serde(default)]
    base: BTreeMap<String, Value>,
    #[serde(default)]
    overrides: Vec<OverrideSet>,
    #[serde(default)]
    grid: BTreeMap<String, Vec<Value>>,
}

#[derive(Debug, Clone)]
pub struct Sweep {
    pub name: String,
    pub base: RunConfig,
    pub override_sets: Vec<OverrideSet>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedConfig {
    pub token: String,
    pub overridden: Vec<String>,
    pub config: RunConfig,
}

pub fn load_sweep(path: &Path) -> Result<Sweep, ExplError> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ExplError::config(format!("cannot name sweep {}", path.display())))?
        .to_string();
    let raw = fs::read_to_string(path)
        .map_err(|e| ExplError::config(format!("read {}: {}", path.display(), e)))?;
    let yaml_value: serde_yaml::Value = serde_yaml::from_str(&raw)
        .map_err(|e| ExplError::config(format!("parse {}: {}", path.display(), e)))?;
    let json_value: Value = serde_json::to_value(yaml_value)?;
    if !json_value.is_object() {
        return Err(ExplError::config(format!(
            "{}: sweep must be a mapping with base/overrides/grid",
            path.display()
        )));
    }
    let file: SweepFile = serde_json::from_value(json_value)
        .map_err(|e| ExplError::config(format!("{}: {}", path.display(), e)))?;

    let mut override_sets = file.overrides;
    override_sets.extend(grid_product(&file.grid)?);
    Ok(Sweep {
        name,
        base: RunConfig::template().merged(&file.base),
        override_sets,
    })
}

/// Cartesian product of the grid axes, iterated in sorted axis order with
/// the last axis varying fastest.
pub fn grid_product(grid: &BTreeMap<String, Vec<Value>>) -> Result<Vec<OverrideSet>, ExplError> {
    if grid.is_empty() {
        return Ok(Vec::new());
    }
    let mut sets = vec![OverrideSet::new()];
    for (key, values) in grid {
        if values.is_empty() {
            return Err(ExplError::config(format!("grid axis '{}' has no values", key)));
        }
        let mut next = Vec::with_capacity(sets.len() * values.len());
        for set in &sets {
            for v in values {
                let mut s = set.clone();
                s.insert(key.clone(), v.clone());
                next.push(s);
            }
        }
        sets = next;
    }
    Ok(sets)
}

/// Merges every override set over `base`.
///
/// Identical override sets collapse into one; distinct sets that would share
/// an output directory are rejected.
pub fn expand(base: &RunConfig, override_sets: &[OverrideSet]) -> Result<Vec<ExpandedConfig>, ExplError> {
    if override_sets.is_empty() {
        return Err(ExplError::config("sweep declares no override sets"));
    }
    let mut out: Vec<ExpandedConfig> = Vec::new();
    let mut seen: BTreeMap<String, &OverrideSet> = BTreeMap::new();
    for (idx, set) in override_sets.iter().enumerate() {
        if set.is_empty() {
            return Err(ExplError::config(format!(
                "override set #{} references no keys",
                idx
            )));
        }
        for key in set.keys().filter(|k| !base.contains(k)) {
            warn!(key = %key, "override sets a parameter the base config does not define");
        }
        let token = config_token(set);
        if let Some(prev) = seen.get(&token) {
            if *prev == set {
                warn!(token = %token, "duplicate override set ignored");
                continue;
            }
            return Err(ExplError::config(format!(
                "override sets #{} and an earlier set both map to '{}'",
                idx, token
            )));
        }
        let config = base.merged(set);
        config
            .validate()
            .map_err(|e| ExplError::config(format!("{}: {}", token, e)))?;
        seen.insert(token.clone(), set);
        out.push(ExpandedConfig {
            token,
            overridden: set.keys().cloned().collect(),
            config,
        });
    }
    Ok(out)
}

/// Directory name for an override set: `key_value` tokens in key order,
/// joined by `_`.
pub fn config_token(set: &OverrideSet) -> String {
    set.iter()
        .map(|(k, v)| format!("{}_{}", sanitize(k), sanitize(&value_token(v))))
        .collect::<Vec<_>>()
        .join("_")
}

fn value_token(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) if items.is_empty() => "empty".to_string(),
        Value::Array(items) => items.iter().map(value_token).collect::<Vec<_>>().join("-"),
        other => other.to_string(),
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '-',
            c if c.is_whitespace() => '-',
            c => c,
        })
        .collect()
}
