pub mod capability;
pub mod config;
pub mod error;
pub mod pool;
pub mod schema;

pub use capability::{
    Action, ActionSpace, Backend, DecisionAgent, DecisionMode, Environment, EvalSnapshot, Step,
    StepInfo, TrainContext, TrainingHooks,
};
pub use config::{
    Activation, BottleneckKind, EnvSettings, ObsType, PolicySettings, RewardStructure, RunConfig,
    TrainSettings,
};
pub use error::{ExplError, Failure};
pub use pool::run_bounded;
pub use schema::{upgrade_config, CURRENT_SCHEMA_VERSION};

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;

pub const CONFIG_YAML: &str = "config.yaml";
pub const CONFIG_JSON: &str = "config.json";
pub const CONFIG_DIGEST: &str = "config.digest";
pub const MODEL_STATE: &str = "best.json";
pub const PROGRESS_LOG: &str = "progress.jsonl";
/// Zero-byte sentinel written as the last side effect of a finished job.
pub const COMPLETED_MARKER: &str = "completed";

pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path)
}

pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Digest of the compact JSON rendering. `serde_json` maps are key-sorted,
/// so equal values always hash equally.
pub fn canonical_json_digest(value: &Value) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    sha256_bytes(&bytes)
}

pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let ts = chrono::Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    sync_parent(path);
    Ok(())
}

pub fn write_marker(path: &Path) -> std::io::Result<()> {
    let file = fs::File::create(path)?;
    file.sync_all()?;
    sync_parent(path);
    Ok(())
}

fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(test)]
pub(crate) fn temp_root(label: &str) -> std::path::PathBuf {
    let root = std::env::temp_dir().join(format!(
        "expl_{}_{}_{}",
        label,
        std::process::id(),
        chrono::Utc::now().timestamp_micros()
    ));
    ensure_dir(&root).expect("temp dir");
    root
}
