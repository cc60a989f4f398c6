use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// One failed unit of work inside a batch (a training job or an extraction).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub unit: String,
    pub message: String,
}

impl Failure {
    pub fn new(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.unit, self.message)
    }
}

fn join_failures(failures: &[Failure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum ExplError {
    #[error("config error: {0}")]
    Config(String),

    #[error("{} job(s) failed: {}", failures.len(), join_failures(failures))]
    Job { failures: Vec<Failure> },

    #[error("aggregation failed ({} extraction(s)): {}", failures.len(), join_failures(failures))]
    Aggregation { failures: Vec<Failure> },

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("artifact {} is missing {file}", path.display())]
    Artifact { path: PathBuf, file: String },

    #[error("worker pool: {0}")]
    Pool(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl ExplError {
    pub fn config(msg: impl Into<String>) -> Self {
        ExplError::Config(msg.into())
    }

    /// Failures carried by a batch-level error, empty for everything else.
    pub fn failures(&self) -> &[Failure] {
        match self {
            ExplError::Job { failures } | ExplError::Aggregation { failures } => failures,
            _ => &[],
        }
    }
}
