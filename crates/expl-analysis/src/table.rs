use expl_core::{atomic_write_bytes, ExplError};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const TABLE_FILE: &str = "data.jsonl";

pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricTable {
    pub rows: Vec<Row>,
}

impl MetricTable {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn columns(&self) -> Vec<String> {
        let cols: BTreeSet<&String> = self.rows.iter().flat_map(|r| r.keys()).collect();
        cols.into_iter().cloned().collect()
    }

    /// Writes the table as `data.jsonl` under `dir`, replacing any previous
    /// table in one step.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, ExplError> {
        let mut buf = Vec::new();
        for row in &self.rows {
            serde_json::to_writer(&mut buf, row)?;
            buf.push(b'\n');
        }
        let path = dir.join(TABLE_FILE);
        atomic_write_bytes(&path, &buf)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self, ExplError> {
        let file = if path.is_dir() {
            path.join(TABLE_FILE)
        } else {
            path.to_path_buf()
        };
        let raw = fs::read_to_string(&file)?;
        let mut rows = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line)? {
                Value::Object(row) => rows.push(row),
                _ => {
                    return Err(ExplError::config(format!(
                        "{}:{}: row is not an object",
                        file.display(),
                        idx + 1
                    )))
                }
            }
        }
        Ok(Self { rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn save_then_load_from_dir_or_file() {
        let root = std::env::temp_dir().join(format!(
            "expl_table_{}_{}",
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ));
        let table = MetricTable::new(vec![
            row(json!({"steps": 3.5, "discretize": true})),
            row(json!({"steps": 4.0, "discretize": false, "extra": "x"})),
        ]);
        let path = table.save(&root).unwrap();
        assert!(path.ends_with(TABLE_FILE));
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 2);
        assert_eq!(MetricTable::load(&root).unwrap(), table);
        assert_eq!(MetricTable::load(&path).unwrap(), table);
        assert_eq!(table.columns(), vec!["discretize", "extra", "steps"]);

        fs::write(&path, "[1,2]\n").unwrap();
        assert!(MetricTable::load(&root).is_err());
        let _ = fs::remove_dir_all(root);
    }
}
