//! Grouped reductions over a metric table and their text renderings.

use crate::table::{MetricTable, Row};
use expl_core::ExplError;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_GROUP_BY: &[&str] = &["discretize", "action_scale"];
pub const DEFAULT_FIELDS: &[&str] = &["steps", "fractional", "linf"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    Median,
    /// Sample standard deviation (n - 1 denominator).
    Std,
}

impl Reduction {
    pub fn name(&self) -> &'static str {
        match self {
            Reduction::Median => "median",
            Reduction::Std => "std",
        }
    }

    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        match self {
            Reduction::Median => median(values),
            Reduction::Std => sample_std(values),
        }
    }
}

impl FromStr for Reduction {
    type Err = ExplError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "median" => Ok(Reduction::Median),
            "std" => Ok(Reduction::Std),
            other => Err(ExplError::NotSupported(format!("reduction '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Text,
    Markdown,
    Latex,
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(var.sqrt())
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum GroupValue {
    Missing,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl GroupValue {
    fn from_json(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => GroupValue::Missing,
            Some(Value::Bool(b)) => GroupValue::Bool(*b),
            Some(Value::Number(n)) => n.as_f64().map(GroupValue::Number).unwrap_or(GroupValue::Missing),
            Some(Value::String(s)) => GroupValue::Text(s.clone()),
            Some(other) => GroupValue::Text(other.to_string()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            GroupValue::Missing => 0,
            GroupValue::Bool(_) => 1,
            GroupValue::Number(_) => 2,
            GroupValue::Text(_) => 3,
        }
    }
}

impl Ord for GroupValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (GroupValue::Bool(a), GroupValue::Bool(b)) => a.cmp(b),
            (GroupValue::Number(a), GroupValue::Number(b)) => a.total_cmp(b),
            (GroupValue::Text(a), GroupValue::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for GroupValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for GroupValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for GroupValue {}

impl fmt::Display for GroupValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupValue::Missing => write!(f, "-"),
            GroupValue::Bool(b) => write!(f, "{}", b),
            GroupValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            GroupValue::Number(n) => write!(f, "{}", n),
            GroupValue::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryRow {
    pub key: Vec<GroupValue>,
    pub n: usize,
    /// One entry per summarized field, rounded to two decimals.
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub reduction: Reduction,
    pub group_by: Vec<String>,
    pub fields: Vec<String>,
    pub rows: Vec<SummaryRow>,
}

pub fn summarize(
    table: &MetricTable,
    group_by: &[String],
    fields: &[String],
    reduction: Reduction,
) -> Result<Summary, ExplError> {
    if fields.is_empty() {
        return Err(ExplError::config("no fields to summarize"));
    }
    let mut groups: BTreeMap<Vec<GroupValue>, Vec<&Row>> = BTreeMap::new();
    for row in &table.rows {
        let key = group_by
            .iter()
            .map(|g| GroupValue::from_json(row.get(g)))
            .collect();
        groups.entry(key).or_default().push(row);
    }
    let rows = groups
        .into_iter()
        .map(|(key, members)| {
            let values = fields
                .iter()
                .map(|field| {
                    let column: Vec<f64> = members
                        .iter()
                        .filter_map(|r| r.get(field).and_then(Value::as_f64))
                        .filter(|v| v.is_finite())
                        .collect();
                    reduction.apply(&column).map(round2)
                })
                .collect();
            SummaryRow {
                key,
                n: members.len(),
                values,
            }
        })
        .collect();
    Ok(Summary {
        reduction,
        group_by: group_by.to_vec(),
        fields: fields.to_vec(),
        rows,
    })
}

impl Summary {
    fn header(&self) -> Vec<String> {
        let mut cols = self.group_by.clone();
        cols.push("n".to_string());
        cols.extend(self.fields.iter().cloned());
        cols
    }

    fn cells(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| {
                let mut cells: Vec<String> = row.key.iter().map(|k| k.to_string()).collect();
                cells.push(row.n.to_string());
                cells.extend(row.values.iter().map(|v| match v {
                    Some(v) => format!("{:.2}", v),
                    None => "-".to_string(),
                }));
                cells
            })
            .collect()
    }

    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Text => self.render_text(),
            OutputFormat::Markdown => self.render_markdown(),
            OutputFormat::Latex => self.render_latex(),
        }
    }

    fn render_text(&self) -> String {
        let header = self.header();
        let cells = self.cells();
        let widths: Vec<usize> = (0..header.len())
            .map(|i| {
                cells
                    .iter()
                    .map(|r| r[i].len())
                    .chain(std::iter::once(header[i].len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();
        let line = |row: &[String]| {
            row.iter()
                .zip(&widths)
                .enumerate()
                .map(|(i, (c, w))| {
                    if i < self.group_by.len() {
                        format!("{:<w$}", c, w = *w)
                    } else {
                        format!("{:>w$}", c, w = *w)
                    }
                })
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        };
        let mut out = format!("{} by {}\n", self.reduction.name(), self.group_by.join(", "));
        out.push_str(&line(&header[..]));
        out.push('\n');
        for row in &cells {
            out.push_str(&line(&row[..]));
            out.push('\n');
        }
        out
    }

    fn render_markdown(&self) -> String {
        let header = self.header();
        let mut out = format!("| {} |\n", header.join(" | "));
        let align: Vec<&str> = (0..header.len())
            .map(|i| if i < self.group_by.len() { "---" } else { "---:" })
            .collect();
        out.push_str(&format!("| {} |\n", align.join(" | ")));
        for row in self.cells() {
            out.push_str(&format!("| {} |\n", row.join(" | ")));
        }
        out
    }

    fn render_latex(&self) -> String {
        let header = self.header();
        let columns = format!(
            "{}|{}",
            "l".repeat(self.group_by.len()),
            "r".repeat(header.len() - self.group_by.len())
        );
        let mut out = format!("\\begin{{tabular}}{{{}}}\n\\hline\n", columns);
        let escape = |s: &String| s.replace('_', "\\_");
        out.push_str(&header.iter().map(escape).collect::<Vec<_>>().join(" & "));
        out.push_str(" \\\\\n\\hline\n");
        for row in self.cells() {
            out.push_str(&row.iter().map(escape).collect::<Vec<_>>().join(" & "));
            out.push_str(" \\\\\n");
        }
        out.push_str("\\hline\n\\end{tabular}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> MetricTable {
        let rows = vec![
            json!({"discretize": true, "action_scale": 16, "steps": 3.0, "linf": 1.0}),
            json!({"discretize": true, "action_scale": 16, "steps": 5.0, "linf": 1.0}),
            json!({"discretize": false, "action_scale": 16, "steps": 4.0, "linf": 0.5}),
            json!({"discretize": false, "action_scale": 4, "steps": 6.0, "linf": 0.25}),
            json!({"discretize": false, "action_scale": 4, "steps": 7.0}),
            json!({"discretize": false, "action_scale": 4, "steps": 8.0, "linf": "n/a"}),
        ];
        MetricTable::new(
            rows.into_iter()
                .map(|r| match r {
                    Value::Object(m) => m,
                    _ => unreachable!(),
                })
                .collect(),
        )
    }

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn median_groups_are_ordered_and_counted() {
        let s = summarize(
            &table(),
            &names(DEFAULT_GROUP_BY),
            &names(&["steps", "linf"]),
            Reduction::Median,
        )
        .unwrap();
        let keys: Vec<String> = s
            .rows
            .iter()
            .map(|r| r.key.iter().map(|k| k.to_string()).collect::<Vec<_>>().join("/"))
            .collect();
        assert_eq!(keys, vec!["false/4", "false/16", "true/16"]);
        assert_eq!(s.rows[0].n, 3);
        assert_eq!(s.rows[0].values, vec![Some(7.0), Some(0.25)]);
        assert_eq!(s.rows[2].values, vec![Some(4.0), Some(1.0)]);
    }

    #[test]
    fn std_uses_the_sample_estimate_and_rounds() {
        let s = summarize(
            &table(),
            &names(&["discretize"]),
            &names(&["steps"]),
            Reduction::Std,
        )
        .unwrap();
        // false: 4, 6, 7, 8 -> mean 6.25, sample var 2.9167
        assert_eq!(s.rows[0].values, vec![Some(1.71)]);
        // true: 3, 5
        assert_eq!(s.rows[1].values, vec![Some(1.41)]);
    }

    #[test]
    fn unsupported_reductions_fail() {
        assert!(matches!("stderr".parse::<Reduction>(), Err(ExplError::NotSupported(_))));
        assert!(matches!("mean".parse::<Reduction>(), Err(ExplError::NotSupported(_))));
        assert_eq!("std".parse::<Reduction>().unwrap(), Reduction::Std);
    }

    #[test]
    fn empty_groups_render_a_dash() {
        let s = summarize(
            &table(),
            &names(&["action_scale"]),
            &names(&["fractional"]),
            Reduction::Median,
        )
        .unwrap();
        let text = s.render(OutputFormat::Text);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "median by action_scale");
        assert!(lines[1].starts_with("action_scale"));
        assert!(lines[2].starts_with("4 "));
        assert!(lines[2].ends_with('-'));
    }

    #[test]
    fn typeset_renderings() {
        let s = summarize(
            &table(),
            &names(&["discretize"]),
            &names(&["steps"]),
            Reduction::Median,
        )
        .unwrap();
        let md = s.render(OutputFormat::Markdown);
        assert_eq!(md.lines().next(), Some("| discretize | n | steps |"));
        assert!(md.contains("| true | 2 | 4.00 |"));

        let tex = s.render(OutputFormat::Latex);
        assert!(tex.starts_with("\\begin{tabular}{l|rr}"));
        assert!(tex.contains("false & 4 & 6.50 \\\\"));
        assert!(tex.trim_end().ends_with("\\end{tabular}"));
    }

    #[test]
    fn group_values_order_bool_number_text() {
        let mut v = vec![
            GroupValue::Text("a".into()),
            GroupValue::Number(10.0),
            GroupValue::Number(2.0),
            GroupValue::Bool(true),
            GroupValue::Missing,
        ];
        v.sort();
        let shown: Vec<String> = v.iter().map(|g| g.to_string()).collect();
        assert_eq!(shown, vec!["-", "true", "2", "10", "a"]);
    }
}
