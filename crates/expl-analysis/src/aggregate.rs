use crate::extract::{extract, EvalVariant, ExtractOptions, MetricRecord};
use crate::scan::find_artifacts;
use crate::table::MetricTable;
use expl_core::{run_bounded, Backend, ExplError, Failure};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct AggregateOptions {
    pub variants: Vec<EvalVariant>,
    pub workers: usize,
    pub extract: ExtractOptions,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            variants: EvalVariant::ALL.to_vec(),
            workers: 1,
            extract: ExtractOptions::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregateReport {
    pub table_path: PathBuf,
    pub artifacts: usize,
    pub rows: usize,
}

/// Evaluates every artifact under `roots` with every variant and writes the
/// combined table to `out_dir`.
///
/// The first failed extraction stops extractions that have not started yet;
/// the table is only written when all of them succeeded.
pub fn aggregate(
    backend: &dyn Backend,
    roots: &[PathBuf],
    out_dir: &Path,
    opts: &AggregateOptions,
) -> Result<AggregateReport, ExplError> {
    let artifacts = find_artifacts(roots);
    if artifacts.is_empty() {
        return Err(ExplError::Aggregation {
            failures: vec![Failure::new(
                roots
                    .iter()
                    .map(|r| r.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                "no artifacts",
            )],
        });
    }
    if opts.variants.is_empty() {
        return Err(ExplError::config("no evaluation variants requested"));
    }
    let units: Vec<(PathBuf, EvalVariant)> = artifacts
        .iter()
        .flat_map(|a| opts.variants.iter().map(move |v| (a.clone(), *v)))
        .collect();
    info!(
        artifacts = artifacts.len(),
        extractions = units.len(),
        workers = opts.workers,
        "aggregating"
    );

    let abort = AtomicBool::new(false);
    let results = run_bounded(&units, opts.workers, |(artifact, variant)| {
        if abort.load(Ordering::SeqCst) {
            return None;
        }
        let result = extract(backend, artifact, *variant, &opts.extract);
        if result.is_err() {
            abort.store(true, Ordering::SeqCst);
        }
        Some(result)
    })?;

    let mut records: Vec<MetricRecord> = Vec::with_capacity(units.len());
    let mut failures = Vec::new();
    let mut skipped = 0;
    for ((artifact, variant), result) in units.iter().zip(results) {
        match result {
            Some(Ok(record)) => records.push(record),
            Some(Err(e)) => {
                warn!(artifact = %artifact.display(), variant = variant.name(), error = %format!("{:#}", e), "extraction failed");
                failures.push(Failure::new(
                    format!("{} [{}]", artifact.display(), variant.name()),
                    format!("{:#}", e),
                ));
            }
            None => skipped += 1,
        }
    }
    if !failures.is_empty() {
        if skipped > 0 {
            warn!(skipped, "extractions skipped after the first failure");
        }
        return Err(ExplError::Aggregation { failures });
    }

    let rows = records
        .iter()
        .map(MetricRecord::to_row)
        .collect::<Result<Vec<_>, _>>()?;
    let table = MetricTable::new(rows);
    let table_path = table.save(out_dir)?;
    info!(rows = table.len(), path = %table_path.display(), "metric table written");
    Ok(AggregateReport {
        table_path,
        artifacts: artifacts.len(),
        rows: table.len(),
    })
}
