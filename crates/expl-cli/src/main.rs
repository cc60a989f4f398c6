use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use expl_analysis::{
    summarize::{DEFAULT_FIELDS, DEFAULT_GROUP_BY},
    AggregateOptions, EvalVariant, ExtractOptions, MetricTable, OutputFormat, Reduction,
};
use expl_core::{ExplError, RunConfig};
use expl_runner::{BatchReport, Job, RunOptions};
use expl_sim::SimBackend;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "expl", version = "0.3.0", about = "Experiment sweep runner")]
struct Cli {
    /// Print a single JSON result object on stdout.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum VariantArg {
    #[value(name = "discretized")]
    Discretized,
    #[value(name = "continuous")]
    Continuous,
}

impl From<VariantArg> for EvalVariant {
    fn from(value: VariantArg) -> Self {
        match value {
            VariantArg::Discretized => EvalVariant::Discretized,
            VariantArg::Continuous => EvalVariant::Continuous,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    #[value(name = "text")]
    Text,
    #[value(name = "markdown")]
    Markdown,
    #[value(name = "latex")]
    Latex,
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Text => OutputFormat::Text,
            FormatArg::Markdown => OutputFormat::Markdown,
            FormatArg::Latex => OutputFormat::Latex,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Train every job of one or more sweep files, skipping finished ones.
    Run {
        #[arg(required = true)]
        sweeps: Vec<PathBuf>,
        #[arg(long, default_value_t = 1)]
        num_trials: usize,
        #[arg(short = 'o', long = "out-dir", default_value = "log")]
        out_dir: PathBuf,
        #[arg(short = 'j', long = "jobs", default_value_t = 1)]
        workers: usize,
        /// List the jobs without running them.
        #[arg(long)]
        dry_run: bool,
    },
    /// Evaluate every artifact under the roots and write the metric table.
    #[command(alias = "test")]
    Aggregate {
        #[arg(required = true)]
        roots: Vec<PathBuf>,
        /// Directory for the table; defaults to the first root.
        #[arg(short = 'o', long = "out-dir")]
        out_dir: Option<PathBuf>,
        #[arg(short = 'j', long = "jobs", default_value_t = 1)]
        workers: usize,
        #[arg(long, default_value_t = expl_analysis::extract::DEFAULT_EPISODES)]
        episodes: usize,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, value_enum, value_delimiter = ',')]
        variants: Vec<VariantArg>,
    },
    /// Reduce a metric table per group.
    Summarize {
        /// A metric table file or the directory holding it.
        path: PathBuf,
        #[arg(long, default_value = "median")]
        reduction: String,
        #[arg(long, value_enum, default_value = "text")]
        format: FormatArg,
        #[arg(long = "group-by")]
        group_by: Vec<String>,
        #[arg(long = "fields")]
        fields: Vec<String>,
    },
    /// Episode lengths of codebook policies on the template environment.
    #[command(alias = "optimal")]
    Baseline {
        #[arg(long, default_value_t = expl_analysis::baseline::DEFAULT_EPISODES)]
        episodes: usize,
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let json_mode = cli.json;
    match run_command(cli.command, json_mode) {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            let failures: Vec<Value> = match err.downcast_ref::<ExplError>() {
                Some(e) => e
                    .failures()
                    .iter()
                    .map(|f| json!({ "unit": f.unit, "message": f.message }))
                    .collect(),
                None => Vec::new(),
            };
            if json_mode {
                emit_json(&json_error(
                    error_code(&err),
                    format!("{:#}", err),
                    json!({ "failures": failures }),
                ));
                std::process::exit(1);
            }
            if let Some(e) = err.downcast_ref::<ExplError>() {
                if !e.failures().is_empty() {
                    eprintln!("error: {} unit(s) failed", e.failures().len());
                    for f in e.failures() {
                        eprintln!("  {}", f);
                    }
                    std::process::exit(1);
                }
            }
            Err(err)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_command(command: Commands, json: bool) -> Result<Option<Value>> {
    let backend = SimBackend;
    match command {
        Commands::Run {
            sweeps,
            num_trials,
            out_dir,
            workers,
            dry_run,
        } => {
            let opts = RunOptions {
                num_trials,
                workers,
                out_dir,
            };
            if dry_run {
                let jobs = expl_runner::plan_experiments(&sweeps, &opts, &backend)?;
                if json {
                    return Ok(Some(json!({
                        "ok": true,
                        "command": "run",
                        "dry_run": true,
                        "jobs": jobs.iter().map(job_to_json).collect::<Vec<_>>()
                    })));
                }
                for job in &jobs {
                    let state = if job.is_completed() { "done" } else { "pending" };
                    println!("{:<8}{}", state, job.dir.display());
                }
                println!("jobs: {}", jobs.len());
                return Ok(None);
            }
            let report = expl_runner::run_experiments(&sweeps, &opts, &backend)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "report": report_to_json(&report)
                })));
            }
            println!("completed: {}", report.completed.len());
            println!("skipped: {}", report.skipped.len());
        }
        Commands::Aggregate {
            roots,
            out_dir,
            workers,
            episodes,
            seed,
            variants,
        } => {
            let out_dir = match out_dir {
                Some(dir) => dir,
                None => roots.first().cloned().unwrap_or_else(|| PathBuf::from(".")),
            };
            let mut opts = AggregateOptions {
                workers,
                extract: ExtractOptions { episodes, seed },
                ..AggregateOptions::default()
            };
            if !variants.is_empty() {
                opts.variants = variants.into_iter().map(Into::into).collect();
                opts.variants.dedup();
            }
            let report = expl_analysis::aggregate(&backend, &roots, &out_dir, &opts)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "aggregate",
                    "artifacts": report.artifacts,
                    "rows": report.rows,
                    "table": report.table_path.display().to_string()
                })));
            }
            println!("artifacts: {}", report.artifacts);
            println!("rows: {}", report.rows);
            println!("table: {}", report.table_path.display());
        }
        Commands::Summarize {
            path,
            reduction,
            format,
            group_by,
            fields,
        } => {
            let reduction: Reduction = reduction.parse()?;
            let group_by = or_defaults(group_by, DEFAULT_GROUP_BY);
            let fields = or_defaults(fields, DEFAULT_FIELDS);
            let table = MetricTable::load(&path)?;
            let summary = expl_analysis::summarize(&table, &group_by, &fields, reduction)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "summarize",
                    "summary": serde_json::to_value(&summary)?
                })));
            }
            print!("{}", summary.render(format.into()));
        }
        Commands::Baseline { episodes, seed } => {
            let rows = expl_analysis::codebook_baseline(
                &backend,
                &RunConfig::template(),
                expl_analysis::CODEBOOK_SIZES,
                episodes,
                seed,
            )?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "baseline",
                    "episodes": episodes,
                    "rows": serde_json::to_value(&rows)?
                })));
            }
            for row in &rows {
                println!("{}", row.line());
            }
        }
    }
    Ok(None)
}

fn or_defaults(values: Vec<String>, defaults: &[&str]) -> Vec<String> {
    if values.is_empty() {
        defaults.iter().map(|s| s.to_string()).collect()
    } else {
        values
    }
}

fn job_to_json(job: &Job) -> Value {
    json!({
        "dir": job.dir.display().to_string(),
        "trial": job.trial,
        "completed": job.is_completed()
    })
}

fn report_to_json(report: &BatchReport) -> Value {
    let paths = |v: &[PathBuf]| {
        v.iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
    };
    json!({
        "completed": paths(&report.completed[..]),
        "skipped": paths(&report.skipped[..])
    })
}

fn error_code(err: &anyhow::Error) -> &'static str {
    match err.downcast_ref::<ExplError>() {
        Some(ExplError::Config(_)) => "config_error",
        Some(ExplError::Job { .. }) => "job_failed",
        Some(ExplError::Aggregation { .. }) => "aggregation_failed",
        Some(ExplError::NotSupported(_)) => "not_supported",
        Some(ExplError::Artifact { .. }) => "artifact_error",
        _ => "command_failed",
    }
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}
