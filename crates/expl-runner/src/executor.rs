use crate::jobs::Job;
use anyhow::{Context, Result};
use chrono::Utc;
use expl_core::{
    atomic_write_bytes, canonical_json_digest, ensure_dir, run_bounded, write_marker, Backend,
    DecisionAgent, EvalSnapshot, ExplError, Failure, RunConfig, TrainContext, TrainingHooks,
    CONFIG_DIGEST, CONFIG_JSON, CONFIG_YAML, MODEL_STATE, PROGRESS_LOG,
};
use serde_json::json;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Offset between a trial's training seed and its evaluation env seed.
const EVAL_SEED_OFFSET: u64 = 1_000_003;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub completed: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.completed.len() + self.skipped.len()
    }
}

/// Runs training jobs at most once each, resuming after crashes.
pub struct ResumableExecutor<'a> {
    backend: &'a dyn Backend,
    workers: usize,
}

impl<'a> ResumableExecutor<'a> {
    pub fn new(backend: &'a dyn Backend, workers: usize) -> Self {
        Self {
            backend,
            workers: workers.max(1),
        }
    }

    /// Runs every job. Failed jobs do not stop the others; they are reported
    /// together once the whole batch has finished.
    pub fn run(&self, jobs: &[Job]) -> Result<BatchReport, ExplError> {
        info!(jobs = jobs.len(), workers = self.workers, "dispatching training jobs");
        let results = run_bounded(jobs, self.workers, |job| self.run_job(job))?;

        let mut report = BatchReport::default();
        let mut failures = Vec::new();
        for (job, result) in jobs.iter().zip(results) {
            match result {
                Ok(JobOutcome::Completed) => report.completed.push(job.dir.clone()),
                Ok(JobOutcome::Skipped) => report.skipped.push(job.dir.clone()),
                Err(e) => {
                    warn!(job = %job.dir.display(), error = %format!("{:#}", e), "job failed");
                    failures.push(Failure::new(job.dir.display().to_string(), format!("{:#}", e)));
                }
            }
        }
        if !failures.is_empty() {
            return Err(ExplError::Job { failures });
        }
        info!(
            completed = report.completed.len(),
            skipped = report.skipped.len(),
            "batch finished"
        );
        Ok(report)
    }

    pub fn run_job(&self, job: &Job) -> Result<JobOutcome> {
        let digest = canonical_json_digest(&job.config.to_json());
        if job.is_completed() {
            warn_on_digest_mismatch(&job.dir, &digest);
            debug!(job = %job.dir.display(), "already completed, skipping");
            return Ok(JobOutcome::Skipped);
        }
        if job.dir.exists() {
            warn!(job = %job.dir.display(), "removing incomplete job directory");
            fs::remove_dir_all(&job.dir)
                .with_context(|| format!("remove incomplete {}", job.dir.display()))?;
        }
        ensure_dir(&job.dir).with_context(|| format!("create {}", job.dir.display()))?;
        persist_config(&job.dir, &job.config, &digest)?;

        let seed = job.trial as u64;
        let eval_env = self
            .backend
            .make_env(&job.config, seed + EVAL_SEED_OFFSET, true)
            .context("build evaluation environment")?;
        let ctx = TrainContext {
            job_dir: job.dir.clone(),
            trial: job.trial,
            seed,
        };
        let mut hooks = JobHooks::new(&job.dir);
        info!(job = %job.dir.display(), "training");
        let agent = self
            .backend
            .train(&job.config, &ctx, eval_env, &mut hooks)
            .context("training")?;
        if !hooks.saved_checkpoint {
            atomic_write_bytes(&job.dir.join(MODEL_STATE), &agent.save_state()?)?;
        }
        write_marker(&job.marker_path())?;
        info!(job = %job.dir.display(), "completed");
        Ok(JobOutcome::Completed)
    }
}

fn persist_config(dir: &Path, config: &RunConfig, digest: &str) -> Result<()> {
    atomic_write_bytes(&dir.join(CONFIG_YAML), config.to_yaml_string()?.as_bytes())?;
    atomic_write_bytes(
        &dir.join(CONFIG_JSON),
        &serde_json::to_vec_pretty(&config.to_json())?,
    )?;
    atomic_write_bytes(&dir.join(CONFIG_DIGEST), digest.as_bytes())?;
    Ok(())
}

fn warn_on_digest_mismatch(dir: &Path, digest: &str) {
    if let Ok(stored) = fs::read_to_string(dir.join(CONFIG_DIGEST)) {
        if stored.trim() != digest {
            warn!(
                job = %dir.display(),
                "completed job was produced by a different configuration; keeping it"
            );
        }
    }
}

/// Logs every evaluation to `progress.jsonl` and keeps the best model so far
/// in `best.json`.
struct JobHooks {
    dir: PathBuf,
    best: Option<(f64, f64)>,
    saved_checkpoint: bool,
}

impl JobHooks {
    fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            best: None,
            saved_checkpoint: false,
        }
    }

    fn is_improvement(&self, snapshot: &EvalSnapshot) -> bool {
        let score = (snapshot.success_rate, snapshot.mean_reward);
        match self.best {
            None => true,
            Some(best) => score > best,
        }
    }
}

impl TrainingHooks for JobHooks {
    fn on_evaluation(&mut self, snapshot: &EvalSnapshot, agent: &dyn DecisionAgent) -> Result<()> {
        let line = json!({
            "schema_version": "progress_v1",
            "timesteps": snapshot.timesteps,
            "episodes": snapshot.episodes,
            "mean_reward": snapshot.mean_reward,
            "mean_length": snapshot.mean_length,
            "success_rate": snapshot.success_rate,
            "recorded_at": Utc::now().to_rfc3339(),
        });
        let mut log = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(PROGRESS_LOG))?;
        writeln!(log, "{}", line)?;

        if self.is_improvement(snapshot) {
            atomic_write_bytes(&self.dir.join(MODEL_STATE), &agent.save_state()?)?;
            self.best = Some((snapshot.success_rate, snapshot.mean_reward));
            self.saved_checkpoint = true;
            debug!(
                job = %self.dir.display(),
                success_rate = snapshot.success_rate,
                "new best checkpoint"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::{expand, OverrideSet};
    use crate::jobs::build_jobs;
    use anyhow::anyhow;
    use expl_core::{Action, ActionSpace, DecisionMode, Environment, Step, StepInfo};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StillEnv;

    impl Environment for StillEnv {
        fn reset(&mut self) -> Vec<f64> {
            vec![0.0, 0.0]
        }

        fn step(&mut self, _action: &Action) -> Result<Step> {
            Ok(Step {
                observation: vec![0.0, 0.0],
                reward: 0.0,
                done: true,
                info: StepInfo { at_goal: true },
            })
        }

        fn action_space(&self) -> ActionSpace {
            ActionSpace::Continuous { dim: 2 }
        }
    }

    struct FixedAgent(u8);

    impl DecisionAgent for FixedAgent {
        fn act(&self, _obs: &[f64], _mode: DecisionMode) -> Result<Action> {
            Ok(Action::Continuous(vec![0.0, 0.0]))
        }
        fn bottleneck(&self, _obs: &[f64], _mode: DecisionMode) -> Result<Vec<f64>> {
            Ok(vec![1.0])
        }
        fn bottleneck_size(&self) -> usize {
            1
        }
        fn channel_output(&self, _channel: usize) -> Result<Vec<f64>> {
            Ok(vec![0.0, 0.0])
        }
        fn save_state(&self) -> Result<Vec<u8>> {
            Ok(format!("{{\"agent\":{}}}", self.0).into_bytes())
        }
    }

    /// Counts training calls and checks the on-disk state at train time.
    #[derive(Default)]
    struct FakeBackend {
        calls: AtomicUsize,
        fail_token: Option<String>,
        snapshots: usize,
        violations: Mutex<Vec<String>>,
    }

    impl Backend for FakeBackend {
        fn make_env(&self, _c: &RunConfig, _s: u64, _e: bool) -> Result<Box<dyn Environment>> {
            Ok(Box::new(StillEnv))
        }

        fn train(
            &self,
            _config: &RunConfig,
            ctx: &TrainContext,
            _eval_env: Box<dyn Environment>,
            hooks: &mut dyn TrainingHooks,
        ) -> Result<Box<dyn DecisionAgent>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            for f in [CONFIG_JSON, CONFIG_YAML, CONFIG_DIGEST] {
                if !ctx.job_dir.join(f).is_file() {
                    self.violations.lock().unwrap().push(format!("{} missing", f));
                }
            }
            if ctx.job_dir.join(expl_core::COMPLETED_MARKER).exists() {
                self.violations.lock().unwrap().push("marker before training".into());
            }
            if let Some(token) = &self.fail_token {
                if ctx.job_dir.to_string_lossy().contains(token.as_str()) {
                    return Err(anyhow!("diverged"));
                }
            }
            for i in 0..self.snapshots {
                let snap = EvalSnapshot {
                    timesteps: (i as u64 + 1) * 10,
                    episodes: 1,
                    mean_reward: i as f64,
                    mean_length: 1.0,
                    success_rate: if i == 0 { 0.5 } else { 0.25 },
                };
                hooks.on_evaluation(&snap, &FixedAgent(i as u8))?;
            }
            Ok(Box::new(FixedAgent(99)))
        }

        fn load_agent(&self, _c: &RunConfig, _s: &[u8]) -> Result<Box<dyn DecisionAgent>> {
            Ok(Box::new(FixedAgent(0)))
        }
    }

    fn temp_root(label: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "expl_exec_{}_{}_{}",
            label,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&root).expect("temp root");
        root
    }

    fn lr_jobs(root: &Path) -> Vec<Job> {
        let sets: Vec<OverrideSet> = [0.001, 0.01]
            .iter()
            .map(|lr| {
                let mut s = OverrideSet::new();
                s.insert("lr".to_string(), json!(lr));
                s
            })
            .collect();
        let expanded = expand(&RunConfig::template(), &sets).unwrap();
        build_jobs(root, "lr", &expanded, 2).unwrap()
    }

    #[test]
    fn second_run_trains_nothing() {
        let root = temp_root("idempotent");
        let jobs = lr_jobs(&root);
        let backend = FakeBackend::default();
        let first = ResumableExecutor::new(&backend, 2).run(&jobs).unwrap();
        assert_eq!(first.completed.len(), 4);
        assert!(jobs.iter().all(|j| j.is_completed()));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);

        let second = ResumableExecutor::new(&backend, 2).run(&jobs).unwrap();
        assert_eq!(second.skipped.len(), 4);
        assert!(second.completed.is_empty());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
        assert!(backend.violations.lock().unwrap().is_empty());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn artifact_layout_is_complete() {
        let root = temp_root("layout");
        let jobs = lr_jobs(&root);
        let backend = FakeBackend::default();
        ResumableExecutor::new(&backend, 1).run(&jobs[..1]).unwrap();
        let dir = &jobs[0].dir;
        assert!(dir.ends_with("lr/lr_0.001/run-0"));
        for f in [CONFIG_YAML, CONFIG_JSON, CONFIG_DIGEST, MODEL_STATE] {
            assert!(dir.join(f).is_file(), "{} missing", f);
        }
        assert_eq!(fs::metadata(jobs[0].marker_path()).unwrap().len(), 0);
        let stored: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.join(CONFIG_JSON)).unwrap()).unwrap();
        assert_eq!(stored, jobs[0].config.to_json());
        // no snapshots, so the returned model is the checkpoint
        assert_eq!(fs::read_to_string(dir.join(MODEL_STATE)).unwrap(), "{\"agent\":99}");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn partial_job_directory_is_wiped_and_redone() {
        let root = temp_root("crash");
        let jobs = lr_jobs(&root);
        let job = &jobs[0];
        ensure_dir(&job.dir).unwrap();
        fs::write(job.dir.join("stale.bin"), b"half-written").unwrap();
        fs::write(job.dir.join(MODEL_STATE), b"stale").unwrap();

        let backend = FakeBackend::default();
        let report = ResumableExecutor::new(&backend, 1).run(&jobs[..1]).unwrap();
        assert_eq!(report.completed, vec![job.dir.clone()]);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert!(!job.dir.join("stale.bin").exists());
        assert_ne!(fs::read(job.dir.join(MODEL_STATE)).unwrap(), b"stale");
        assert!(job.is_completed());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn hooks_log_progress_and_keep_the_best_checkpoint() {
        let root = temp_root("hooks");
        let jobs = lr_jobs(&root);
        let backend = FakeBackend {
            snapshots: 3,
            ..FakeBackend::default()
        };
        ResumableExecutor::new(&backend, 1).run(&jobs[..1]).unwrap();
        let dir = &jobs[0].dir;
        let progress = fs::read_to_string(dir.join(PROGRESS_LOG)).unwrap();
        assert_eq!(progress.lines().count(), 3);
        for line in progress.lines() {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(v["schema_version"], "progress_v1");
        }
        // the first snapshot had the best success rate
        assert_eq!(fs::read_to_string(dir.join(MODEL_STATE)).unwrap(), "{\"agent\":0}");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn failures_are_collected_and_other_jobs_complete() {
        let root = temp_root("failure");
        let jobs = lr_jobs(&root);
        let backend = FakeBackend {
            fail_token: Some("lr_0.01".to_string()),
            ..FakeBackend::default()
        };
        let err = ResumableExecutor::new(&backend, 2).run(&jobs).expect_err("batch fails");
        match &err {
            ExplError::Job { failures } => {
                assert_eq!(failures.len(), 2);
                assert!(failures.iter().all(|f| f.unit.contains("lr_0.01")));
                assert!(failures.iter().all(|f| f.message.contains("diverged")));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(jobs[0].is_completed());
        assert!(jobs[1].is_completed());
        assert!(!jobs[2].is_completed());
        assert!(!jobs[3].is_completed());
        assert!(jobs[2].dir.join(CONFIG_JSON).is_file());

        // a retry only redoes the failed jobs
        let healthy = FakeBackend::default();
        let report = ResumableExecutor::new(&healthy, 2).run(&jobs).unwrap();
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.completed.len(), 2);
        assert_eq!(healthy.calls.load(Ordering::SeqCst), 2);
        let _ = fs::remove_dir_all(root);
    }
}
