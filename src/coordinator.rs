use crate::{
    cancel::CancelToken,
    config::Config,
    engine::{IoGenerator, JobResult, JobStatus},
    error::{BenchError, BenchResult},
    job_spec::JobPlan,
    pool::ExecutorPool,
    profile::WorkloadProfile,
    report::{RunResult, RunState},
    telemetry::{PowerSource, PowerSummary, Sampler},
    util::{now_rfc3339, run_id},
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Owns one run's lifecycle: `Idle -> Running -> {Completed, Cancelled, Failed}`.
pub struct Coordinator {
    cfg: Config,
    generator: Arc<dyn IoGenerator>,
    power: Arc<dyn PowerSource>,
    state: RunState,
}

impl Coordinator {
    pub fn new(cfg: &Config, generator: Arc<dyn IoGenerator>, power: Arc<dyn PowerSource>) -> Self {
        Self {
            cfg: cfg.clone(),
            generator,
            power,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Wall-clock budget for a plan: longest job plus the configured grace.
    pub fn run_budget(&self, plan: &JobPlan) -> Duration {
        Duration::from_secs(plan.max_duration_seconds() + self.cfg.run.deadline_grace_seconds)
    }

    pub fn run(
        &mut self,
        profile: &WorkloadProfile,
        capacity: &str,
        cancel: &CancelToken,
    ) -> BenchResult<RunResult> {
        let plan = JobPlan::compile(profile, capacity)?;
        self.execute(profile, &plan, cancel)
    }

    /// Run an already compiled plan. Only config and setup problems are
    /// returned as errors; job failures and missing telemetry land in the
    /// result.
    pub fn execute(
        &mut self,
        profile: &WorkloadProfile,
        plan: &JobPlan,
        cancel: &CancelToken,
    ) -> BenchResult<RunResult> {
        if self.state != RunState::Idle {
            return Err(BenchError::config(format!(
                "coordinator already used (state={})",
                self.state
            )));
        }
        if plan.jobs.is_empty() {
            return Err(BenchError::config("plan contains no jobs"));
        }

        let run_start = Instant::now();
        let started = now_rfc3339();
        let deadline = run_start + self.run_budget(plan);
        self.transition(RunState::Running);

        match self.generator.preflight() {
            Ok(version) => info!("io tool {} ready: {}", self.generator.name(), version),
            Err(err) => {
                self.transition(RunState::Failed);
                error!("io tool preflight failed: {err:#}");
                return Err(BenchError::setup(format!(
                    "io tool {} unavailable: {err:#}",
                    self.generator.name()
                )));
            }
        }

        let sampler = Sampler::new(
            Arc::clone(&self.power),
            self.cfg.telemetry.interval(),
            self.cfg.run.poll_interval(),
        )
        .with_stop_grace(self.cfg.run.cancel_grace());
        let sampling = match sampler.start(run_start, cancel) {
            Ok(handle) => handle,
            Err(err) => {
                self.transition(RunState::Failed);
                return Err(BenchError::setup(format!("{err:#}")));
            }
        };

        info!(
            "running {} jobs for profile {} ({}) budget={:?}",
            plan.jobs.len(),
            profile.profile_id,
            plan.capacity,
            deadline - run_start
        );
        let pool = ExecutorPool::new(
            Arc::clone(&self.generator),
            self.cfg.run.poll_interval(),
            self.cfg.run.cancel_grace(),
        );
        let results = pool.run(&plan.jobs, deadline, cancel);

        let log = sampling.stop().unwrap_or_else(|err| {
            warn!("power sampler lost: {err:#}");
            Default::default()
        });
        let power = PowerSummary::from_log(&log);
        if !power.is_available() {
            warn!("no power samples collected; power summary unavailable");
        }

        let interrupted: Vec<String> = results
            .iter()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.job_id.clone())
            .collect();
        let state = if cancel.is_cancelled() && !interrupted.is_empty() {
            RunState::Cancelled
        } else {
            RunState::Completed
        };
        let jobs: Vec<JobResult> = match state {
            RunState::Cancelled => results
                .into_iter()
                .filter(|r| r.status.is_terminal())
                .collect(),
            _ => results,
        };
        self.transition(state);

        let failed = jobs.iter().filter(|j| j.status != JobStatus::Success).count();
        info!(
            "run {}: {} job results ({} not successful), {} interrupted",
            state,
            jobs.len(),
            failed,
            interrupted.len()
        );

        let mut targets = profile.targets.clone();
        targets.power_watts_max = profile.power_target();

        Ok(RunResult {
            run_id: run_id(&profile.profile_id, &plan.capacity, &started),
            profile_id: profile.profile_id.clone(),
            profile_name: profile.profile_name.clone(),
            capacity: plan.capacity.clone(),
            state,
            started,
            finished: now_rfc3339(),
            elapsed_ms: run_start.elapsed().as_millis() as u64,
            io_tool: self.generator.name().to_string(),
            power_source: self.power.name().to_string(),
            targets,
            jobs,
            interrupted_jobs: interrupted,
            power,
            power_samples: log.samples,
        })
    }

    fn transition(&mut self, next: RunState) {
        info!("run state {} -> {}", self.state, next);
        self.state = next;
    }
}
