pub mod fio;
pub mod process;
pub mod simulated;
pub mod types;

use crate::{config::Config, job_spec::JobDescriptor};
use anyhow::{Result, anyhow};
use std::sync::Arc;

pub use types::{JobMetrics, JobResult, JobStatus, LatencyPercentiles, UnitControl, UnitOutcome};

/// The external I/O generation tool. One `run_job` call per descriptor,
/// possibly from many threads at once.
pub trait IoGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Confirm the tool is reachable before any job starts. Returns a short
    /// description (e.g. version string).
    fn preflight(&self) -> Result<String>;

    /// Run one job to completion, honouring `ctl.deadline` and `ctl.cancel`.
    fn run_job(&self, job: &JobDescriptor, ctl: &UnitControl) -> UnitOutcome;
}

pub fn from_config(cfg: &Config) -> Result<Arc<dyn IoGenerator>> {
    match cfg.io_tool.kind.as_str() {
        "fio" => Ok(Arc::new(fio::FioGenerator::new(cfg))),
        "simulated" => Ok(Arc::new(simulated::SimulatedGenerator::new(
            cfg.io_tool.simulated.clone(),
        ))),
        other => Err(anyhow!("unknown io_tool.kind: {other}")),
    }
}
