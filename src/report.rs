use crate::{
    config::Config,
    engine::JobResult,
    profile::Targets,
    telemetry::{PowerSample, PowerSummary},
    util::ensure_dir,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Cancelled => "cancelled",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Everything one run produced. Built once by the coordinator and read-only
/// afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub profile_id: String,
    pub profile_name: String,
    pub capacity: String,
    pub state: RunState,
    pub started: String,
    pub finished: String,
    pub elapsed_ms: u64,
    pub io_tool: String,
    pub power_source: String,
    /// Targets the run is judged against, power ceiling already resolved.
    pub targets: Targets,
    pub jobs: Vec<JobResult>,
    /// Jobs that had not reached a terminal state when the run was cancelled.
    #[serde(default)]
    pub interrupted_jobs: Vec<String>,
    pub power: PowerSummary,
    #[serde(default)]
    pub power_samples: Vec<PowerSample>,
}

impl RunResult {
    pub fn job(&self, pattern_key: &str) -> Option<&JobResult> {
        self.jobs.iter().find(|j| j.pattern_key == pattern_key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Overall {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criterion {
    pub criterion: String,
    pub expected: String,
    pub actual: String,
    pub satisfied: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub overall: Overall,
    pub run_state: RunState,
    pub criteria: Vec<Criterion>,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        self.overall == Overall::Pass
    }

    pub fn criterion(&self, name: &str) -> Option<&Criterion> {
        self.criteria.iter().find(|c| c.criterion == name)
    }

    pub fn failures(&self) -> impl Iterator<Item = &Criterion> {
        self.criteria.iter().filter(|c| !c.satisfied)
    }
}

/// The durable artifact written per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultDocument {
    pub run: RunResult,
    pub verdict: Verdict,
}

impl ResultDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading result: {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing result: {}", path.display()))
    }

    pub fn write(&self, cfg: &Config, out_dir: &Path) -> Result<PathBuf> {
        ensure_dir(out_dir)?;
        let path = out_dir.join(format!(
            "{}_{}_{}_{}.json",
            cfg.output.result_filename_prefix,
            self.run.profile_id,
            self.run.capacity,
            self.run.run_id
        ));
        let raw = if cfg.output.pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        std::fs::write(&path, raw).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}
