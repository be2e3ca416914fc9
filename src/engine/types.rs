use crate::cancel::CancelToken;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Failed,
    TimedOut,
    /// Interrupted by the run's cancellation signal before reaching a
    /// terminal outcome.
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Cancelled)
    }
}

/// Completion latency percentiles in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub p50_us: f64,
    pub p99_us: f64,
    pub p99_99_us: f64,
}

/// What the I/O tool measured for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetrics {
    pub iops: f64,
    pub throughput_mbps: f64,
    pub latency: LatencyPercentiles,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub pattern_key: String,
    pub status: JobStatus,
    pub iops: f64,
    pub throughput_mbps: f64,
    #[serde(default)]
    pub latency: Option<LatencyPercentiles>,
    #[serde(default)]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl JobResult {
    pub fn succeeded(&self) -> bool {
        self.status == JobStatus::Success
    }
}

/// How a collaborator invocation ended.
#[derive(Debug, Clone)]
pub enum UnitOutcome {
    Completed(JobMetrics),
    Failed(String),
    TimedOut(String),
    Cancelled,
}

/// Limits every job unit runs under.
#[derive(Debug, Clone)]
pub struct UnitControl {
    pub deadline: Instant,
    pub cancel: CancelToken,
    pub poll: Duration,
}

impl UnitControl {
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}
