use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub run: Run,
    #[serde(default)]
    pub io_tool: IoTool,
    #[serde(default)]
    pub telemetry: Telemetry,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub output: Output,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub print_summary: bool,
    pub require_confirmation: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            print_summary: true,
            require_confirmation: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    pub out_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            out_dir: "results".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Added to the longest job's runtime + ramp to form the global deadline.
    pub deadline_grace_seconds: u64,
    /// How long units get to report after cancellation before they are
    /// abandoned.
    pub cancel_grace_ms: u64,
    pub poll_interval_ms: u64,
}
impl Default for Run {
    fn default() -> Self {
        Self {
            deadline_grace_seconds: 300,
            cancel_grace_ms: 2000,
            poll_interval_ms: 50,
        }
    }
}
impl Run {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoTool {
    /// `fio` or `simulated`.
    pub kind: String,
    pub binary: String,
    pub ioengine: String,
    pub direct: bool,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub simulated: SimulatedIo,
}
impl Default for IoTool {
    fn default() -> Self {
        Self {
            kind: "fio".into(),
            binary: "fio".into(),
            ioengine: "libaio".into(),
            direct: true,
            extra_args: Vec::new(),
            env: Default::default(),
            simulated: Default::default(),
        }
    }
}

/// Scripted behaviour of the simulated I/O tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedIo {
    /// Fraction of the rate limit each job achieves.
    pub efficiency: f64,
    pub latency_p50_us: f64,
    pub latency_p99_us: f64,
    pub latency_p99_99_us: f64,
    /// Wall time each simulated job takes; 0 means use the job's duration.
    pub duration_ms: u64,
    #[serde(default)]
    pub fail_jobs: Vec<String>,
    #[serde(default)]
    pub hang_jobs: Vec<String>,
    #[serde(default)]
    pub missing_binary: bool,
    /// Per-pattern results keyed by pattern key (`read_4k`).
    #[serde(default)]
    pub overrides: BTreeMap<String, SimulatedJob>,
}
impl Default for SimulatedIo {
    fn default() -> Self {
        Self {
            efficiency: 1.0,
            latency_p50_us: 90.0,
            latency_p99_us: 450.0,
            latency_p99_99_us: 2000.0,
            duration_ms: 200,
            fail_jobs: Vec::new(),
            hang_jobs: Vec::new(),
            missing_binary: false,
            overrides: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulatedJob {
    #[serde(default)]
    pub iops: Option<f64>,
    #[serde(default)]
    pub throughput_mbps: Option<f64>,
    #[serde(default)]
    pub latency_p50_us: Option<f64>,
    #[serde(default)]
    pub latency_p99_us: Option<f64>,
    #[serde(default)]
    pub latency_p99_99_us: Option<f64>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Telemetry {
    /// `simulated` or `command`.
    pub source: String,
    pub interval_ms: u64,
    #[serde(default)]
    pub command: Vec<String>,
    pub command_timeout_ms: u64,
    #[serde(default)]
    pub simulated: SimulatedPower,
}
impl Default for Telemetry {
    fn default() -> Self {
        Self {
            source: "simulated".into(),
            interval_ms: 1000,
            command: Vec::new(),
            command_timeout_ms: 2000,
            simulated: Default::default(),
        }
    }
}
impl Telemetry {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedPower {
    pub base_watts: f64,
    pub amplitude_watts: f64,
    /// Samples per full triangle-wave period.
    pub period_samples: u32,
    /// Every read fails, as if the PMU were unreachable.
    pub fail: bool,
}
impl Default for SimulatedPower {
    fn default() -> Self {
        Self {
            base_watts: 10.5,
            amplitude_watts: 0.5,
            period_samples: 8,
            fail: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub write_result_json: bool,
    pub result_filename_prefix: String,
    pub pretty: bool,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            write_result_json: true,
            result_filename_prefix: "wlg".into(),
            pretty: true,
        }
    }
}
