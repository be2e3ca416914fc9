use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// A named benchmark configuration. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadProfile {
    pub profile_id: String,
    pub profile_name: String,
    pub io_patterns: Vec<IoPattern>,
    pub power_limit_watts: f64,
    pub runtime_seconds: u64,
    #[serde(default)]
    pub ramp_seconds: u64,
    #[serde(default)]
    pub test_environment: Option<TestEnvironment>,
    #[serde(default)]
    pub device: Option<Device>,
    #[serde(default)]
    pub throughput_targets: BTreeMap<String, TierTargets>,
    #[serde(default)]
    pub targets: Targets,
}

impl WorkloadProfile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading profile: {}", path.display()))?;
        let profile: WorkloadProfile = serde_json::from_str(&raw)
            .with_context(|| format!("parsing profile JSON: {}", path.display()))?;
        Ok(profile)
    }

    /// File or device every job of this profile targets.
    pub fn target_path(&self) -> Option<String> {
        if let Some(env) = &self.test_environment {
            let mount = env.mount_point.trim_end_matches('/');
            return Some(format!("{}/{}", mount, env.test_file));
        }
        self.device.as_ref().map(|d| d.path.clone())
    }

    /// Power ceiling the evaluator applies: the explicit target, else the
    /// profile's power budget.
    pub fn power_target(&self) -> Option<f64> {
        if let Some(max) = self.targets.power_watts_max {
            return Some(max);
        }
        (self.power_limit_watts > 0.0).then_some(self.power_limit_watts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoType {
    Read,
    Write,
}

impl IoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IoType::Read => "read",
            IoType::Write => "write",
        }
    }
}

impl fmt::Display for IoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoPattern {
    #[serde(rename = "type")]
    pub io_type: IoType,
    pub block_size: String,
    pub percentage: f64,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: u32,
}

fn default_queue_depth() -> u32 {
    32
}

impl IoPattern {
    /// Stable key tying a pattern, its job and its QoS bound together.
    pub fn key(&self) -> String {
        format!("{}_{}", self.io_type, self.block_size.to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestEnvironment {
    pub mount_point: String,
    pub test_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub path: String,
}

/// Per-capacity-tier throughput budget, MB/s per I/O type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierTargets {
    #[serde(default)]
    pub read_total_mbps: Option<f64>,
    #[serde(default)]
    pub write_total_mbps: Option<f64>,
}

impl TierTargets {
    pub fn total_for(&self, io_type: IoType) -> Option<f64> {
        match io_type {
            IoType::Read => self.read_total_mbps,
            IoType::Write => self.write_total_mbps,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Targets {
    #[serde(default)]
    pub iops_min: Option<f64>,
    #[serde(default)]
    pub throughput_mbps_min: Option<f64>,
    #[serde(default)]
    pub power_watts_max: Option<f64>,
    #[serde(default)]
    pub latency_p99_us_max: Option<f64>,
    #[serde(default)]
    pub qos: Vec<QosBound>,
}

/// Latency ceilings for one pattern, in microseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QosBound {
    #[serde(rename = "type")]
    pub io_type: IoType,
    pub block_size: String,
    #[serde(default)]
    pub p50_us_max: Option<f64>,
    #[serde(default)]
    pub p99_us_max: Option<f64>,
    #[serde(default)]
    pub p99_99_us_max: Option<f64>,
}

impl QosBound {
    pub fn key(&self) -> String {
        format!("{}_{}", self.io_type, self.block_size.to_ascii_lowercase())
    }
}
