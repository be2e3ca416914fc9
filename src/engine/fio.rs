use super::{
    IoGenerator,
    process::{ProcessExit, run_supervised},
    types::*,
};
use crate::{cancel::CancelToken, config::Config, job_spec::JobDescriptor, profile::IoType};
use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};
use tracing::debug;

const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct FioGenerator {
    binary: PathBuf,
    ioengine: String,
    direct: bool,
    extra_args: Vec<String>,
    env: Vec<(String, String)>,
}

impl FioGenerator {
    pub fn new(cfg: &Config) -> Self {
        Self {
            binary: PathBuf::from(&cfg.io_tool.binary),
            ioengine: cfg.io_tool.ioengine.clone(),
            direct: cfg.io_tool.direct,
            extra_args: cfg.io_tool.extra_args.clone(),
            env: cfg
                .io_tool
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }

    pub fn job_args(&self, job: &JobDescriptor) -> Vec<String> {
        let rw = match job.io_type {
            IoType::Read => "randread",
            IoType::Write => "randwrite",
        };
        let mut args = vec![
            "--output-format=json".to_string(),
            format!("--name={}", job.id),
            format!("--rw={rw}"),
            format!("--bs={}", job.block_size),
            format!("--iodepth={}", job.queue_depth),
            "--numjobs=1".to_string(),
            format!("--filename={}", job.target_path),
            "--size=100%".to_string(),
            format!("--rate={}k", job.rate_kib()),
            "--time_based=1".to_string(),
            format!("--runtime={}", job.runtime_seconds),
            format!("--ramp_time={}", job.ramp_seconds),
            format!("--ioengine={}", self.ioengine),
            format!("--direct={}", u8::from(self.direct)),
            "--lat_percentiles=1".to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

impl IoGenerator for FioGenerator {
    fn name(&self) -> &str {
        "fio"
    }

    fn preflight(&self) -> Result<String> {
        let mut cmd = self.command();
        cmd.arg("--version");
        let exit = run_supervised(
            cmd,
            Instant::now() + PREFLIGHT_TIMEOUT,
            &CancelToken::new(),
            Duration::from_millis(20),
        )
        .with_context(|| format!("io tool not runnable: {}", self.binary.display()))?;
        match exit {
            ProcessExit::Exited(out) if out.status.success() => {
                Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
            }
            ProcessExit::Exited(out) => Err(anyhow!(
                "{} --version exited with {}: {}",
                self.binary.display(),
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )),
            _ => Err(anyhow!("{} --version did not finish", self.binary.display())),
        }
    }

    fn run_job(&self, job: &JobDescriptor, ctl: &UnitControl) -> UnitOutcome {
        let mut cmd = self.command();
        cmd.args(self.job_args(job));
        debug!("fio {:?}", self.job_args(job));

        let exit = match run_supervised(cmd, ctl.deadline, &ctl.cancel, ctl.poll) {
            Ok(exit) => exit,
            Err(err) => return UnitOutcome::Failed(format!("{err:#}")),
        };

        match exit {
            ProcessExit::Cancelled => UnitOutcome::Cancelled,
            ProcessExit::TimedOut { stderr } => UnitOutcome::TimedOut(format!(
                "fio exceeded the run deadline; stderr: {}",
                stderr.trim()
            )),
            ProcessExit::Exited(out) if !out.status.success() => UnitOutcome::Failed(format!(
                "fio exited with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )),
            ProcessExit::Exited(out) => match parse_fio_json(&out.stdout, job.io_type) {
                Ok(metrics) => UnitOutcome::Completed(metrics),
                Err(err) => UnitOutcome::Failed(format!("{err:#}")),
            },
        }
    }
}

/// Extract metrics for `io_type` from fio's `--output-format=json` report.
pub fn parse_fio_json(raw: &[u8], io_type: IoType) -> Result<JobMetrics> {
    // fio may print warnings before the JSON document.
    let start = raw
        .iter()
        .position(|&b| b == b'{')
        .ok_or_else(|| anyhow!("fio output contains no JSON"))?;
    let doc: Value =
        serde_json::from_slice(&raw[start..]).with_context(|| "parsing fio JSON output")?;

    let job = doc
        .get("jobs")
        .and_then(|j| j.get(0))
        .ok_or_else(|| anyhow!("fio JSON has no jobs"))?;

    if let Some(code) = job.get("error").and_then(Value::as_i64) {
        if code != 0 {
            return Err(anyhow!("fio reported job error code {code}"));
        }
    }

    let side = job
        .get(io_type.as_str())
        .ok_or_else(|| anyhow!("fio JSON has no {io_type} section"))?;
    let iops = side.get("iops").and_then(Value::as_f64).unwrap_or(0.0);
    // fio's bw is KiB/s.
    let bw_kib = side.get("bw").and_then(Value::as_f64).unwrap_or(0.0);

    let percentiles = ["lat_ns", "clat_ns"]
        .iter()
        .find_map(|k| side.get(*k).and_then(|l| l.get("percentile")))
        .ok_or_else(|| anyhow!("fio JSON has no latency percentiles for {io_type}"))?;
    let pct_us = |key: &str| -> Result<f64> {
        percentiles
            .get(key)
            .and_then(Value::as_f64)
            .map(|ns| ns / 1000.0)
            .ok_or_else(|| anyhow!("missing latency percentile {key}"))
    };

    Ok(JobMetrics {
        iops,
        throughput_mbps: bw_kib / 1024.0,
        latency: LatencyPercentiles {
            p50_us: pct_us("50.000000")?,
            p99_us: pct_us("99.000000")?,
            p99_99_us: pct_us("99.990000")?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"fio: note: both iodepth >= 1 and synchronous I/O engine
{
  "fio version": "fio-3.36",
  "jobs": [
    {
      "jobname": "profile1_read_4k_64TB",
      "error": 0,
      "read": {
        "iops": 512000.5,
        "bw": 2048000,
        "lat_ns": {
          "percentile": {
            "50.000000": 88064,
            "99.000000": 436224,
            "99.990000": 1990656
          }
        }
      },
      "write": { "iops": 0.0, "bw": 0 }
    }
  ]
}"#;

    #[test]
    fn parses_read_side_after_warning_preamble() {
        let m = parse_fio_json(SAMPLE.as_bytes(), IoType::Read).unwrap();
        assert_eq!(m.iops, 512000.5);
        assert_eq!(m.throughput_mbps, 2000.0);
        assert!((m.latency.p50_us - 88.064).abs() < 1e-9);
        assert!((m.latency.p99_99_us - 1990.656).abs() < 1e-9);
    }

    #[test]
    fn missing_percentiles_is_an_error() {
        assert!(parse_fio_json(SAMPLE.as_bytes(), IoType::Write).is_err());
    }

    #[test]
    fn job_error_code_is_an_error() {
        let raw = r#"{"jobs":[{"error":5,"read":{"iops":1.0,"bw":1}}]}"#;
        let err = parse_fio_json(raw.as_bytes(), IoType::Read).unwrap_err();
        assert!(err.to_string().contains("error code 5"));
    }
}
