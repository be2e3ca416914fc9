use super::PowerSource;
use crate::{
    cancel::CancelToken,
    config,
    engine::process::{ProcessExit, run_supervised},
};
use anyhow::{Context, Result, anyhow};
use regex::Regex;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Deterministic triangle wave around `base_watts`.
pub struct SimulatedPower {
    cfg: config::SimulatedPower,
    tick: AtomicU64,
}

impl SimulatedPower {
    pub fn new(cfg: config::SimulatedPower) -> Self {
        Self {
            cfg,
            tick: AtomicU64::new(0),
        }
    }
}

impl PowerSource for SimulatedPower {
    fn name(&self) -> &str {
        "simulated"
    }

    fn read_watts(&self) -> Result<f64> {
        if self.cfg.fail {
            return Err(anyhow!("simulated PMU unreachable"));
        }
        let period = u64::from(self.cfg.period_samples.max(1));
        let i = self.tick.fetch_add(1, Ordering::Relaxed) % period;
        let x = i as f64 / period as f64;
        let tri = 4.0 * (x - 0.5).abs() - 1.0;
        Ok(self.cfg.base_watts + self.cfg.amplitude_watts * tri)
    }
}

/// Runs an external PMU reader per sample and takes the first number it
/// prints as watts.
pub struct CommandPower {
    argv: Vec<String>,
    timeout: Duration,
    number: Regex,
}

impl CommandPower {
    pub fn new(argv: &[String], timeout_ms: u64) -> Result<Self> {
        if argv.is_empty() {
            return Err(anyhow!("telemetry.command is empty"));
        }
        Ok(Self {
            argv: argv.to_vec(),
            timeout: Duration::from_millis(timeout_ms.max(1)),
            number: Regex::new(r"[-+]?\d+(?:\.\d+)?")?,
        })
    }

    pub fn parse_watts(&self, stdout: &str) -> Result<f64> {
        let m = self
            .number
            .find(stdout)
            .ok_or_else(|| anyhow!("no number in PMU output: {:?}", stdout.trim()))?;
        m.as_str()
            .parse::<f64>()
            .with_context(|| format!("parsing watts: {}", m.as_str()))
    }
}

impl PowerSource for CommandPower {
    fn name(&self) -> &str {
        "command"
    }

    fn read_watts(&self) -> Result<f64> {
        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..]);
        let exit = run_supervised(
            cmd,
            Instant::now() + self.timeout,
            &CancelToken::new(),
            Duration::from_millis(10),
        )?;
        match exit {
            ProcessExit::Exited(out) if out.status.success() => {
                self.parse_watts(&String::from_utf8_lossy(&out.stdout))
            }
            ProcessExit::Exited(out) => Err(anyhow!(
                "PMU command exited with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )),
            ProcessExit::TimedOut { .. } => {
                Err(anyhow!("PMU command exceeded {:?}", self.timeout))
            }
            ProcessExit::Cancelled => Err(anyhow!("PMU command cancelled")),
        }
    }
}
