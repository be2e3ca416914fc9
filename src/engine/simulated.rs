use super::{IoGenerator, types::*};
use crate::{config::SimulatedIo, job_spec::JobDescriptor};
use anyhow::{Result, anyhow};
use std::time::{Duration, Instant};
use tracing::debug;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Deterministic stand-in for the I/O tool. Each job "runs" for a scripted
/// wall time and reports its rate limit (scaled by `efficiency`) unless a
/// per-pattern override says otherwise.
pub struct SimulatedGenerator {
    cfg: SimulatedIo,
}

impl SimulatedGenerator {
    pub fn new(cfg: SimulatedIo) -> Self {
        Self { cfg }
    }

    fn matches(list: &[String], job: &JobDescriptor) -> bool {
        list.iter().any(|s| s == &job.id || s == &job.pattern_key)
    }

    fn metrics_for(&self, job: &JobDescriptor) -> JobMetrics {
        let ov = self.cfg.overrides.get(&job.pattern_key);
        let throughput_mbps = ov
            .and_then(|o| o.throughput_mbps)
            .unwrap_or(job.rate_mbps * self.cfg.efficiency);
        let iops = ov
            .and_then(|o| o.iops)
            .unwrap_or(throughput_mbps * BYTES_PER_MB / job.block_bytes as f64);
        JobMetrics {
            iops,
            throughput_mbps,
            latency: LatencyPercentiles {
                p50_us: ov
                    .and_then(|o| o.latency_p50_us)
                    .unwrap_or(self.cfg.latency_p50_us),
                p99_us: ov
                    .and_then(|o| o.latency_p99_us)
                    .unwrap_or(self.cfg.latency_p99_us),
                p99_99_us: ov
                    .and_then(|o| o.latency_p99_99_us)
                    .unwrap_or(self.cfg.latency_p99_99_us),
            },
        }
    }

    fn wall_time(&self, job: &JobDescriptor) -> Duration {
        let ms = self
            .cfg
            .overrides
            .get(&job.pattern_key)
            .and_then(|o| o.duration_ms)
            .unwrap_or(self.cfg.duration_ms);
        if ms > 0 {
            Duration::from_millis(ms)
        } else {
            Duration::from_secs(job.duration_seconds())
        }
    }
}

impl IoGenerator for SimulatedGenerator {
    fn name(&self) -> &str {
        "simulated"
    }

    fn preflight(&self) -> Result<String> {
        if self.cfg.missing_binary {
            return Err(anyhow!("simulated io tool: binary not found"));
        }
        Ok("simulated-io 1.0".to_string())
    }

    fn run_job(&self, job: &JobDescriptor, ctl: &UnitControl) -> UnitOutcome {
        if Self::matches(&self.cfg.hang_jobs, job) {
            // Unresponsive collaborator: ignores both the deadline and
            // cancellation.
            debug!("simulated job {} hanging", job.id);
            std::thread::sleep(Duration::from_secs(3600));
            return UnitOutcome::Failed("simulated hang ended".to_string());
        }

        let finish = Instant::now() + self.wall_time(job);
        let until = finish.min(ctl.deadline);
        if ctl.cancel.sleep_until(until, ctl.poll) {
            return UnitOutcome::Cancelled;
        }
        if finish > ctl.deadline {
            return UnitOutcome::TimedOut(format!(
                "simulated job {} still running at the deadline",
                job.id
            ));
        }

        if Self::matches(&self.cfg.fail_jobs, job) {
            return UnitOutcome::Failed(format!(
                "simulated io tool exited with status 1 for {}",
                job.id
            ));
        }
        UnitOutcome::Completed(self.metrics_for(job))
    }
}
