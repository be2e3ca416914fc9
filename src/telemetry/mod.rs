pub mod sampler;
pub mod source;

use crate::config::Config;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use sampler::{SampleLog, Sampler, SamplerHandle};

/// Out-of-band power measurement. Must be cheap to call repeatedly.
pub trait PowerSource: Send + Sync {
    fn name(&self) -> &str;
    fn read_watts(&self) -> Result<f64>;
}

pub fn source_from_config(cfg: &Config) -> Result<Arc<dyn PowerSource>> {
    match cfg.telemetry.source.as_str() {
        "simulated" => Ok(Arc::new(source::SimulatedPower::new(
            cfg.telemetry.simulated.clone(),
        ))),
        "command" => Ok(Arc::new(source::CommandPower::new(
            &cfg.telemetry.command,
            cfg.telemetry.command_timeout_ms,
        )?)),
        other => Err(anyhow!("unknown telemetry.source: {other}")),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerSample {
    /// Microseconds since run start; strictly increasing.
    pub offset_us: u64,
    pub timestamp: String,
    pub watts: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PowerSummary {
    Available {
        avg_watts: f64,
        p99_watts: f64,
        max_watts: f64,
        min_watts: f64,
        sample_count: usize,
    },
    /// No sample could be collected.
    Unavailable { failed_reads: u64 },
}

impl PowerSummary {
    pub fn from_log(log: &SampleLog) -> Self {
        if log.samples.is_empty() {
            return PowerSummary::Unavailable {
                failed_reads: log.failed_reads,
            };
        }
        let mut watts: Vec<f64> = log.samples.iter().map(|s| s.watts).collect();
        watts.sort_by(f64::total_cmp);
        let n = watts.len();
        let sum: f64 = watts.iter().sum();
        let p99_idx = ((n as f64 * 0.99) as usize).min(n - 1);
        PowerSummary::Available {
            avg_watts: sum / n as f64,
            p99_watts: watts[p99_idx],
            max_watts: watts[n - 1],
            min_watts: watts[0],
            sample_count: n,
        }
    }

    pub fn avg_watts(&self) -> Option<f64> {
        match self {
            PowerSummary::Available { avg_watts, .. } => Some(*avg_watts),
            PowerSummary::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, PowerSummary::Available { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_of(watts: &[f64]) -> SampleLog {
        SampleLog {
            samples: watts
                .iter()
                .enumerate()
                .map(|(i, w)| PowerSample {
                    offset_us: i as u64 * 1000,
                    timestamp: String::new(),
                    watts: *w,
                })
                .collect(),
            failed_reads: 0,
        }
    }

    #[test]
    fn empty_log_is_unavailable() {
        let mut log = log_of(&[]);
        log.failed_reads = 7;
        assert_eq!(
            PowerSummary::from_log(&log),
            PowerSummary::Unavailable { failed_reads: 7 }
        );
    }

    #[test]
    fn p99_uses_nearest_rank_index() {
        let watts: Vec<f64> = (1..=200).map(f64::from).collect();
        match PowerSummary::from_log(&log_of(&watts)) {
            PowerSummary::Available {
                p99_watts,
                max_watts,
                min_watts,
                avg_watts,
                sample_count,
            } => {
                // floor(200 * 0.99) = 198 -> 199.0
                assert_eq!(p99_watts, 199.0);
                assert_eq!(max_watts, 200.0);
                assert_eq!(min_watts, 1.0);
                assert_eq!(avg_watts, 100.5);
                assert_eq!(sample_count, 200);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn single_sample_summary() {
        let s = PowerSummary::from_log(&log_of(&[10.8]));
        assert_eq!(s.avg_watts(), Some(10.8));
    }
}
