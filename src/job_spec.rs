use crate::{
    error::{BenchError, BenchResult},
    profile::{IoPattern, IoType, WorkloadProfile},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

const PERCENT_TOLERANCE: f64 = 1e-6;

const BLOCK_SIZE_PATTERN: &str = r"(?i)^\s*(\d+)\s*([kmg]?)i?b?\s*$";

/// One self-contained unit of I/O work. Never mutated after compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: String,
    pub pattern_key: String,
    pub io_type: IoType,
    pub block_size: String,
    pub block_bytes: u64,
    pub percentage: f64,
    pub queue_depth: u32,
    pub rate_mbps: f64,
    pub runtime_seconds: u64,
    pub ramp_seconds: u64,
    pub target_path: String,
}

impl JobDescriptor {
    /// Rate limit in the I/O tool's unit (KiB/s, fio `k` suffix), treating
    /// the profile's MB/s the way fio reads an `m` suffix.
    pub fn rate_kib(&self) -> u64 {
        (self.rate_mbps * 1024.0).round() as u64
    }

    pub fn duration_seconds(&self) -> u64 {
        self.runtime_seconds + self.ramp_seconds
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPlan {
    pub profile_id: String,
    pub capacity: String,
    pub jobs: Vec<JobDescriptor>,
}

impl JobPlan {
    /// Compile a profile into one descriptor per declared pattern, rates
    /// taken from the capacity tier's per-type throughput budget.
    ///
    /// The read/write mix is only approximated by independent rate limits;
    /// jobs sharing a device may drift from the requested ratio.
    pub fn compile(profile: &WorkloadProfile, capacity: &str) -> BenchResult<Self> {
        if profile.io_patterns.is_empty() {
            return Err(BenchError::config("profile declares no io_patterns"));
        }
        if profile.runtime_seconds == 0 {
            return Err(BenchError::config("runtime_seconds must be > 0"));
        }
        let target_path = profile.target_path().ok_or_else(|| {
            BenchError::config("profile has neither test_environment nor device.path")
        })?;

        validate_percentages(&profile.io_patterns)?;

        let tier = profile.throughput_targets.get(capacity).ok_or_else(|| {
            BenchError::config(format!(
                "capacity tier {capacity:?} has no throughput targets (known: {:?})",
                profile.throughput_targets.keys().collect::<Vec<_>>()
            ))
        })?;

        let mut seen = BTreeSet::new();
        let mut jobs = Vec::with_capacity(profile.io_patterns.len());
        for pattern in &profile.io_patterns {
            let key = pattern.key();
            if !seen.insert(key.clone()) {
                return Err(BenchError::config(format!("duplicate io pattern: {key}")));
            }
            let block_bytes = parse_block_size(&pattern.block_size)?;
            let total = tier.total_for(pattern.io_type).ok_or_else(|| {
                BenchError::config(format!(
                    "capacity tier {capacity:?} defines no {}_total_mbps",
                    pattern.io_type
                ))
            })?;
            if !(total.is_finite() && total > 0.0) {
                return Err(BenchError::config(format!(
                    "capacity tier {capacity:?}: {}_total_mbps must be > 0, got {total}",
                    pattern.io_type
                )));
            }
            if pattern.queue_depth == 0 {
                return Err(BenchError::config(format!("{key}: queue_depth must be > 0")));
            }

            let desc = JobDescriptor {
                id: format!("profile{}_{}_{}", profile.profile_id, key, capacity),
                pattern_key: key,
                io_type: pattern.io_type,
                block_size: pattern.block_size.clone(),
                block_bytes,
                percentage: pattern.percentage,
                queue_depth: pattern.queue_depth,
                rate_mbps: total * pattern.percentage / 100.0,
                runtime_seconds: profile.runtime_seconds,
                ramp_seconds: profile.ramp_seconds,
                target_path: target_path.clone(),
            };
            // fio treats a zero rate as unlimited.
            if desc.rate_kib() == 0 {
                return Err(BenchError::config(format!(
                    "{}: rate {} MB/s rounds to 0 KiB/s",
                    desc.id, desc.rate_mbps
                )));
            }
            debug!(
                "compiled job {} rate={:.1}MB/s bs={} qd={}",
                desc.id, desc.rate_mbps, desc.block_size, desc.queue_depth
            );
            jobs.push(desc);
        }

        for bound in &profile.targets.qos {
            let key = bound.key();
            if !seen.contains(&key) {
                return Err(BenchError::config(format!(
                    "qos target {key} matches no io pattern"
                )));
            }
        }

        Ok(Self {
            profile_id: profile.profile_id.clone(),
            capacity: capacity.to_string(),
            jobs,
        })
    }

    /// Sum of descriptor rate limits per I/O type.
    pub fn totals_by_type(&self) -> BTreeMap<IoType, f64> {
        let mut totals = BTreeMap::new();
        for job in &self.jobs {
            *totals.entry(job.io_type).or_insert(0.0) += job.rate_mbps;
        }
        totals
    }

    /// Longest job duration, runtime plus ramp.
    pub fn max_duration_seconds(&self) -> u64 {
        self.jobs
            .iter()
            .map(JobDescriptor::duration_seconds)
            .max()
            .unwrap_or(0)
    }
}

fn validate_percentages(patterns: &[IoPattern]) -> BenchResult<()> {
    let mut sums: BTreeMap<IoType, f64> = BTreeMap::new();
    for p in patterns {
        if !(p.percentage > 0.0 && p.percentage <= 100.0) {
            return Err(BenchError::config(format!(
                "{}: percentage out of range (0, 100]: {}",
                p.key(),
                p.percentage
            )));
        }
        *sums.entry(p.io_type).or_insert(0.0) += p.percentage;
    }
    for (io_type, sum) in sums {
        if (sum - 100.0).abs() > PERCENT_TOLERANCE {
            return Err(BenchError::config(format!(
                "{io_type} pattern percentages must sum to 100, got {sum}"
            )));
        }
    }
    Ok(())
}

/// Parse `4k`, `256K`, `1m`, `512` (bytes) into a byte count, 1024-based.
pub fn parse_block_size(raw: &str) -> BenchResult<u64> {
    let re = Regex::new(BLOCK_SIZE_PATTERN)
        .map_err(|e| BenchError::config(format!("block_size pattern: {e}")))?;
    let caps = re
        .captures(raw)
        .ok_or_else(|| BenchError::config(format!("malformed block_size: {raw:?}")))?;
    let n: u64 = caps[1]
        .parse()
        .map_err(|_| BenchError::config(format!("block_size out of range: {raw:?}")))?;
    let mult = match caps[2].to_ascii_lowercase().as_str() {
        "k" => 1 << 10,
        "m" => 1 << 20,
        "g" => 1 << 30,
        _ => 1,
    };
    let bytes = n
        .checked_mul(mult)
        .ok_or_else(|| BenchError::config(format!("block_size out of range: {raw:?}")))?;
    if bytes == 0 {
        return Err(BenchError::config(format!("block_size must be > 0: {raw:?}")));
    }
    Ok(bytes)
}
