use crate::{
    cancel::CancelToken,
    engine::{IoGenerator, JobResult, JobStatus, UnitControl, UnitOutcome},
    job_spec::JobDescriptor,
};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Runs every descriptor as its own supervised thread and collects exactly
/// one `JobResult` per descriptor, in descriptor order.
pub struct ExecutorPool {
    generator: Arc<dyn IoGenerator>,
    poll: Duration,
    cancel_grace: Duration,
}

struct Report {
    index: usize,
    outcome: UnitOutcome,
    elapsed: Duration,
}

impl ExecutorPool {
    pub fn new(generator: Arc<dyn IoGenerator>, poll: Duration, cancel_grace: Duration) -> Self {
        Self {
            generator,
            poll,
            cancel_grace,
        }
    }

    /// Block until every unit reports, `deadline` passes, or `cancel` fires
    /// and the cancellation grace expires. Units still running at that point
    /// are abandoned, never waited on.
    pub fn run(
        &self,
        jobs: &[JobDescriptor],
        deadline: Instant,
        cancel: &CancelToken,
    ) -> Vec<JobResult> {
        let started = Instant::now();
        let (tx, rx) = mpsc::channel::<Report>();
        let mut slots: Vec<Option<JobResult>> = vec![None; jobs.len()];
        let mut pending = jobs.len();

        for (index, job) in jobs.iter().enumerate() {
            let generator = Arc::clone(&self.generator);
            let job_owned = job.clone();
            let ctl = UnitControl {
                deadline,
                cancel: cancel.clone(),
                poll: self.poll,
            };
            let tx = tx.clone();
            info!("starting job {} ({} MB/s)", job.id, job.rate_mbps);
            let spawned = std::thread::Builder::new()
                .name(format!("job-{index}"))
                .spawn(move || {
                    let t0 = Instant::now();
                    let outcome =
                        catch_unwind(AssertUnwindSafe(|| generator.run_job(&job_owned, &ctl)))
                            .unwrap_or_else(|_| {
                                UnitOutcome::Failed("job unit panicked".to_string())
                            });
                    // The pool may have given up on us already.
                    let _ = tx.send(Report {
                        index,
                        outcome,
                        elapsed: t0.elapsed(),
                    });
                });
            if let Err(err) = spawned {
                warn!("failed to spawn job {}: {err}", job.id);
                slots[index] = Some(to_result(
                    job,
                    UnitOutcome::Failed(format!("spawn job unit: {err}")),
                    Duration::ZERO,
                ));
                pending -= 1;
            }
        }
        drop(tx);

        let mut cancel_cutoff: Option<Instant> = None;
        while pending > 0 {
            match rx.recv_timeout(self.poll) {
                Ok(report) => {
                    if slots[report.index].is_none() {
                        let job = &jobs[report.index];
                        let result = to_result(job, report.outcome, report.elapsed);
                        log_result(&result);
                        slots[report.index] = Some(result);
                        pending -= 1;
                    }
                    continue;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }

            let now = Instant::now();
            if cancel.is_cancelled() {
                let cutoff = *cancel_cutoff.get_or_insert(now + self.cancel_grace);
                if now >= cutoff {
                    warn!("{pending} job unit(s) did not exit after cancellation; abandoning");
                    break;
                }
            }
            if now >= deadline {
                warn!("run deadline reached with {pending} job unit(s) outstanding");
                break;
            }
        }

        let deadline_passed = Instant::now() >= deadline;
        jobs.iter()
            .zip(slots)
            .map(|(job, slot)| {
                slot.unwrap_or_else(|| {
                    let outcome = if cancel.is_cancelled() && !deadline_passed {
                        UnitOutcome::Cancelled
                    } else {
                        UnitOutcome::TimedOut("no result by the run deadline".to_string())
                    };
                    let result = to_result(job, outcome, started.elapsed());
                    log_result(&result);
                    result
                })
            })
            .collect()
    }
}

fn to_result(job: &JobDescriptor, outcome: UnitOutcome, elapsed: Duration) -> JobResult {
    let mut result = JobResult {
        job_id: job.id.clone(),
        pattern_key: job.pattern_key.clone(),
        status: JobStatus::Success,
        iops: 0.0,
        throughput_mbps: 0.0,
        latency: None,
        error: None,
        elapsed_ms: elapsed.as_millis() as u64,
    };
    match outcome {
        UnitOutcome::Completed(m) => {
            result.iops = m.iops;
            result.throughput_mbps = m.throughput_mbps;
            result.latency = Some(m.latency);
        }
        UnitOutcome::Failed(msg) => {
            result.status = JobStatus::Failed;
            result.error = Some(msg);
        }
        UnitOutcome::TimedOut(msg) => {
            result.status = JobStatus::TimedOut;
            result.error = Some(msg);
        }
        UnitOutcome::Cancelled => {
            result.status = JobStatus::Cancelled;
            result.error = Some("cancelled before completion".to_string());
        }
    }
    result
}

fn log_result(r: &JobResult) {
    match r.status {
        JobStatus::Success => info!(
            "job {} done: iops={:.0} throughput={:.1}MB/s",
            r.job_id, r.iops, r.throughput_mbps
        ),
        _ => warn!(
            "job {} {:?}: {}",
            r.job_id,
            r.status,
            r.error.as_deref().unwrap_or("")
        ),
    }
}
