use super::{PowerSample, PowerSource};
use crate::{cancel::CancelToken, util::now_rfc3339};
use anyhow::{Context, Result, anyhow};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Samples collected over one run window.
#[derive(Debug, Clone, Default)]
pub struct SampleLog {
    pub samples: Vec<PowerSample>,
    pub failed_reads: u64,
}

/// Polls a power source on a fixed interval, independent of job progress.
pub struct Sampler {
    source: Arc<dyn PowerSource>,
    interval: Duration,
    poll: Duration,
    stop_grace: Duration,
}

pub struct SamplerHandle {
    stop: CancelToken,
    log: Arc<Mutex<SampleLog>>,
    thread: JoinHandle<()>,
    poll: Duration,
    grace: Duration,
}

impl Sampler {
    pub fn new(source: Arc<dyn PowerSource>, interval: Duration, poll: Duration) -> Self {
        Self {
            source,
            interval,
            poll: poll.min(interval),
            stop_grace: Duration::from_secs(2),
        }
    }

    /// How long `SamplerHandle::stop` waits for an in-flight read before
    /// abandoning the sampler thread.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Start sampling now. The first sample is taken immediately; sampling
    /// ends on `SamplerHandle::stop` or when `run_cancel` fires.
    pub fn start(&self, run_start: Instant, run_cancel: &CancelToken) -> Result<SamplerHandle> {
        let stop = CancelToken::new();
        let log = Arc::new(Mutex::new(SampleLog::default()));
        let source = Arc::clone(&self.source);
        let interval = self.interval;
        let poll = self.poll;
        let stop_flag = stop.clone();
        let shared = Arc::clone(&log);
        let run_cancel = run_cancel.clone();

        info!(
            "power sampling started source={} interval={:?}",
            source.name(),
            interval
        );
        let thread = std::thread::Builder::new()
            .name("power-sampler".to_string())
            .spawn(move || {
                sample_loop(
                    source.as_ref(),
                    run_start,
                    interval,
                    poll,
                    &stop_flag,
                    &run_cancel,
                    &shared,
                )
            })
            .with_context(|| "spawning power sampler")?;

        Ok(SamplerHandle {
            stop,
            log,
            thread,
            poll,
            grace: self.stop_grace,
        })
    }
}

impl SamplerHandle {
    /// Halt sampling and return what was collected. A read stuck in the
    /// power source is abandoned after the stop grace; its sample, if it
    /// ever arrives, is discarded.
    pub fn stop(self) -> Result<SampleLog> {
        self.stop.cancel();
        let cutoff = Instant::now() + self.grace.max(self.poll * 2);
        while !self.thread.is_finished() && Instant::now() < cutoff {
            std::thread::sleep(self.poll);
        }
        if self.thread.is_finished() {
            self.thread
                .join()
                .map_err(|_| anyhow!("power sampler thread panicked"))?;
        } else {
            warn!(
                "power source did not return within {:?}; abandoning sampler",
                self.grace
            );
        }
        let log = take_log(&self.log);
        info!(
            "power sampling stopped: {} samples, {} failed reads",
            log.samples.len(),
            log.failed_reads
        );
        Ok(log)
    }
}

fn take_log(log: &Mutex<SampleLog>) -> SampleLog {
    match log.lock() {
        Ok(mut l) => std::mem::take(&mut *l),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    }
}

fn sample_loop(
    source: &dyn PowerSource,
    run_start: Instant,
    interval: Duration,
    poll: Duration,
    stop: &CancelToken,
    run_cancel: &CancelToken,
    log: &Mutex<SampleLog>,
) {
    let mut next = Instant::now();
    let mut last_offset: Option<u64> = None;
    let mut failed_reads = 0u64;
    let halted = || stop.is_cancelled() || run_cancel.is_cancelled();

    loop {
        if halted() {
            return;
        }
        let read = source.read_watts();
        {
            let Ok(mut log) = log.lock() else { return };
            // Checked under the lock so nothing lands after `stop` took
            // the log.
            if halted() {
                return;
            }
            match read {
                Ok(watts) => {
                    let offset_us = run_start.elapsed().as_micros() as u64;
                    if last_offset.is_none_or(|prev| offset_us > prev) {
                        debug!("power sample {watts:.2}W at +{offset_us}us");
                        log.samples.push(PowerSample {
                            offset_us,
                            timestamp: now_rfc3339(),
                            watts,
                        });
                        last_offset = Some(offset_us);
                    }
                }
                Err(err) => {
                    failed_reads += 1;
                    log.failed_reads = failed_reads;
                    if failed_reads == 1 {
                        warn!("power read failed: {err:#}");
                    } else {
                        debug!("power read failed: {err:#}");
                    }
                }
            }
        }

        next += interval;
        let now = Instant::now();
        if next < now {
            // A slow read overran one or more ticks; skip them.
            next = now + interval;
        }
        loop {
            if halted() {
                return;
            }
            let now = Instant::now();
            if now >= next {
                break;
            }
            std::thread::sleep(poll.min(next - now));
        }
    }
}
