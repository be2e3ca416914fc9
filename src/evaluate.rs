use crate::{
    engine::{JobResult, JobStatus},
    profile::{QosBound, Targets},
    report::{Criterion, Overall, RunResult, RunState, Verdict},
};

pub const JOB_EXECUTION: &str = "job execution";
pub const RUN_COMPLETION: &str = "run completion";
pub const IOPS_MIN: &str = "iops_min";
pub const THROUGHPUT_MIN: &str = "throughput_mbps_min";
pub const LATENCY_P99_MAX: &str = "latency_p99_us_max";
pub const POWER_MAX: &str = "power_watts_max";

pub fn qos_criterion(pattern_key: &str) -> String {
    format!("qos {pattern_key}")
}

/// Judge a run against its targets. Each criterion is evaluated on its own;
/// overall PASS needs every criterion satisfied, no failed or timed-out job,
/// and a run that was not cancelled.
pub fn evaluate(run: &RunResult, targets: &Targets) -> Verdict {
    let mut criteria = vec![job_execution(&run.jobs)];

    if run.state == RunState::Cancelled {
        criteria.push(Criterion {
            criterion: RUN_COMPLETION.to_string(),
            expected: "completed".to_string(),
            actual: if run.interrupted_jobs.is_empty() {
                "cancelled".to_string()
            } else {
                format!("cancelled; interrupted: {}", run.interrupted_jobs.join(", "))
            },
            satisfied: false,
        });
    }

    let ok: Vec<&JobResult> = run.jobs.iter().filter(|j| j.succeeded()).collect();

    if let Some(min) = targets.iops_min {
        let total: f64 = ok.iter().map(|j| j.iops).sum();
        criteria.push(Criterion {
            criterion: IOPS_MIN.to_string(),
            expected: format!(">= {min}"),
            actual: format!("{total:.0}"),
            satisfied: total >= min,
        });
    }

    if let Some(min) = targets.throughput_mbps_min {
        let total: f64 = ok.iter().map(|j| j.throughput_mbps).sum();
        criteria.push(Criterion {
            criterion: THROUGHPUT_MIN.to_string(),
            expected: format!(">= {min} MB/s"),
            actual: format!("{total:.1} MB/s"),
            satisfied: total >= min,
        });
    }

    if let Some(max) = targets.latency_p99_us_max {
        let worst = ok
            .iter()
            .filter_map(|j| j.latency.map(|l| l.p99_us))
            .max_by(f64::total_cmp);
        criteria.push(match worst {
            Some(p99) => Criterion {
                criterion: LATENCY_P99_MAX.to_string(),
                expected: format!("<= {max} us"),
                actual: format!("{p99:.1} us"),
                satisfied: p99 <= max,
            },
            None => Criterion {
                criterion: LATENCY_P99_MAX.to_string(),
                expected: format!("<= {max} us"),
                actual: "no successful job".to_string(),
                satisfied: false,
            },
        });
    }

    if let Some(max) = targets.power_watts_max {
        criteria.push(match run.power.avg_watts() {
            Some(avg) => Criterion {
                criterion: POWER_MAX.to_string(),
                expected: format!("avg <= {max} W"),
                actual: format!("avg {avg:.2} W"),
                satisfied: avg <= max,
            },
            None => Criterion {
                criterion: POWER_MAX.to_string(),
                expected: format!("avg <= {max} W"),
                actual: "unavailable".to_string(),
                satisfied: false,
            },
        });
    }

    for bound in &targets.qos {
        criteria.push(qos(run, bound));
    }

    let all_ok = criteria.iter().all(|c| c.satisfied);
    Verdict {
        overall: if all_ok { Overall::Pass } else { Overall::Fail },
        run_state: run.state,
        criteria,
    }
}

fn job_execution(jobs: &[JobResult]) -> Criterion {
    let bad: Vec<String> = jobs
        .iter()
        .filter(|j| j.status != JobStatus::Success)
        .map(|j| {
            let status = match j.status {
                JobStatus::TimedOut => "timed_out",
                JobStatus::Cancelled => "cancelled",
                _ => "failed",
            };
            format!("{} ({status})", j.job_id)
        })
        .collect();
    Criterion {
        criterion: JOB_EXECUTION.to_string(),
        expected: "all jobs succeed".to_string(),
        actual: if bad.is_empty() {
            format!("{} of {} succeeded", jobs.len(), jobs.len())
        } else {
            bad.join(", ")
        },
        satisfied: bad.is_empty(),
    }
}

fn qos(run: &RunResult, bound: &QosBound) -> Criterion {
    let key = bound.key();
    let limits = [
        ("p50", bound.p50_us_max),
        ("p99", bound.p99_us_max),
        ("p99.99", bound.p99_99_us_max),
    ];
    let expected = limits
        .iter()
        .filter_map(|(name, max)| max.map(|m| format!("{name} <= {m} us")))
        .collect::<Vec<_>>()
        .join(", ");

    let latency = run
        .job(&key)
        .filter(|j| j.succeeded())
        .and_then(|j| j.latency);
    let Some(lat) = latency else {
        return Criterion {
            criterion: qos_criterion(&key),
            expected,
            actual: "no successful result".to_string(),
            satisfied: false,
        };
    };

    let measured = [lat.p50_us, lat.p99_us, lat.p99_99_us];
    let mut satisfied = true;
    let mut actual = Vec::new();
    for ((name, max), value) in limits.iter().zip(measured) {
        if let Some(m) = max {
            satisfied &= value <= *m;
            actual.push(format!("{name} {value:.1} us"));
        }
    }

    Criterion {
        criterion: qos_criterion(&key),
        expected,
        actual: actual.join(", "),
        satisfied,
    }
}
