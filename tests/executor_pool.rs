use std::sync::Arc;
use std::time::{Duration, Instant};
use wlg_bench::{
    cancel::CancelToken,
    engine::{
        IoGenerator, JobMetrics, JobStatus, LatencyPercentiles, UnitControl, UnitOutcome,
    },
    job_spec::{JobDescriptor, JobPlan},
    pool::ExecutorPool,
    profile::WorkloadProfile,
};

/// Scripted generator: behaviour keyed by the job's pattern key.
struct Scripted;

impl IoGenerator for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn preflight(&self) -> anyhow::Result<String> {
        Ok("scripted".into())
    }

    fn run_job(&self, job: &JobDescriptor, ctl: &UnitControl) -> UnitOutcome {
        match job.pattern_key.as_str() {
            "read_4k" => UnitOutcome::Completed(JobMetrics {
                iops: 100.0,
                throughput_mbps: 0.4,
                latency: LatencyPercentiles {
                    p50_us: 1.0,
                    p99_us: 2.0,
                    p99_99_us: 3.0,
                },
            }),
            "read_8k" => UnitOutcome::Failed("device busy".into()),
            "read_16k" => panic!("collaborator blew up"),
            "read_32k" => {
                if ctl.cancel.sleep_until(ctl.deadline, ctl.poll) {
                    UnitOutcome::Cancelled
                } else {
                    UnitOutcome::TimedOut("deadline".into())
                }
            }
            _ => {
                std::thread::sleep(Duration::from_secs(3600));
                UnitOutcome::Failed("unreachable".into())
            }
        }
    }
}

fn plan() -> JobPlan {
    let profile: WorkloadProfile = serde_json::from_str(
        r#"{
            "profile_id": "p",
            "profile_name": "pool",
            "io_patterns": [
                {"type": "read", "block_size": "4k", "percentage": 20},
                {"type": "read", "block_size": "8k", "percentage": 20},
                {"type": "read", "block_size": "16k", "percentage": 20},
                {"type": "read", "block_size": "32k", "percentage": 20},
                {"type": "read", "block_size": "64k", "percentage": 20}
            ],
            "power_limit_watts": 0,
            "runtime_seconds": 1,
            "device": {"path": "/dev/null"},
            "throughput_targets": {"t": {"read_total_mbps": 100}}
        }"#,
    )
    .unwrap();
    JobPlan::compile(&profile, "t").unwrap()
}

fn pool() -> ExecutorPool {
    ExecutorPool::new(
        Arc::new(Scripted),
        Duration::from_millis(5),
        Duration::from_millis(200),
    )
}

#[test]
fn exactly_one_result_per_descriptor() {
    let plan = plan();
    let deadline = Instant::now() + Duration::from_millis(300);
    let results = pool().run(&plan.jobs, deadline, &CancelToken::new());

    assert_eq!(results.len(), plan.jobs.len());
    for (job, result) in plan.jobs.iter().zip(&results) {
        assert_eq!(job.id, result.job_id);
    }
    let status: Vec<JobStatus> = results.iter().map(|r| r.status).collect();
    assert_eq!(
        status,
        vec![
            JobStatus::Success,
            JobStatus::Failed,
            JobStatus::Failed,
            JobStatus::TimedOut,
            JobStatus::TimedOut,
        ]
    );
    assert_eq!(results[1].error.as_deref(), Some("device busy"));
    assert_eq!(results[2].error.as_deref(), Some("job unit panicked"));
}

#[test]
fn cancellation_reaches_every_unit() {
    let plan = plan();
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        trigger.cancel();
    });

    let start = Instant::now();
    let deadline = start + Duration::from_secs(30);
    let results = pool().run(&plan.jobs, deadline, &cancel);

    // Bounded by the cancellation grace, not by the hung unit.
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(results.len(), 5);
    assert_eq!(results[0].status, JobStatus::Success);
    assert_eq!(results[3].status, JobStatus::Cancelled);
    assert_eq!(results[4].status, JobStatus::Cancelled);
}
