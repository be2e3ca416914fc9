#![cfg(unix)]

use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use wlg_bench::{
    cancel::CancelToken,
    config::Config,
    engine::{
        IoGenerator, UnitControl, UnitOutcome,
        fio::FioGenerator,
        process::{ProcessExit, run_supervised},
    },
    job_spec::JobDescriptor,
    profile::IoType,
    telemetry::{PowerSource, Sampler, source::CommandPower},
};

const FIO_REPORT: &str = r#"fio: note: both iodepth >= 1 and synchronous I/O engine
{
  "fio version": "fio-3.36",
  "jobs": [
    {
      "jobname": "profilec_read_4k_t",
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
      }
    }
  ]
}"#;

/// Stand-in fio binaries. Written once, before any test spawns a process,
/// so no forked child can hold a script open for writing when it is
/// executed.
fn scripts() -> &'static PathBuf {
    static DIR: OnceLock<PathBuf> = OnceLock::new();
    DIR.get_or_init(|| {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("wlg-bench-collab-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let version = "case \"$1\" in --version) echo fio-3.36; exit 0;; esac\n";
        let files = [
            (
                "fio_ok.sh",
                format!("#!/bin/sh\n{version}cat <<'EOF'\n{FIO_REPORT}\nEOF\n"),
            ),
            (
                "fio_fail.sh",
                format!("#!/bin/sh\n{version}echo 'fio: io_u error on file: Input/output error' >&2\nexit 1\n"),
            ),
            (
                "fio_hang.sh",
                format!("#!/bin/sh\n{version}echo 'fio: starting' >&2\nsleep 30\n"),
            ),
        ];
        for (name, body) in files {
            let path = dir.join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        dir
    })
}

fn fio(script: &str) -> FioGenerator {
    let mut cfg = Config::default();
    cfg.io_tool.binary = scripts().join(script).display().to_string();
    FioGenerator::new(&cfg)
}

fn job() -> JobDescriptor {
    JobDescriptor {
        id: "profilec_read_4k_t".into(),
        pattern_key: "read_4k".into(),
        io_type: IoType::Read,
        block_size: "4k".into(),
        block_bytes: 4096,
        percentage: 100.0,
        queue_depth: 32,
        rate_mbps: 100.0,
        runtime_seconds: 1,
        ramp_seconds: 0,
        target_path: "/dev/null".into(),
    }
}

fn control(within: Duration, cancel: &CancelToken) -> UnitControl {
    UnitControl {
        deadline: Instant::now() + within,
        cancel: cancel.clone(),
        poll: Duration::from_millis(10),
    }
}

fn sh(script: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", script]);
    cmd
}

fn pmu(script: &str, timeout_ms: u64) -> CommandPower {
    CommandPower::new(&["sh".into(), "-c".into(), script.into()], timeout_ms).unwrap()
}

#[test]
fn fio_report_becomes_completed_metrics() {
    let generator = fio("fio_ok.sh");
    assert_eq!(generator.preflight().unwrap(), "fio-3.36");

    let outcome = generator.run_job(&job(), &control(Duration::from_secs(10), &CancelToken::new()));
    let UnitOutcome::Completed(m) = outcome else {
        panic!("expected completed, got {outcome:?}");
    };
    assert_eq!(m.iops, 512000.5);
    assert_eq!(m.throughput_mbps, 2000.0);
    assert!((m.latency.p99_us - 436.224).abs() < 1e-9);
}

#[test]
fn fio_nonzero_exit_is_failed_with_stderr() {
    let outcome = fio("fio_fail.sh").run_job(
        &job(),
        &control(Duration::from_secs(10), &CancelToken::new()),
    );
    let UnitOutcome::Failed(msg) = outcome else {
        panic!("expected failed, got {outcome:?}");
    };
    assert!(msg.contains("Input/output error"), "{msg}");
}

#[test]
fn fio_past_deadline_is_killed_and_timed_out() {
    let started = Instant::now();
    let outcome = fio("fio_hang.sh").run_job(
        &job(),
        &control(Duration::from_millis(300), &CancelToken::new()),
    );
    assert!(started.elapsed() < Duration::from_secs(5));
    let UnitOutcome::TimedOut(msg) = outcome else {
        panic!("expected timed out, got {outcome:?}");
    };
    assert!(msg.contains("fio: starting"), "{msg}");
}

#[test]
fn fio_cancel_kills_running_job() {
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        trigger.cancel();
    });

    let started = Instant::now();
    let outcome = fio("fio_hang.sh").run_job(&job(), &control(Duration::from_secs(30), &cancel));
    canceller.join().unwrap();

    assert!(matches!(outcome, UnitOutcome::Cancelled), "{outcome:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn cancelled_run_never_reports_success() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let outcome = fio("fio_ok.sh").run_job(&job(), &control(Duration::from_secs(10), &cancel));
    assert!(matches!(outcome, UnitOutcome::Cancelled), "{outcome:?}");
}

#[test]
fn supervised_timeout_keeps_partial_stderr() {
    scripts();
    let started = Instant::now();
    let exit = run_supervised(
        sh("echo partial >&2; sleep 30"),
        Instant::now() + Duration::from_millis(300),
        &CancelToken::new(),
        Duration::from_millis(10),
    )
    .unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    let ProcessExit::TimedOut { stderr } = exit else {
        panic!("expected timeout, got {exit:?}");
    };
    assert!(stderr.contains("partial"), "{stderr}");
}

#[test]
fn supervised_exit_not_held_open_by_background_child() {
    scripts();
    let started = Instant::now();
    let exit = run_supervised(
        sh("sleep 3 & echo done"),
        Instant::now() + Duration::from_millis(300),
        &CancelToken::new(),
        Duration::from_millis(10),
    )
    .unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    let ProcessExit::Exited(out) = exit else {
        panic!("expected exit, got {exit:?}");
    };
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "done");
}

#[test]
fn command_power_reads_first_number() {
    scripts();
    assert_eq!(pmu("echo 'power: 10.5 W'", 2000).read_watts().unwrap(), 10.5);
}

#[test]
fn command_power_nonzero_exit_is_an_error() {
    scripts();
    let err = pmu("echo pmu offline >&2; exit 3", 2000).read_watts().unwrap_err();
    assert!(format!("{err:#}").contains("pmu offline"), "{err:#}");
}

#[test]
fn command_power_timeout_is_an_error() {
    scripts();
    let started = Instant::now();
    let err = pmu("sleep 30", 200).read_watts().unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(format!("{err:#}").contains("exceeded"), "{err:#}");
}

#[test]
fn command_power_bounded_when_background_child_holds_stdout() {
    scripts();
    let started = Instant::now();
    let watts = pmu("sleep 3 & echo 10.5", 200).read_watts().unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(watts, 10.5);
}

/// Answers once, then never returns.
struct StuckAfterFirst {
    reads: std::sync::atomic::AtomicU32,
}

impl PowerSource for StuckAfterFirst {
    fn name(&self) -> &str {
        "stuck"
    }

    fn read_watts(&self) -> anyhow::Result<f64> {
        if self.reads.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
            return Ok(10.0);
        }
        std::thread::sleep(Duration::from_secs(3600));
        Ok(99.0)
    }
}

#[test]
fn sampler_stop_abandons_stuck_read() {
    let source = Arc::new(StuckAfterFirst {
        reads: Default::default(),
    });
    let handle = Sampler::new(source, Duration::from_millis(10), Duration::from_millis(5))
        .with_stop_grace(Duration::from_millis(100))
        .start(Instant::now(), &CancelToken::new())
        .unwrap();
    std::thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    let log = handle.stop().unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(log.samples.len(), 1);
    assert_eq!(log.samples[0].watts, 10.0);
}
