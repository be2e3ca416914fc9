use crate::{
    cancel::CancelToken,
    config::Config,
    coordinator::Coordinator,
    engine,
    evaluate::evaluate,
    job_spec::JobPlan,
    profile::WorkloadProfile,
    report::{ResultDocument, Verdict},
    telemetry,
    util::ensure_dir,
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "wlg-bench")]
#[command(about = "Storage workload benchmark orchestrator (fio jobs + power telemetry + verdict)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./wlg-bench.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check that the I/O tool and the power source respond.
    Doctor {},
    /// Compile a profile into job descriptors without running anything.
    Plan {
        #[arg(long)]
        profile: PathBuf,
        #[arg(long)]
        capacity: String,
    },
    Run {
        #[arg(long)]
        profile: PathBuf,
        #[arg(long)]
        capacity: String,
        /// Proceed without the confirmation step.
        #[arg(long)]
        yes: bool,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Re-evaluate a stored result document.
    Evaluate {
        #[arg(long)]
        result: PathBuf,
    },
}

/// How a subcommand that completed without error ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    TargetsMissed,
}

pub fn dispatch(args: Args) -> Result<Outcome> {
    let cfg_path = resolve_config_path(args.config.as_deref())?;
    let cfg = Config::load(&cfg_path)?;
    let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg).as_deref())?;

    match &args.cmd {
        Command::Doctor {} => doctor(&cfg),
        Command::Plan { profile, capacity } => plan(profile, capacity),
        Command::Run {
            profile,
            capacity,
            yes,
            out_dir,
        } => run(&cfg, profile, capacity, *yes, out_dir.as_deref()),
        Command::Evaluate { result } => reevaluate(result),
    }
}

fn resolve_config_path(user: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = user {
        return Ok(p.to_path_buf());
    }
    let default = PathBuf::from("wlg-bench.toml");
    if default.exists() {
        Ok(default)
    } else {
        Ok(PathBuf::from("wlg-bench.example.toml"))
    }
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries the JSON documents; logs go to stderr.
    let console_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(PathBuf::from(&cfg.paths.out_dir).join("wlg-bench.log"))
}

fn doctor(cfg: &Config) -> Result<Outcome> {
    let generator = engine::from_config(cfg)?;
    let power = telemetry::source_from_config(cfg)?;

    let io_status = match generator.preflight() {
        Ok(version) => serde_json::json!({"ok": true, "version": version}),
        Err(err) => serde_json::json!({"ok": false, "error": format!("{err:#}")}),
    };
    let power_status = match power.read_watts() {
        Ok(watts) => serde_json::json!({"ok": true, "watts": watts}),
        Err(err) => serde_json::json!({"ok": false, "error": format!("{err:#}")}),
    };
    let healthy = io_status["ok"] == true && power_status["ok"] == true;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "io_tool": {"kind": generator.name(), "status": io_status},
            "telemetry": {"source": power.name(), "status": power_status},
        }))?
    );
    if healthy {
        Ok(Outcome::Ok)
    } else {
        Err(anyhow!("doctor found unavailable collaborators"))
    }
}

fn plan(profile_path: &Path, capacity: &str) -> Result<Outcome> {
    let profile = WorkloadProfile::load(profile_path)?;
    let plan = JobPlan::compile(&profile, capacity)?;
    println!("{}", serde_json::to_string_pretty(&plan_summary(&profile, &plan))?);
    Ok(Outcome::Ok)
}

fn plan_summary(profile: &WorkloadProfile, plan: &JobPlan) -> serde_json::Value {
    let totals: serde_json::Map<String, serde_json::Value> = plan
        .totals_by_type()
        .into_iter()
        .map(|(t, mbps)| (format!("{t}_total_mbps"), serde_json::json!(mbps)))
        .collect();
    serde_json::json!({
        "profile_id": profile.profile_id,
        "profile_name": profile.profile_name,
        "capacity": plan.capacity,
        "runtime_seconds": profile.runtime_seconds,
        "ramp_seconds": profile.ramp_seconds,
        "power_limit_watts": profile.power_limit_watts,
        "totals": totals,
        "jobs": plan.jobs,
    })
}

fn run(
    cfg: &Config,
    profile_path: &Path,
    capacity: &str,
    yes: bool,
    out_override: Option<&Path>,
) -> Result<Outcome> {
    let profile = WorkloadProfile::load(profile_path)?;
    let plan = JobPlan::compile(&profile, capacity)?;

    if cfg.global.require_confirmation && !yes {
        println!("{}", serde_json::to_string_pretty(&plan_summary(&profile, &plan))?);
        warn!("confirmation required: re-run with --yes to execute this plan");
        return Ok(Outcome::Ok);
    }

    let generator = engine::from_config(cfg)?;
    let power = telemetry::source_from_config(cfg)?;

    let cancel = CancelToken::new();
    signal_hook::flag::register(signal_hook::consts::SIGINT, cancel.flag())
        .with_context(|| "registering SIGINT handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, cancel.flag())
        .with_context(|| "registering SIGTERM handler")?;

    let mut coordinator = Coordinator::new(cfg, generator, power);
    let result = coordinator.execute(&profile, &plan, &cancel)?;
    let verdict = evaluate(&result, &result.targets);
    log_verdict(&verdict);

    let doc = ResultDocument {
        run: result,
        verdict,
    };

    let out_dir = out_override
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.paths.out_dir));
    let written = if cfg.output.write_result_json {
        let path = doc.write(cfg, &out_dir)?;
        info!("result written to {}", path.display());
        Some(path)
    } else {
        None
    };

    if cfg.global.print_summary {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "run_id": doc.run.run_id,
                "state": doc.run.state,
                "result": written,
                "verdict": doc.verdict,
            }))?
        );
    }

    Ok(outcome_of(&doc.verdict))
}

fn reevaluate(path: &Path) -> Result<Outcome> {
    let doc = ResultDocument::load(path)?;
    let verdict = evaluate(&doc.run, &doc.run.targets);
    log_verdict(&verdict);
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(outcome_of(&verdict))
}

fn log_verdict(verdict: &Verdict) {
    for c in &verdict.criteria {
        if c.satisfied {
            info!("{:<24} ok   actual={} expected={}", c.criterion, c.actual, c.expected);
        } else {
            warn!("{:<24} FAIL actual={} expected={}", c.criterion, c.actual, c.expected);
        }
    }
    info!("overall {:?} (run {})", verdict.overall, verdict.run_state);
}

fn outcome_of(verdict: &Verdict) -> Outcome {
    if verdict.passed() {
        Outcome::Ok
    } else {
        Outcome::TargetsMissed
    }
}
