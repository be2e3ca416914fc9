use wlg_bench::{
    cancel::CancelToken,
    config::Config,
    coordinator::Coordinator,
    engine,
    evaluate::evaluate,
    profile::WorkloadProfile,
    report::{Overall, ResultDocument},
    telemetry,
};

fn simulated_config(out_dir: &std::path::Path) -> Config {
    let mut cfg = Config::default();
    cfg.io_tool.kind = "simulated".into();
    cfg.io_tool.simulated.duration_ms = 30;
    cfg.io_tool.simulated.fail_jobs = vec!["write_40k".into()];
    cfg.telemetry.simulated.fail = true;
    cfg.telemetry.interval_ms = 10;
    cfg.run.deadline_grace_seconds = 5;
    cfg.run.poll_interval_ms = 5;
    cfg.paths.out_dir = out_dir.display().to_string();
    cfg
}

#[test]
fn persisted_document_round_trips_and_reevaluates() {
    let out_dir = std::env::temp_dir().join(format!("wlg-bench-test-{}", std::process::id()));
    let cfg = simulated_config(&out_dir);

    let mut profile: WorkloadProfile =
        serde_json::from_str(include_str!("../profiles/profile_1.example.json")).unwrap();
    profile.runtime_seconds = 1;
    profile.ramp_seconds = 0;

    let mut c = Coordinator::new(
        &cfg,
        engine::from_config(&cfg).unwrap(),
        telemetry::source_from_config(&cfg).unwrap(),
    );
    let run = c.run(&profile, "16TB", &CancelToken::new()).unwrap();
    let verdict = evaluate(&run, &run.targets);
    assert_eq!(verdict.overall, Overall::Fail);

    let doc = ResultDocument { run, verdict };
    let path = doc.write(&cfg, &out_dir).unwrap();
    assert!(
        path.file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("wlg_1_16TB_")
    );

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["run"]["power"]["status"], "unavailable");
    assert_eq!(raw["verdict"]["overall"], "FAIL");
    assert_eq!(raw["run"]["jobs"].as_array().unwrap().len(), 5);
    assert_eq!(raw["run"]["jobs"][4]["status"], "failed");

    let loaded = ResultDocument::load(&path).unwrap();
    let again = evaluate(&loaded.run, &loaded.run.targets);
    assert_eq!(again.overall, doc.verdict.overall);
    assert_eq!(again.criteria.len(), doc.verdict.criteria.len());

    let _ = std::fs::remove_dir_all(&out_dir);
}
