use wlg_bench::{config::Config, profile::WorkloadProfile};

#[test]
fn parse_example_config() {
    let raw = include_str!("../wlg-bench.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    assert_eq!(cfg.io_tool.kind, "fio");
    assert_eq!(cfg.telemetry.source, "simulated");
    assert!(cfg.run.deadline_grace_seconds > 0);
    assert!(!cfg.paths.out_dir.is_empty());
}

#[test]
fn empty_config_uses_defaults() {
    let cfg: Config = toml::from_str("").expect("parse TOML");
    assert_eq!(cfg.telemetry.interval_ms, 1000);
    assert!(cfg.global.require_confirmation);
}

#[test]
fn parse_example_profile() {
    let raw = include_str!("../profiles/profile_1.example.json");
    let profile: WorkloadProfile = serde_json::from_str(raw).expect("parse JSON");
    assert_eq!(profile.io_patterns.len(), 5);
    assert_eq!(profile.io_patterns[4].queue_depth, 16);
    assert_eq!(profile.io_patterns[0].queue_depth, 32);
    assert_eq!(
        profile.target_path().as_deref(),
        Some("/mnt/nvme0/wlg_testfile.dat")
    );
    assert_eq!(profile.power_target(), Some(11.0));
}
