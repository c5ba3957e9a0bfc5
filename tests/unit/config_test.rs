//! Tests for configuration validation

use std::io::Write;

use prometheus_frame_scheduler::config::{
    GateConfig, RetryConfig, SchedulerConfig, TimerConfig, CONFIG_ENV_VAR,
};

#[test]
fn test_defaults_are_valid() {
    let cfg = SchedulerConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.retry.max_retries, 3);
    assert!(cfg.retry.exponential);
    assert!(cfg.gates.is_empty());
}

#[test]
fn test_gate_config_invalid_max() {
    let invalid = GateConfig { max_concurrent: 0 };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_timer_config_invalid_floor() {
    let invalid = TimerConfig {
        min_interval_secs: 0.0,
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_retry_config_invalid_delay() {
    let invalid = RetryConfig {
        max_retries: 3,
        base_delay_secs: -1.0,
        exponential: true,
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_scheduler_config_names_bad_gate() {
    let mut cfg = SchedulerConfig::default();
    cfg.gates
        .insert("net".to_string(), GateConfig { max_concurrent: 0 });
    let err = cfg.validate().unwrap_err();
    assert!(err.contains("gate `net`"), "{err}");
}

#[test]
fn test_from_json_str_partial() {
    let cfg = SchedulerConfig::from_json_str(
        r#"{ "retry": { "max_retries": 5 }, "gates": { "net": { "max_concurrent": 4 } } }"#,
    )
    .unwrap();
    assert_eq!(cfg.retry.max_retries, 5);
    assert!((cfg.retry.base_delay_secs - 1.0).abs() < f32::EPSILON);
    assert_eq!(cfg.gates["net"].max_concurrent, 4);
}

#[test]
fn test_from_json_str_rejects_garbage() {
    let err = SchedulerConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error"), "{err}");
}

#[test]
fn test_from_file_and_env() {
    let dir = std::env::temp_dir().join(format!("frame-scheduler-cfg-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("scheduler.json");
    let mut file = std::fs::File::create(&path).unwrap();
    write!(file, r#"{{ "timers": {{ "min_interval_secs": 0.001 }} }}"#).unwrap();

    let cfg = SchedulerConfig::from_file(&path).unwrap();
    assert!((cfg.timers.min_interval_secs - 0.001).abs() < f32::EPSILON);

    std::env::set_var(CONFIG_ENV_VAR, &path);
    let from_env = SchedulerConfig::from_env().unwrap();
    std::env::remove_var(CONFIG_ENV_VAR);
    assert_eq!(from_env, cfg);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_from_file_missing() {
    let err = SchedulerConfig::from_file("/definitely/not/here.json").unwrap_err();
    assert!(format!("{err:#}").contains("reading config file"));
}
