//! Tests for configuration validation

use std::io::Write;

use prometheus_budget_scheduler::config::{
    EngineConfig, PartitionConfig, PoolPolicy, CONFIG_PATH_ENV, TOTAL_CAPACITY_ENV,
};
use prometheus_budget_scheduler::util::{Category, Urgency};

const SAMPLE: &str = r#"{
    "total_capacity": 100000,
    "partitions": [
        { "name": "security", "categories": ["security", "fix"], "max_workers": 2, "base_allocation": 40000, "pool_reserve": 5000 },
        { "name": "delivery", "categories": ["implementation", "test", "documentation"], "max_workers": 4, "base_allocation": 50000 }
    ],
    "pool": { "idle_threshold_secs": 120, "max_tasks_per_worker": 10 },
    "forecast": { "interval_percent": 20 }
}"#;

#[test]
fn test_parse_json_with_partial_sections() {
    let cfg = EngineConfig::from_json_str(SAMPLE).unwrap();
    assert_eq!(cfg.total_capacity, 100_000);
    assert_eq!(cfg.partitions.len(), 2);
    assert_eq!(cfg.partition("security").unwrap().allocation(), 45_000);
    assert!(cfg.partition("delivery").unwrap().serves(Category::Documentation));
    assert_eq!(cfg.pool.idle_threshold_secs, 120);
    // unspecified fields keep their defaults
    assert_eq!(cfg.pool.spawn_attempts, PoolPolicy::default().spawn_attempts);
    assert_eq!(cfg.forecast.interval_percent, 20);
    assert_eq!(cfg.forecast.burn_rates.get("development"), Some(&12_000));
    assert_eq!(cfg.priority.score(Category::Security, Urgency::Critical, 0), Some(100));
}

#[test]
fn test_parse_rejects_invalid_json() {
    let err = EngineConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error"), "{err}");
}

#[test]
fn test_zero_capacity_rejected() {
    let cfg = EngineConfig {
        total_capacity: 0,
        ..EngineConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_partition_without_workers_rejected() {
    let cfg = EngineConfig {
        total_capacity: 1_000,
        partitions: vec![PartitionConfig::new("idle", [Category::Test], 0, 100)],
        ..EngineConfig::default()
    };
    let err = cfg.validate().unwrap_err();
    assert!(err.contains("max_workers"), "{err}");
}

#[test]
fn test_risk_thresholds_must_be_ordered() {
    let mut cfg = EngineConfig::default();
    cfg.forecast.critical_hours = 10.0;
    cfg.forecast.high_hours = 8.0;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_from_env_reads_file_and_capacity_override() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(SAMPLE.as_bytes()).unwrap();

    std::env::set_var(CONFIG_PATH_ENV, file.path());
    std::env::set_var(TOTAL_CAPACITY_ENV, "120000");
    let loaded = EngineConfig::from_env();
    std::env::set_var(TOTAL_CAPACITY_ENV, "not-a-number");
    let bad = EngineConfig::from_env();
    std::env::remove_var(CONFIG_PATH_ENV);
    std::env::remove_var(TOTAL_CAPACITY_ENV);

    let cfg = loaded.unwrap();
    assert_eq!(cfg.total_capacity, 120_000);
    assert_eq!(cfg.partitions.len(), 2);
    assert!(bad.is_err());
}
