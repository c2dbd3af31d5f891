//! Logging initialization (one global subscriber per test binary)

mod common;

use common::serial;
use rocmstat::logging::{self, LogFormat, LogLevel, LoggingConfig};
use rocmstat::{DeviceArray, DeviceContext, SimBackend, StatisticsEngine};

#[test]
#[serial]
fn test_env_config_rejects_unknown_level() {
    std::env::set_var("ROCMSTAT_LOG_LEVEL", "chatty");
    let err = LoggingConfig::from_env().unwrap_err();
    std::env::remove_var("ROCMSTAT_LOG_LEVEL");
    assert!(err.to_string().contains("chatty"));
}

#[test]
#[serial]
fn test_file_logging_captures_engine_events() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("nested").join("rocmstat.log");

    std::env::remove_var("RUST_LOG");
    let config = LoggingConfig::new()
        .with_level(LogLevel::Debug)
        .with_format(LogFormat::Human)
        .with_log_file(&log_path);
    logging::init_with_config(&config).unwrap();
    assert!(logging::is_initialized());
    // idempotent
    logging::init_with_config(&config).unwrap();
    rocmstat::init_logging_default();

    let ctx = DeviceContext::new(SimBackend::default());
    let engine = StatisticsEngine::new(ctx.clone()).unwrap();
    let data = DeviceArray::from_host(&ctx, &[1.0, 2.0, 3.0]).unwrap();
    assert_eq!(engine.mean(&data).unwrap(), 2.0);

    let contents = std::fs::read_to_string(&log_path).unwrap();
    assert!(contents.contains("Computing mean over 3 elements"), "{}", contents);
    assert!(contents.lines().all(|line| line.starts_with('{')));
}
