//! Integration tests for configuration loading and validation.

use bore_daq::config::PipelineConfig;
use bore_daq::error::DaqError;
use serial_test::serial;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

const CONFIG: &str = r#"
[application]
log_level = "debug"
log_format = "json"

[acquisition]
executable = "/opt/bore-gauge/acquire"
args = ["--port", "COM3"]
output_file = "out/result.csv"

[control]
program = "/usr/bin/python3"
args = ["drive_gauge.py"]
working_dir = "/opt/bore-gauge/scripts"

[drainer]
interval_ms = 15

[archive]
root = "/data/archive"
row = 4
"#;

fn write_config(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("bore_daq.toml");
    fs::write(&path, CONFIG).expect("Failed to write config");
    path
}

#[test]
#[serial]
fn test_load_from_file() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = PipelineConfig::load_from(write_config(&dir)).expect("Failed to load config");

    assert_eq!(config.application.log_level, "debug");
    assert_eq!(config.acquisition.args, vec!["--port", "COM3"]);
    assert_eq!(
        config
            .acquisition
            .artifact_path(&config.acquisition.working_dir()),
        PathBuf::from("/opt/bore-gauge/out/result.csv")
    );
    assert_eq!(config.acquisition.encoding, "GBK");
    assert_eq!(
        config.control.working_dir(),
        PathBuf::from("/opt/bore-gauge/scripts")
    );
    assert_eq!(config.drainer.interval(), Duration::from_millis(15));
    assert_eq!(config.archive.row, 4);
    // Untouched sections keep their defaults.
    assert_eq!(config.supervisor.stop_timeout(), Duration::from_secs(3));
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = write_config(&dir);

    std::env::set_var("BORE_DAQ_DRAINER__INTERVAL_MS", "5");
    std::env::set_var("BORE_DAQ_ARCHIVE__ENABLED", "false");
    std::env::set_var("BORE_DAQ_ACQUISITION__ENCODING", "UTF-8");
    let config = PipelineConfig::load_from(&path);
    std::env::remove_var("BORE_DAQ_DRAINER__INTERVAL_MS");
    std::env::remove_var("BORE_DAQ_ARCHIVE__ENABLED");
    std::env::remove_var("BORE_DAQ_ACQUISITION__ENCODING");

    let config = config.expect("Failed to load config");
    assert_eq!(config.drainer.interval_ms, 5);
    assert!(!config.archive.enabled);
    assert_eq!(
        config.acquisition.decoder().expect("known label"),
        encoding_rs::UTF_8
    );
}

#[test]
#[serial]
fn test_missing_file_uses_defaults() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = PipelineConfig::load_from(dir.path().join("absent.toml"))
        .expect("defaults should load");
    assert_eq!(config.drainer.interval_ms, 30);
    // Defaults alone do not name the processes to run.
    assert!(matches!(
        config.validate(),
        Err(DaqError::Configuration(msg)) if msg.contains("acquisition.executable")
    ));
}

#[test]
fn test_type_errors_are_reported() {
    let err = PipelineConfig::from_toml_str("[drainer]\ninterval_ms = \"fast\"\n")
        .expect_err("string interval should not parse");
    assert!(matches!(err, DaqError::Config(_)));
}
