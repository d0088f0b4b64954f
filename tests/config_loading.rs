//! Layered configuration loading: defaults, TOML file, environment.
//!
//! Every test touching `JFSTREAM_*` variables runs serially since the
//! process environment is shared.

use jf_core::{ConversionMode, PixelDepth};
use jf_transport::SubmitErrorPolicy;
use jfstream::config::JfConfig;
use jfstream::telemetry::OutputFormat;
use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tempfile::TempDir;

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("jfstream.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(body.as_bytes()).unwrap();
    path
}

#[test]
#[serial]
fn missing_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let config = JfConfig::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, JfConfig::default());
}

#[test]
#[serial]
fn file_overrides_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[receiver]
modules = 8
workers = 6
trigger_timeout = "2s"
availability_poll = "250us"
submit_error_policy = "retry"

[receiver.gpu]
enabled = true
streams = 2

[experiment]
conversion_mode = "raw"
pixel_depth = 4
summation = 2
nframes_to_collect = 200
nframes_to_write = 50

[logging]
format = "json"
"#,
    );

    let config = JfConfig::load_from(&path).unwrap();
    assert_eq!(config.receiver.modules, 8);
    assert_eq!(config.receiver.workers, 6);
    assert_eq!(config.receiver.trigger_timeout, Some(Duration::from_secs(2)));
    assert_eq!(config.receiver.source_timeout, None);
    assert_eq!(config.receiver.availability_poll, Duration::from_micros(250));
    assert_eq!(config.receiver.submit_error_policy, SubmitErrorPolicy::Retry);
    assert!(config.receiver.gpu.enabled);
    assert_eq!(config.receiver.gpu.gate.streams, 2);
    assert_eq!(config.receiver.gpu.gate.frames_per_stream, 320);
    assert_eq!(config.experiment.conversion_mode, ConversionMode::Raw);
    assert_eq!(config.experiment.pixel_depth, PixelDepth::Four);
    assert_eq!(config.logging.format, OutputFormat::Json);
    // untouched keys keep their defaults
    assert_eq!(config.receiver.send_queue_depth, JfConfig::default().receiver.send_queue_depth);
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn environment_overrides_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[receiver]\nworkers = 2\n");

    std::env::set_var("JFSTREAM_RECEIVER__WORKERS", "12");
    std::env::set_var("JFSTREAM_LOGGING__LEVEL", "debug");
    let loaded = JfConfig::load_from(&path);
    std::env::remove_var("JFSTREAM_RECEIVER__WORKERS");
    std::env::remove_var("JFSTREAM_LOGGING__LEVEL");

    let config = loaded.unwrap();
    assert_eq!(config.receiver.workers, 12);
    assert_eq!(config.logging.level, "debug");
}

#[test]
#[serial]
fn invalid_depth_in_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[experiment]\npixel_depth = 3\n");
    assert!(JfConfig::load_from(&path).is_err());
}

#[test]
#[serial]
fn shipped_config_loads_and_validates() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/jfstream.toml");
    let config = JfConfig::load_from(path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.receiver.tcp_port, 52_320);
    assert_eq!(config.pipeline_options().gpu, None);
}
