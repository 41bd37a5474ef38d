//! Argument handling and the top-level error path

mod common;

use clap::Parser;
use common::{AdapterWrite, FakeBackend, Workspace};
use lorafit::Error;
use lorafit_core::cli::marker::ERROR_MARKER_FILE;
use lorafit_core::{MarkerLocation, TrainArgs};

#[test]
fn test_marker_location_survives_parse_failure() {
    let ws = Workspace::new(1);
    let outdir = ws.outdir.display().to_string();
    let argv = ["lorafit", "--epochs", "three", "--outdir", outdir.as_str()];

    let err = TrainArgs::try_parse_from(argv).unwrap_err();
    assert_eq!(err.exit_code(), 2);

    let marker = MarkerLocation::from_args(argv.iter().skip(1).copied());
    assert_eq!(marker.output_dir(), Some(ws.outdir.as_path()));
}

#[tokio::test]
async fn test_config_resolution_failure_leaves_marker() {
    let ws = Workspace::new(1);
    let missing = ws.dir.path().join("missing.yaml");
    let args = ws.args(&["--config", missing.to_str().unwrap()]);
    let marker = MarkerLocation::new(&ws.outdir);

    let backend = FakeBackend::new(AdapterWrite::WeightsAndConfig);
    let err = backend.orchestrator().execute(&args, &marker).await.unwrap_err();

    assert!(matches!(err.run_error(), Some(Error::Config(_))));
    let content = std::fs::read_to_string(ws.outdir.join(ERROR_MARKER_FILE)).unwrap();
    assert!(content.starts_with("Configuration error: Failed to read config file"));
    // Only the marker; no training output
    assert!(!ws.outdir.join("hf_out").exists());
}

#[tokio::test]
async fn test_invalid_numeric_config_is_reported() {
    let ws = Workspace::new(1);
    let config_path = ws.dir.path().join("run.json");
    std::fs::write(&config_path, r#"{"epochs": 0}"#).unwrap();
    let args = ws.args(&["--config", config_path.to_str().unwrap()]);

    let backend = FakeBackend::new(AdapterWrite::WeightsAndConfig);
    let err = backend
        .orchestrator()
        .execute(&args, &MarkerLocation::new(&ws.outdir))
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), 1);
    assert!(err.marker_line().contains("epochs must be greater than 0"));
}

#[tokio::test]
async fn test_errors_append_to_existing_marker() {
    let ws = Workspace::new(1);
    std::fs::remove_file(&ws.data).unwrap();
    let args = ws.args(&[]);
    let marker = MarkerLocation::new(&ws.outdir);
    let backend = FakeBackend::new(AdapterWrite::WeightsAndConfig);

    for _ in 0..2 {
        let err = backend.orchestrator().execute(&args, &marker).await.unwrap_err();
        assert!(matches!(err.run_error(), Some(Error::DatasetNotFound(_))));
    }

    let content = std::fs::read_to_string(ws.outdir.join(ERROR_MARKER_FILE)).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|l| l.starts_with("dataset_path not found:")));
}
