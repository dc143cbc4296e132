use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use serde_json::Value;
use tempfile::tempdir;

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn pipeliner() -> Command {
    let mut cmd = Command::cargo_bin("pipeliner").unwrap();
    cmd.env("RUST_LOG", "info");
    cmd
}

#[test]
fn create_prints_the_graph_as_json() {
    let fixtures = fixtures();
    let output = pipeliner()
        .arg("create")
        .arg(fixtures.join("pipeline.yml"))
        .arg("--base-path")
        .arg(&fixtures)
        .args(["--override", "int:int-k8s", "--timeout", "4"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let graph: Value = serde_json::from_slice(&output.stdout).unwrap();
    let stages = graph["stages"].as_array().unwrap();
    assert_eq!(stages.len(), 10);
    assert_eq!(stages[0]["account"], "int-k8s");
    assert_eq!(stages[2]["stageTimeoutMs"], 14_400_000);
    // The CLI renders configurator files per environment.
    assert_eq!(stages[3]["manifests"][3]["data"]["LOG_LEVEL"], "debug");
}

#[test]
fn linear_flag_rewires_stages() {
    let fixtures = fixtures();
    let output = pipeliner()
        .arg("create")
        .arg(fixtures.join("pipeline.yml"))
        .arg("--base-path")
        .arg(&fixtures)
        .arg("-l")
        .output()
        .unwrap();
    assert!(output.status.success());
    let graph: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(graph["stages"][1]["refId"], "1");
    assert_eq!(graph["stages"][1]["requisiteStageRefIds"][0], "0");
}

#[test]
fn malformed_account_override_fails() {
    let fixtures = fixtures();
    let output = pipeliner()
        .arg("create")
        .arg(fixtures.join("pipeline.yml"))
        .args(["--override", "int"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid account override 'int'"), "{stderr}");
}

#[test]
fn validate_passes_for_sized_pipeline() {
    let fixtures = fixtures();
    let temp = tempdir().unwrap();
    let metrics_path = temp.path().join("metrics.json");
    pipeliner()
        .arg("validate")
        .arg(fixtures.join("pipeline.yml"))
        .arg("--base-path")
        .arg(&fixtures)
        .arg("--metrics-json")
        .arg(&metrics_path)
        .assert()
        .success();

    let metrics: Value = serde_json::from_str(&fs::read_to_string(&metrics_path).unwrap()).unwrap();
    assert_eq!(metrics["stages_skipped"], 1);
    assert_eq!(metrics["stages"]["deploy"]["builds"], 1);
}

#[test]
fn validate_fails_listing_missing_resources() {
    let temp = tempdir().unwrap();
    let pipeline = temp.path().join("pipeline.yml");
    fs::write(
        &pipeline,
        "stages:\n  - name: Deploy api\n    deploy:\n      groups:\n        - manifestFile: deployment.legacy.yml\n",
    )
    .unwrap();

    let output = pipeliner()
        .arg("validate")
        .arg(&pipeline)
        .arg("--base-path")
        .arg(fixtures())
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Pipeline validation failed with 4 error(s)"), "{stderr}");
    assert!(stderr.contains("Container: api - Missing CPU on Resource Requests"), "{stderr}");
}

#[test]
fn prometheus_metrics_are_written() {
    let fixtures = fixtures();
    let temp = tempdir().unwrap();
    let metrics_path = temp.path().join("metrics.prom");
    pipeliner()
        .arg("create")
        .arg(fixtures.join("pipeline.yml"))
        .arg("--base-path")
        .arg(&fixtures)
        .arg("--metrics-prometheus")
        .arg(&metrics_path)
        .assert()
        .success();

    let text = fs::read_to_string(&metrics_path).unwrap();
    assert!(text.contains("pipeliner_stage_builds_total{kind=\"runJob\"} 1"), "{text}");
    assert!(text.contains("pipeliner_manifests_decoded_total 7"), "{text}");
}

#[test]
fn list_stages_names_every_kind() {
    let output = pipeliner().arg("list-stages").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("Available stage kinds:"));
    for key in ["runJob", "deployEmbeddedManifests", "evaluatevariables", "spinnaker"] {
        assert!(stdout.contains(&format!("- {key}")), "{stdout}");
    }
}
