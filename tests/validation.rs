use std::fs;
use std::path::PathBuf;

use pipeliner::definition::PipelineDefinition;
use pipeliner::{BuilderOptions, ResourceViolations, build_pipeline, validate_graph};
use tempfile::tempdir;

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn build(source: &str) -> pipeliner::PipelineGraph {
    let definition = PipelineDefinition::from_yaml_str(source).unwrap();
    build_pipeline(&definition, BuilderOptions::default().with_base_path(fixtures())).unwrap()
}

#[test]
fn fully_sized_release_pipeline_passes() {
    let definition = PipelineDefinition::load(&fixtures().join("pipeline.yml")).unwrap();
    let graph =
        build_pipeline(&definition, BuilderOptions::default().with_base_path(fixtures())).unwrap();
    let report = validate_graph(&graph);
    assert!(report.is_ok(), "{:?}", report.errors);
    assert!(report.warnings.is_empty());
}

#[test]
fn every_missing_quantity_is_reported() {
    let graph = build(
        r#"
stages:
  - name: Deploy api
    deploy:
      groups:
        - manifestFile: deployment.legacy.yml
"#,
    );
    let report = validate_graph(&graph);
    assert_eq!(
        report.errors,
        [
            "Stage: Deploy api, Container: api - Missing CPU on Resource Requests",
            "Stage: Deploy api, Container: api - Missing Memory on Resource Requests",
            "Stage: Deploy api, Container: api - Missing CPU on Resource Limits",
            "Stage: Deploy api, Container: api - Missing Memory on Resource Limits",
        ]
    );

    let ResourceViolations { violations } = report.into_result().unwrap_err();
    assert_eq!(violations.len(), 4);
}

const HALF_SIZED: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: ledger
spec:
  template:
    spec:
      containers:
        - name: api
          image: ledger-api:2.1.0
          resources:
            requests:
              memory: 128Mi
            limits:
              cpu: 500m
        - name: sidecar
          image: envoy:1.29
          resources:
            requests:
              memory: 64Mi
            limits:
              cpu: 100m
"#;

#[test]
fn gaps_across_containers_share_one_report() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("ledger.yml"), HALF_SIZED).unwrap();
    let definition = PipelineDefinition::from_yaml_str(
        "stages:\n  - name: Deploy ledger\n    deploy:\n      groups:\n        - manifestFile: ledger.yml\n",
    )
    .unwrap();
    let graph = build_pipeline(
        &definition,
        BuilderOptions::default().with_base_path(temp.path().to_path_buf()),
    )
    .unwrap();

    let report = validate_graph(&graph);
    assert_eq!(
        report.errors,
        [
            "Stage: Deploy ledger, Container: api - Missing CPU on Resource Requests",
            "Stage: Deploy ledger, Container: api - Missing Memory on Resource Limits",
            "Stage: Deploy ledger, Container: sidecar - Missing CPU on Resource Requests",
            "Stage: Deploy ledger, Container: sidecar - Missing Memory on Resource Limits",
        ]
    );

    let violations = report.into_result().unwrap_err();
    assert_eq!(violations.violations.len(), 4);
    assert!(violations.to_string().starts_with("4 resource violation(s)"), "{violations}");
}

#[test]
fn only_deploy_stages_are_checked() {
    let graph = build(
        r#"
stages:
  - name: Migrate
    runJob:
      manifestFile: job.yml
  - name: Ship
    deployEmbeddedManifests:
      files:
        - file: deployment.legacy.yml
"#,
    );
    assert!(validate_graph(&graph).is_ok());
}

#[test]
fn deploy_without_groups_only_warns() {
    let graph = build("stages:\n  - name: Empty deploy\n    deploy: {}\n");
    let report = validate_graph(&graph);
    assert!(report.is_ok());
    assert_eq!(report.warnings, ["Stage: Empty deploy - Deploy stage has no clusters"]);
}
