use std::fs;
use std::path::PathBuf;

use pipeliner::definition::PipelineDefinition;
use pipeliner::manifest::Node;
use pipeliner::{BuildError, BuilderOptions, build_pipeline};
use tempfile::tempdir;

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn build_err(source: &str) -> anyhow::Error {
    let definition = PipelineDefinition::from_yaml_str(source).unwrap();
    build_pipeline(&definition, BuilderOptions::default().with_base_path(fixtures())).unwrap_err()
}

fn manifests_of(source: &str) -> Vec<Node> {
    let definition = PipelineDefinition::from_yaml_str(source).unwrap();
    let graph =
        build_pipeline(&definition, BuilderOptions::default().with_base_path(fixtures())).unwrap();
    let value = serde_json::to_value(&graph.stages[0]).unwrap();
    serde_json::from_value(value["manifests"].clone()).unwrap()
}

#[test]
fn run_job_on_a_config_map_is_unsupported() {
    let err = build_err(
        r#"
stages:
  - name: Migrate
    runJob:
      manifestFile: configmap.yml
"#,
    );
    match err.downcast_ref::<BuildError>() {
        Some(BuildError::UnsupportedManifestKind { kind }) => assert_eq!(kind, "ConfigMap"),
        other => panic!("expected an unsupported kind, got {other:?}"),
    }
    let message = format!("{err:#}");
    assert!(message.contains("Failed to build runJob stage 'Migrate'"), "{message}");
}

#[test]
fn command_override_needs_a_single_container() {
    let err = build_err(
        r#"
stages:
  - name: Deploy api
    deploy:
      groups:
        - manifestFile: deployment.legacy.yml
          containerOverrides:
            args: ["--verbose"]
"#,
    );
    match err.downcast_ref::<BuildError>() {
        Some(BuildError::OverrideContention { path, count }) => {
            assert!(path.ends_with("deployment.legacy.yml"));
            assert_eq!(*count, 2);
        }
        other => panic!("expected override contention, got {other:?}"),
    }
}

#[test]
fn workload_without_containers_is_rejected() {
    let temp = tempdir().unwrap();
    fs::write(
        temp.path().join("empty.yml"),
        "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: empty\nspec:\n  template:\n    spec:\n      containers: []\n",
    )
    .unwrap();
    let definition = PipelineDefinition::from_yaml_str(
        "stages:\n  - name: Deploy\n    deploy:\n      groups:\n        - manifestFile: empty.yml\n",
    )
    .unwrap();
    let err = build_pipeline(
        &definition,
        BuilderOptions::default().with_base_path(temp.path()),
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::NoContainers { .. })
    ));
}

#[test]
fn embedded_manifest_stage_needs_files() {
    let err = build_err("stages:\n  - name: Ship\n    deployEmbeddedManifests: {}\n");
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::NoManifestFiles)
    ));
}

#[test]
fn delete_needs_exactly_one_document() {
    let err = build_err(
        "stages:\n  - name: Clean up\n    deleteEmbeddedManifest:\n      file: multi.yml\n",
    );
    match err.downcast_ref::<BuildError>() {
        Some(BuildError::DeleteTargetCount { count, .. }) => assert_eq!(*count, 3),
        other => panic!("expected a delete target count error, got {other:?}"),
    }
}

#[test]
fn bad_override_quantity_names_stage_container_and_field() {
    let err = build_err(
        r#"
stages:
  - name: Ship
    deployEmbeddedManifests:
      files:
        - file: multi.yml
      containerOverrides:
        - name: web
          resources:
            requests:
              cpu: lots
"#,
    );
    let message = format!("{err:#}");
    assert!(message.contains("Ship"), "{message}");
    assert!(message.contains("multi.yml"), "{message}");
    match err.downcast_ref::<BuildError>() {
        Some(BuildError::QuantityParse {
            section,
            container,
            field,
            value,
        }) => {
            assert_eq!(*section, "requests");
            assert_eq!(container, "web");
            assert_eq!(*field, "cpu");
            assert_eq!(value, "lots");
        }
        other => panic!("expected a quantity error, got {other:?}"),
    }
}

#[test]
fn cron_job_overrides_reach_the_job_template() {
    let manifests = manifests_of(
        r#"
stages:
  - name: Ship
    deployEmbeddedManifests:
      files:
        - file: cronjob.yml
      containerOverrides:
        - name: report
          resources:
            limits:
              memory: 4Gi
"#,
    );
    let report = &manifests[0];
    let path = [
        "spec",
        "jobTemplate",
        "spec",
        "template",
        "spec",
        "containers",
    ];
    let container = &report.get_path(&path).and_then(Node::as_list).unwrap()[0];
    assert_eq!(container.str_at(&["resources", "limits", "memory"]), Some("4Gi"));
    assert_eq!(container.str_at(&["resources", "limits", "cpu"]), Some("1"));
    assert!(container.get_path(&["resources", "requests", "cpu"]).is_none());
}

#[test]
fn override_for_unknown_container_changes_nothing() {
    let plain = manifests_of(
        "stages:\n  - name: Ship\n    deployEmbeddedManifests:\n      files:\n        - file: multi.yml\n",
    );
    let overridden = manifests_of(
        r#"
stages:
  - name: Ship
    deployEmbeddedManifests:
      files:
        - file: multi.yml
      containerOverrides:
        - name: ghost
          command: ["/bin/true"]
"#,
    );
    assert_eq!(plain, overridden);
}
