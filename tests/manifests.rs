use std::fs;
use std::path::PathBuf;

use pipeliner::BuildError;
use pipeliner::manifest::{Manifest, ManifestDecoder, WorkloadKind, decode_documents};
use tempfile::tempdir;

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

#[test]
fn multi_document_file_keeps_order_and_normalizes_workloads() {
    let decoder = ManifestDecoder::new(Some(fixtures()));
    let manifests = decoder.read_file("multi.yml").unwrap();
    assert_eq!(manifests.len(), 3);

    let kinds: Vec<_> = manifests.iter().map(Manifest::kind).collect();
    assert_eq!(kinds, ["ConfigMap", "Service", "Deployment"]);
    assert!(matches!(manifests[0], Manifest::Object(_)));

    let workload = manifests[2].as_workload().expect("deployment is typed");
    assert_eq!(workload.kind(), WorkloadKind::Deployment);
    let node = workload.to_node().unwrap();
    assert_eq!(node.str_at(&["apiVersion"]), Some("apps/v1"));
    assert!(node.get_path(&["spec", "rollbackTo"]).is_none());
}

#[test]
fn empty_documents_are_skipped() {
    let source = "---\n---\nkind: ConfigMap\nmetadata:\n  name: a\n---\n\n---\nkind: Secret\nmetadata:\n  name: b\n---\n";
    let manifests = decode_documents(source).unwrap();
    let kinds: Vec<_> = manifests.iter().map(Manifest::kind).collect();
    assert_eq!(kinds, ["ConfigMap", "Secret"]);
}

#[test]
fn cron_jobs_decode_to_their_canonical_version() {
    let decoder = ManifestDecoder::new(Some(fixtures()));
    let manifests = decoder.read_file("cronjob.yml").unwrap();
    let workload = manifests[0].as_workload().unwrap();

    assert_eq!(workload.kind(), WorkloadKind::CronJob);
    assert_eq!(workload.pod_spec().containers[0].name, "report");
    let node = workload.to_node().unwrap();
    assert_eq!(node.str_at(&["apiVersion"]), Some("batch/v1"));
    assert_eq!(node.str_at(&["spec", "schedule"]), Some("0 3 * * *"));
}

#[test]
fn unknown_kinds_round_trip_untouched() {
    let source = "apiVersion: policy/v1\nkind: PodDisruptionBudget\nmetadata:\n  name: web\nspec:\n  minAvailable: 1\n";
    let manifests = decode_documents(source).unwrap();
    let node = manifests.into_iter().next().unwrap().into_node().unwrap();
    assert_eq!(node.str_at(&["apiVersion"]), Some("policy/v1"));
    assert_eq!(
        node.get_path(&["spec", "minAvailable"]).and_then(|n| n.scalar_text()),
        Some("1".to_string())
    );
}

#[test]
fn malformed_yaml_is_a_decode_error_naming_the_file() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("broken.yml"), "kind: Deployment\nspec: [unclosed\n").unwrap();

    let decoder = ManifestDecoder::new(Some(temp.path().to_path_buf()));
    let err = decoder.read_file("broken.yml").unwrap_err();
    match err.downcast_ref::<BuildError>() {
        Some(BuildError::Decode { path, .. }) => assert!(path.ends_with("broken.yml")),
        other => panic!("expected a decode error, got {other:?}"),
    }
}

#[test]
fn document_without_kind_is_rejected() {
    let err = decode_documents("metadata:\n  name: orphan\n").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::Decode { .. })
    ));
}

#[test]
fn missing_file_reports_its_path() {
    let decoder = ManifestDecoder::new(Some(fixtures()));
    let err = decoder.read_file("does-not-exist.yml").unwrap_err();
    assert!(err.to_string().contains("does-not-exist.yml"), "{err}");
}
