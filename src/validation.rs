use serde::Serialize;
use tracing::warn;

use crate::error::ResourceViolations;
use crate::graph::{ContainerRecord, PipelineGraph, ResourceRecord, StageBody};
use crate::quantity;

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn into_result(self) -> Result<(), ResourceViolations> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(ResourceViolations {
                violations: self.errors,
            })
        }
    }
}

/// Checks that every container of every deploy stage declares CPU and memory for both requests
/// and limits. All violations are collected; nothing stops at the first.
pub fn validate_graph(graph: &PipelineGraph) -> ValidationReport {
    let mut report = ValidationReport::default();
    for stage in &graph.stages {
        let StageBody::Deploy(deploy) = &stage.body else {
            continue;
        };
        if deploy.clusters.is_empty() {
            report.warnings.push(format!(
                "Stage: {} - Deploy stage has no clusters",
                stage.metadata.name
            ));
        }
        for cluster in &deploy.clusters {
            for container in &cluster.containers {
                report.merge(validate_container(&stage.metadata.name, container));
            }
        }
    }

    for message in &report.errors {
        warn!(violation = %message, "Resource validation failed");
    }
    report
}

fn validate_container(stage: &str, container: &ContainerRecord) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut check = |section: &str, resources: &ResourceRecord| {
        for (field, value) in [("CPU", &resources.cpu), ("Memory", &resources.memory)] {
            if quantity::is_missing(value) {
                report.errors.push(format!(
                    "Stage: {stage}, Container: {} - Missing {field} on Resource {section}",
                    container.name
                ));
            }
        }
    };
    check("Requests", &container.requests);
    check("Limits", &container.limits);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ImageDescriptionRecord;

    fn container(requests: (&str, &str), limits: (&str, &str)) -> ContainerRecord {
        ContainerRecord {
            name: "web".into(),
            args: vec![],
            command: vec![],
            env_vars: vec![],
            env_from: vec![],
            image_description: ImageDescriptionRecord::default(),
            image_pull_policy: String::new(),
            limits: ResourceRecord {
                cpu: limits.0.into(),
                memory: limits.1.into(),
            },
            requests: ResourceRecord {
                cpu: requests.0.into(),
                memory: requests.1.into(),
            },
            ports: vec![],
            volume_mounts: vec![],
            liveness_probe: None,
            readiness_probe: None,
            security_context: None,
        }
    }

    #[test]
    fn fully_sized_container_passes() {
        let report = validate_container("deploy", &container(("100m", "128Mi"), ("1", "1Gi")));
        assert!(report.is_ok());
    }

    #[test]
    fn zero_and_empty_quantities_are_missing() {
        let report = validate_container("deploy", &container(("0", ""), ("1", "0Mi")));
        assert_eq!(
            report.errors,
            [
                "Stage: deploy, Container: web - Missing CPU on Resource Requests",
                "Stage: deploy, Container: web - Missing Memory on Resource Requests",
                "Stage: deploy, Container: web - Missing Memory on Resource Limits",
            ]
        );
        let err = report.into_result().unwrap_err();
        assert!(err.to_string().starts_with("3 resource violation(s):"));
    }
}
