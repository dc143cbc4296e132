//! Override injection.
//!
//! Typed workloads get images, replica counts and sizing written straight into their fields.
//! Embedded manifests of any kind are mutated through the [`Node`] tree, which is how resource
//! overrides reach objects the typed schema knows nothing about.

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::definition::{
    ContainerOverrides, ImageDescriptionRef, PipelineDefinition, ResourceOverride,
};
use crate::error::BuildError;
use crate::manifest::workload::ResourceList;
use crate::manifest::{Node, NodeMap, Workload};
use crate::quantity::Quantity;
use crate::sizing::ContainerRecommendations;

const CPU: &str = "cpu";
const MEMORY: &str = "memory";

/// Sets the image of every container (and init container) named by one of `refs`.
/// References to unknown descriptions are skipped.
pub fn inject_images(
    workload: &mut Workload,
    refs: &[ImageDescriptionRef],
    pipeline: &PipelineDefinition,
) -> usize {
    let mut injected = 0;
    let spec = workload.pod_spec_mut();
    for container in spec
        .containers
        .iter_mut()
        .chain(spec.init_containers.iter_mut())
    {
        let Some(reference) = refs.iter().find(|r| r.container_name == container.name) else {
            continue;
        };
        let Some(image) = pipeline
            .image_description(&reference.name)
            .and_then(|desc| desc.image_reference())
        else {
            warn!(
                container = %container.name,
                description = %reference.name,
                "Image description not found; container image left unchanged"
            );
            continue;
        };
        container.image = Some(image);
        injected += 1;
    }
    injected
}

pub fn set_target_size(workload: &mut Workload, replicas: i64) {
    if !workload.set_replicas(replicas) {
        debug!(kind = workload.kind().as_str(), "Workload has no replica count to set");
    }
}

/// Fills CPU and memory requests the manifest left unset with sizing recommendations for the
/// matching container.
pub fn fill_sizing(workload: &mut Workload, recommendations: &ContainerRecommendations) {
    for container in workload.pod_spec_mut().containers.iter_mut() {
        let Some(rec) = recommendations.get(&container.name) else {
            continue;
        };
        let requests = &mut container.resources.requests;
        fill_request(requests, CPU, rec.cpu_quantity());
        fill_request(requests, MEMORY, rec.ram_quantity());
    }
}

fn fill_request(requests: &mut ResourceList, field: &str, value: Option<Quantity>) {
    if requests.contains_key(field) {
        return;
    }
    if let Some(quantity) = value {
        requests.insert(field.to_string(), Node::from(quantity.to_string()));
    }
}

/// Path of the pod template's container list for a given object kind.
fn containers_path(kind: &str) -> Option<&'static [&'static str]> {
    match kind {
        "Deployment" | "ReplicaSet" | "StatefulSet" | "DaemonSet" | "Job" => {
            Some(&["spec", "template", "spec", "containers"])
        }
        "CronJob" => Some(&[
            "spec",
            "jobTemplate",
            "spec",
            "template",
            "spec",
            "containers",
        ]),
        "Pod" => Some(&["spec", "containers"]),
        _ => None,
    }
}

/// Applies container overrides to a schema-less object. Overrides naming containers the object
/// does not have are no-ops.
pub fn apply_overrides(object: &mut Node, overrides: &[ContainerOverrides]) -> Result<()> {
    if overrides.is_empty() {
        return Ok(());
    }
    let kind = object.str_at(&["kind"]).unwrap_or_default().to_string();
    let Some(path) = containers_path(&kind) else {
        debug!(kind = %kind, "Object kind has no pod template; overrides skipped");
        return Ok(());
    };
    let Some(containers) = object.get_path_mut(path).and_then(Node::as_list_mut) else {
        return Ok(());
    };

    for over in overrides {
        let mut matched = false;
        for container in containers.iter_mut() {
            if container.str_at(&["name"]) != Some(over.name.as_str()) {
                continue;
            }
            matched = true;
            apply_container_override(container, over)?;
        }
        if !matched {
            debug!(container = %over.name, kind = %kind, "Override names no container; skipped");
        }
    }
    Ok(())
}

fn apply_container_override(container: &mut Node, over: &ContainerOverrides) -> Result<()> {
    if let Some(command) = &over.command {
        container.set_path(&["command"], string_list(command))?;
    }
    if let Some(args) = &over.args {
        container.set_path(&["args"], string_list(args))?;
    }
    let Some(resources) = &over.resources else {
        return Ok(());
    };
    for (section, directive) in [
        ("requests", &resources.requests),
        ("limits", &resources.limits),
    ] {
        if let Some(directive) = directive {
            merge_resource_section(container, section, directive, &over.name).with_context(
                || format!("Failed to set resources {section} for container: {}", over.name),
            )?;
        }
    }
    Ok(())
}

/// Overlays the directive's quantities onto `resources.<section>`, leaving fields the directive
/// does not name as they were.
fn merge_resource_section(
    container: &mut Node,
    section: &'static str,
    directive: &ResourceOverride,
    container_name: &str,
) -> Result<()> {
    let mut merged = existing_quantities(container, section, container_name)?;

    for (field, value) in [(MEMORY, &directive.memory), (CPU, &directive.cpu)] {
        let Some(text) = value.as_ref().map(|v| v.as_str()).filter(|t| !t.is_empty()) else {
            continue;
        };
        let quantity = Quantity::parse(text).map_err(|_| BuildError::QuantityParse {
            section,
            container: container_name.to_string(),
            field: field_name(field),
            value: text.to_string(),
        })?;
        merged.insert(field.to_string(), Node::from(quantity.to_string()));
    }

    container.set_path(&["resources", section], Node::Map(merged))
}

/// Reads the current section, validating the CPU and memory entries it already has.
fn existing_quantities(
    container: &Node,
    section: &'static str,
    container_name: &str,
) -> Result<NodeMap> {
    let Some(current) = container
        .get_path(&["resources", section])
        .and_then(Node::as_map)
    else {
        return Ok(NodeMap::new());
    };

    let mut list = current.clone();
    for field in [CPU, MEMORY] {
        let Some(text) = list.get(field).and_then(Node::scalar_text) else {
            continue;
        };
        let quantity = Quantity::parse(&text).map_err(|_| BuildError::QuantityParse {
            section,
            container: container_name.to_string(),
            field: field_name(field),
            value: text.clone(),
        })?;
        list.insert(field.to_string(), Node::from(quantity.to_string()));
    }
    Ok(list)
}

fn field_name(field: &str) -> &'static str {
    if field == CPU { CPU } else { MEMORY }
}

fn string_list(items: &[String]) -> Node {
    Node::List(items.iter().map(|s| Node::from(s.as_str())).collect())
}
