use anyhow::{Result, anyhow};
use std::collections::BTreeMap;
use tracing::debug;

use super::{CLOUD_PROVIDER, StageBuilder, StageContext};
use crate::containers::ManifestGroup;
use crate::definition::{
    ContainerCommand, DeployGroup, DeployStage, PodOverrides, RunJobStage, StageDefinition,
};
use crate::error::BuildError;
use crate::graph::{ClusterRecord, ContainerRecord, DeployBody, RunJobBody, StageBody};

const DNS_POLICY: &str = "ClusterFirst";

impl StageBuilder for RunJobStage {
    fn stage_type(&self) -> &'static str {
        "runJob"
    }

    fn build(&self, ctx: &StageContext<'_>, stage: &StageDefinition) -> Result<StageBody> {
        let group = ctx.projector().ingest(self, None)?;
        ctx.metrics.record_manifests(1);
        let ManifestGroup {
            namespace,
            pod_annotations,
            containers,
            volume_sources,
            ..
        } = group;

        let mut container = containers.into_iter().next().ok_or_else(|| {
            anyhow!(BuildError::NoContainers {
                path: ctx.decoder.resolve(&self.manifest_file),
            })
        })?;
        if let Some(over) = &self.container {
            apply_command(&mut container, over);
        }

        Ok(StageBody::RunJob(RunJobBody {
            account: stage.account.clone(),
            annotations: merge_annotations(pod_annotations, self.pod_overrides.as_ref()),
            application: ctx.pipeline.application.clone(),
            cloud_provider: CLOUD_PROVIDER,
            cloud_provider_type: CLOUD_PROVIDER,
            container,
            dns_policy: DNS_POLICY,
            labels: BTreeMap::new(),
            namespace,
            service_account_name: self.service_account_name.clone(),
            volume_sources,
        }))
    }
}

impl StageBuilder for DeployStage {
    fn stage_type(&self) -> &'static str {
        "deploy"
    }

    fn build(&self, ctx: &StageContext<'_>, stage: &StageDefinition) -> Result<StageBody> {
        let clusters = self
            .groups
            .iter()
            .map(|group| build_cluster(ctx, stage, group))
            .collect::<Result<Vec<_>>>()?;
        Ok(StageBody::Deploy(DeployBody { clusters }))
    }
}

fn build_cluster(
    ctx: &StageContext<'_>,
    stage: &StageDefinition,
    group: &DeployGroup,
) -> Result<ClusterRecord> {
    let sizing = group.sizing.as_ref().and_then(|selection| {
        let profile = ctx.options.sizing.profile(&selection.profile);
        if profile.is_none() {
            debug!(profile = %selection.profile, "No sizing recommendations for profile");
        }
        profile
    });
    let manifest = ctx.projector().ingest(group, sizing)?;
    ctx.metrics.record_manifests(1);
    let path = || ctx.decoder.resolve(&group.manifest_file);

    let mut containers = manifest.containers;
    if containers.is_empty() {
        return Err(BuildError::NoContainers { path: path() }.into());
    }
    if let Some(over) = &group.container_overrides {
        if containers.len() > 1 {
            return Err(BuildError::OverrideContention {
                path: path(),
                count: containers.len(),
            }
            .into());
        }
        apply_command(&mut containers[0], over);
    }

    Ok(ClusterRecord {
        account: stage.account.clone(),
        application: ctx.pipeline.application.clone(),
        cloud_provider: CLOUD_PROVIDER,
        containers,
        init_containers: manifest.init_containers,
        dns_policy: DNS_POLICY,
        events: Vec::new(),
        free_form_details: group.details.clone(),
        interesting_health_provider_names: vec!["KubernetesContainer", "KubernetesPod"],
        load_balancers: group.load_balancers.clone(),
        max_remaining_asgs: group.max_remaining_asgs,
        namespace: manifest.namespace.clone(),
        node_selector: BTreeMap::new(),
        pod_annotations: merge_annotations(manifest.pod_annotations, group.pod_overrides.as_ref()),
        provider: CLOUD_PROVIDER,
        region: manifest.namespace.clone(),
        replica_set_annotations: manifest.annotations,
        scale_down: group.scale_down,
        security_groups: Vec::new(),
        stack: group.stack.clone(),
        strategy: group.strategy.clone(),
        target_size: group.target_size,
        termination_grace_period_seconds: 30,
        volume_sources: manifest.volume_sources,
    })
}

/// Replaces whichever of command and args the override declares.
fn apply_command(container: &mut ContainerRecord, over: &ContainerCommand) {
    if let Some(command) = &over.command {
        container.command = command.clone();
    }
    if let Some(args) = &over.args {
        container.args = args.clone();
    }
}

/// Override annotations win over the manifest's pod annotations.
fn merge_annotations(
    mut annotations: BTreeMap<String, String>,
    overrides: Option<&PodOverrides>,
) -> BTreeMap<String, String> {
    if let Some(overrides) = overrides {
        annotations.extend(overrides.annotations.clone());
    }
    annotations
}
