//! Stage builders: one per stage kind, each turning a declared payload into the body of an
//! execution-graph stage.

mod control;
mod manifests;
mod workloads;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::containers::ContainerProjector;
use crate::definition::{Notification, PipelineDefinition, StageDefinition, StageKind, StagePolicy};
use crate::graph::{
    NotificationRecord, NotificationText, ResolvedPolicy, StageBody, StageEnabled, StageMetadata,
    StageRecord, TrafficManagement,
};
use crate::manifest::ManifestDecoder;
use crate::observability::MetricsCollector;
use crate::pipeline::BuilderOptions;

pub use manifests::{DEFAULT_MANIFEST_TIMEOUT_MS, assemble_moniker};
pub use control::{DEFAULT_JENKINS_MASTER, DEFAULT_PIPELINE_TIMEOUT_MS};

pub const HOUR_MS: i64 = 3_600_000;
pub const CLOUD_PROVIDER: &str = "kubernetes";

/// Shared, read-only state every stage builder sees.
pub struct StageContext<'a> {
    pub pipeline: &'a PipelineDefinition,
    pub options: &'a BuilderOptions,
    pub decoder: &'a ManifestDecoder,
    pub metrics: &'a MetricsCollector,
}

impl StageContext<'_> {
    pub fn projector(&self) -> ContainerProjector<'_> {
        ContainerProjector::new(self.pipeline, self.decoder)
    }
}

pub trait StageBuilder {
    /// Value of the produced stage's `type` field.
    fn stage_type(&self) -> &'static str;

    /// Display name that replaces the declared stage name, if the payload carries one.
    fn display_name(&self) -> Option<&str> {
        None
    }

    fn build(&self, ctx: &StageContext<'_>, stage: &StageDefinition) -> Result<StageBody>;
}

pub fn builder_for(kind: &StageKind) -> &dyn StageBuilder {
    match kind {
        StageKind::RunJob(payload) => payload,
        StageKind::Deploy(payload) => payload,
        StageKind::ManualJudgement(payload) => payload,
        StageKind::DeployEmbeddedManifests(payload) => payload,
        StageKind::DeleteEmbeddedManifest(payload) => payload,
        StageKind::ScaleManifest(payload) => payload,
        StageKind::WebHook(payload) => payload,
        StageKind::Jenkins(payload) => payload,
        StageKind::EvaluateVariables(payload) => payload,
        StageKind::RunSpinnakerPipeline(payload) => payload,
    }
}

/// Builds the stage at output position `index`. Stages without a payload produce nothing.
#[instrument(skip_all, fields(stage = %stage.name, index))]
pub fn build_stage(
    ctx: &StageContext<'_>,
    stage: &StageDefinition,
    index: usize,
) -> Result<Option<StageRecord>> {
    let Some(kind) = &stage.kind else {
        debug!("Stage declares no kind; skipping");
        ctx.metrics.record_skipped_stage();
        return Ok(None);
    };

    let builder = builder_for(kind);
    let mut timer = ctx.metrics.start_stage(builder.stage_type());
    let body = builder
        .build(ctx, stage)
        .inspect_err(|_| timer.fail())
        .with_context(|| format!("Failed to build {} stage '{}'", kind.key(), stage.name))?;

    let mut metadata = stage_metadata(stage, builder.stage_type(), index, ctx.options.linear);
    if let Some(name) = builder.display_name().filter(|n| !n.is_empty()) {
        metadata.name = name.to_string();
    }
    Ok(Some(StageRecord { metadata, body }))
}

pub fn stage_metadata(
    stage: &StageDefinition,
    kind: &'static str,
    index: usize,
    linear: bool,
) -> StageMetadata {
    let (ref_id, requisite_stage_ref_ids) =
        wire_refs(index, linear, stage.ref_id.as_deref(), stage.relies_on.as_deref());
    let notifications = notification_records(&stage.notifications);

    StageMetadata {
        ref_id,
        requisite_stage_ref_ids,
        name: stage.name.clone(),
        kind,
        send_notifications: !notifications.is_empty(),
        notifications,
        traffic_management: TrafficManagement::default(),
        stage_enabled: stage.condition.as_ref().map(|expression| StageEnabled {
            expression: expression.clone(),
            kind: "expression",
        }),
    }
}

/// Reference id and prerequisites of the stage at `index`. Linear mode chains each stage to the
/// one before it and ignores declared ids.
pub fn wire_refs(
    index: usize,
    linear: bool,
    ref_id: Option<&str>,
    relies_on: Option<&[String]>,
) -> (String, Vec<String>) {
    if linear {
        let requisites = match index {
            0 => Vec::new(),
            n => vec![(n - 1).to_string()],
        };
        return (index.to_string(), requisites);
    }
    (
        ref_id.unwrap_or_default().to_string(),
        relies_on.map(<[String]>::to_vec).unwrap_or_default(),
    )
}

pub fn notification_records(notifications: &[Notification]) -> Vec<NotificationRecord> {
    notifications
        .iter()
        .map(|n| NotificationRecord {
            address: n.address.clone(),
            level: n.level.clone(),
            kind: n.kind.clone(),
            when: n.when.clone(),
            message: n
                .message
                .iter()
                .map(|(event, text)| (event.clone(), NotificationText { text: text.clone() }))
                .collect(),
        })
        .collect()
}

/// Per-kind values for policy flags the author left unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDefaults {
    pub complete_other_branches_then_fail: bool,
    pub continue_pipeline: bool,
    pub fail_pipeline: bool,
    pub mark_unstable_as_successful: bool,
    pub wait_for_completion: bool,
}

impl PolicyDefaults {
    /// Manifest stages and sub-pipeline runs.
    pub const STANDARD: Self = Self {
        complete_other_branches_then_fail: false,
        continue_pipeline: false,
        fail_pipeline: true,
        mark_unstable_as_successful: false,
        wait_for_completion: true,
    };

    pub const JENKINS: Self = Self {
        complete_other_branches_then_fail: true,
        continue_pipeline: true,
        fail_pipeline: false,
        mark_unstable_as_successful: false,
        wait_for_completion: true,
    };
}

pub fn resolve_policy(policy: &StagePolicy, defaults: PolicyDefaults) -> ResolvedPolicy {
    ResolvedPolicy {
        complete_other_branches_then_fail: policy
            .complete_other_branches_then_fail
            .value_or(defaults.complete_other_branches_then_fail),
        continue_pipeline: policy.continue_pipeline.value_or(defaults.continue_pipeline),
        fail_pipeline: policy.fail_pipeline.value_or(defaults.fail_pipeline),
        mark_unstable_as_successful: policy
            .mark_unstable_as_successful
            .value_or(defaults.mark_unstable_as_successful),
        wait_for_completion: policy.wait_for_completion.value_or(defaults.wait_for_completion),
    }
}

/// A configured timeout of zero means "use the default".
pub fn timeout_or(configured: Option<i64>, default_ms: i64) -> i64 {
    configured.filter(|ms| *ms > 0).unwrap_or(default_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::PolicyFlag;

    #[test]
    fn linear_wiring_chains_by_index() {
        assert_eq!(wire_refs(0, true, Some("deploy"), None), ("0".into(), vec![]));
        assert_eq!(
            wire_refs(3, true, None, Some(&["1".to_string()])),
            ("3".into(), vec!["2".to_string()])
        );
    }

    #[test]
    fn declared_wiring_defaults_to_no_prerequisites() {
        assert_eq!(wire_refs(4, false, None, None), (String::new(), vec![]));
        let relies = vec!["build".to_string(), "test".to_string()];
        assert_eq!(
            wire_refs(4, false, Some("ship"), Some(&relies)),
            ("ship".into(), relies.clone())
        );
    }

    #[test]
    fn unset_policy_flags_take_kind_defaults() {
        let policy = StagePolicy {
            fail_pipeline: PolicyFlag::from(false),
            ..Default::default()
        };
        let manifest = resolve_policy(&policy, PolicyDefaults::STANDARD);
        assert!(!manifest.fail_pipeline);
        assert!(manifest.wait_for_completion);
        assert!(!manifest.continue_pipeline);

        let jenkins = resolve_policy(&StagePolicy::default(), PolicyDefaults::JENKINS);
        assert!(jenkins.complete_other_branches_then_fail);
        assert!(jenkins.continue_pipeline);
        assert!(!jenkins.fail_pipeline);
    }

    #[test]
    fn zero_timeout_uses_default() {
        assert_eq!(timeout_or(Some(0), 1_800_000), 1_800_000);
        assert_eq!(timeout_or(None, 1_800_000), 1_800_000);
        assert_eq!(timeout_or(Some(60_000), 1_800_000), 60_000);
    }
}
