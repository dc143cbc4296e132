//! The pipeline definition authors write: stages, triggers, parameters and the manifests those
//! stages pull container detail from.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

use crate::error::BuildError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub application: String,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub stages: Vec<StageDefinition>,
    #[serde(default)]
    pub image_descriptions: Vec<ImageDescription>,
    #[serde(default)]
    pub disable_concurrent_executions: bool,
    #[serde(default)]
    pub keep_queued_pipelines: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl PipelineDefinition {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse pipeline YAML: {}", path.display()))
    }

    pub fn from_yaml_str(source: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn image_description(&self, name: &str) -> Option<&ImageDescription> {
        self.image_descriptions.iter().find(|desc| desc.name == name)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Trigger {
    #[serde(default)]
    pub jenkins: Option<JenkinsTrigger>,
    #[serde(default)]
    pub webhook: Option<WebhookTrigger>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JenkinsTrigger {
    #[serde(default)]
    pub job: String,
    #[serde(default)]
    pub master: String,
    #[serde(default)]
    pub property_file: String,
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookTrigger {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<ParameterOption>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParameterOption {
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageDescription {
    pub name: String,
    #[serde(default)]
    pub account: String,
    #[serde(default, alias = "imageId")]
    pub image_id: String,
    #[serde(default)]
    pub registry: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub organization: String,
}

impl ImageDescription {
    /// The image a container should run: the explicit image id, else `registry/repository:tag`.
    pub fn image_reference(&self) -> Option<String> {
        if !self.image_id.is_empty() {
            return Some(self.image_id.clone());
        }
        if self.repository.is_empty() {
            return None;
        }
        let mut image = match self.registry.as_str() {
            "" => self.repository.clone(),
            registry => format!("{registry}/{}", self.repository),
        };
        if !self.tag.is_empty() {
            image = format!("{image}:{}", self.tag);
        }
        Some(image)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub level: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub when: Vec<String>,
    #[serde(default)]
    pub message: BTreeMap<String, String>,
}

/// An optional boolean whose default depends on the stage kind reading it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct PolicyFlag(pub Option<bool>);

impl PolicyFlag {
    pub fn value_or(self, default: bool) -> bool {
        self.0.unwrap_or(default)
    }
}

impl From<bool> for PolicyFlag {
    fn from(value: bool) -> Self {
        Self(Some(value))
    }
}

/// Execution policy switches shared by the manifest, jenkins and sub-pipeline stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagePolicy {
    #[serde(default)]
    pub complete_other_branches_then_fail: PolicyFlag,
    #[serde(default)]
    pub continue_pipeline: PolicyFlag,
    #[serde(default)]
    pub fail_pipeline: PolicyFlag,
    #[serde(default)]
    pub mark_unstable_as_successful: PolicyFlag,
    #[serde(default)]
    pub wait_for_completion: PolicyFlag,
}

/// One declared stage. Exactly one kind payload may be present; a record without any payload
/// is kept with `kind: None` and produces nothing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "RawStage")]
pub struct StageDefinition {
    pub account: String,
    pub name: String,
    pub ref_id: Option<String>,
    pub relies_on: Option<Vec<String>>,
    pub notifications: Vec<Notification>,
    pub condition: Option<String>,
    pub kind: Option<StageKind>,
}

#[derive(Debug, Clone)]
pub enum StageKind {
    RunJob(RunJobStage),
    Deploy(DeployStage),
    ManualJudgement(ManualJudgementStage),
    DeployEmbeddedManifests(DeployEmbeddedManifests),
    DeleteEmbeddedManifest(DeleteEmbeddedManifest),
    ScaleManifest(ScaleManifest),
    WebHook(WebHookStage),
    Jenkins(JenkinsStage),
    EvaluateVariables(EvaluateVariablesStage),
    RunSpinnakerPipeline(RunSpinnakerPipelineStage),
}

impl StageKind {
    /// Definition keys that select each kind, in dispatch order.
    pub const KEYS: [&'static str; 10] = [
        "runJob",
        "deploy",
        "manualJudgement",
        "deployEmbeddedManifests",
        "deleteEmbeddedManifest",
        "scaleManifest",
        "webHook",
        "jenkins",
        "evaluatevariables",
        "spinnaker",
    ];

    pub fn key(&self) -> &'static str {
        match self {
            StageKind::RunJob(_) => Self::KEYS[0],
            StageKind::Deploy(_) => Self::KEYS[1],
            StageKind::ManualJudgement(_) => Self::KEYS[2],
            StageKind::DeployEmbeddedManifests(_) => Self::KEYS[3],
            StageKind::DeleteEmbeddedManifest(_) => Self::KEYS[4],
            StageKind::ScaleManifest(_) => Self::KEYS[5],
            StageKind::WebHook(_) => Self::KEYS[6],
            StageKind::Jenkins(_) => Self::KEYS[7],
            StageKind::EvaluateVariables(_) => Self::KEYS[8],
            StageKind::RunSpinnakerPipeline(_) => Self::KEYS[9],
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStage {
    #[serde(default)]
    account: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    ref_id: Option<String>,
    #[serde(default)]
    relies_on: Option<Vec<String>>,
    #[serde(default)]
    notifications: Vec<Notification>,
    #[serde(default)]
    condition: Option<String>,

    #[serde(default)]
    run_job: Option<RunJobStage>,
    #[serde(default)]
    deploy: Option<DeployStage>,
    #[serde(default)]
    manual_judgement: Option<ManualJudgementStage>,
    #[serde(default)]
    deploy_embedded_manifests: Option<DeployEmbeddedManifests>,
    #[serde(default)]
    delete_embedded_manifest: Option<DeleteEmbeddedManifest>,
    #[serde(default)]
    scale_manifest: Option<ScaleManifest>,
    #[serde(default, rename = "webHook")]
    web_hook: Option<WebHookStage>,
    #[serde(default)]
    jenkins: Option<JenkinsStage>,
    #[serde(default, rename = "evaluatevariables", alias = "evaluateVariables")]
    evaluate_variables: Option<EvaluateVariablesStage>,
    #[serde(default, rename = "spinnaker")]
    run_spinnaker_pipeline: Option<RunSpinnakerPipelineStage>,
}

impl TryFrom<RawStage> for StageDefinition {
    type Error = BuildError;

    fn try_from(raw: RawStage) -> Result<Self, Self::Error> {
        let candidates = [
            raw.run_job.map(StageKind::RunJob),
            raw.deploy.map(StageKind::Deploy),
            raw.manual_judgement.map(StageKind::ManualJudgement),
            raw.deploy_embedded_manifests
                .map(StageKind::DeployEmbeddedManifests),
            raw.delete_embedded_manifest
                .map(StageKind::DeleteEmbeddedManifest),
            raw.scale_manifest.map(StageKind::ScaleManifest),
            raw.web_hook.map(StageKind::WebHook),
            raw.jenkins.map(StageKind::Jenkins),
            raw.evaluate_variables.map(StageKind::EvaluateVariables),
            raw.run_spinnaker_pipeline
                .map(StageKind::RunSpinnakerPipeline),
        ];
        let mut present: Vec<StageKind> = candidates.into_iter().flatten().collect();
        if present.len() > 1 {
            return Err(BuildError::AmbiguousStageKind {
                kinds: present.iter().map(StageKind::key).collect(),
            });
        }

        Ok(Self {
            account: raw.account,
            name: raw.name,
            ref_id: raw.ref_id,
            relies_on: raw.relies_on,
            notifications: raw.notifications,
            condition: raw.condition.filter(|c| !c.is_empty()),
            kind: present.pop(),
        })
    }
}

/// Replaces a container's command and/or arguments.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerCommand {
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodOverrides {
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Points a container at one of the pipeline's named image descriptions.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDescriptionRef {
    pub name: String,
    pub container_name: String,
}

/// Selects a set of cost-sizing recommendations.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SizingRef {
    pub profile: String,
}

/// The capabilities a stage payload needs for its manifest to be ingested.
pub trait Scaffold {
    fn manifest(&self) -> &str;
    fn image_description_ref(&self, container: &str) -> Option<&ImageDescriptionRef>;
    fn target_size(&self) -> i64;
}

fn find_image_ref<'a>(
    refs: &'a [ImageDescriptionRef],
    container: &str,
) -> Option<&'a ImageDescriptionRef> {
    refs.iter().find(|r| r.container_name == container)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunJobStage {
    pub manifest_file: String,
    #[serde(default)]
    pub image_descriptions: Vec<ImageDescriptionRef>,
    #[serde(default)]
    pub container: Option<ContainerCommand>,
    #[serde(default)]
    pub pod_overrides: Option<PodOverrides>,
    #[serde(default)]
    pub service_account_name: String,
    #[serde(default)]
    pub delete_job: bool,
}

impl Scaffold for RunJobStage {
    fn manifest(&self) -> &str {
        &self.manifest_file
    }

    fn image_description_ref(&self, container: &str) -> Option<&ImageDescriptionRef> {
        find_image_ref(&self.image_descriptions, container)
    }

    fn target_size(&self) -> i64 {
        1
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeployStage {
    #[serde(default)]
    pub groups: Vec<DeployGroup>,
}

/// One server group of a deploy stage; most of its content comes from the manifest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployGroup {
    pub manifest_file: String,
    #[serde(default)]
    pub image_descriptions: Vec<ImageDescriptionRef>,
    #[serde(default, rename = "maxRemainingASGS", alias = "maxRemainingAsgs")]
    pub max_remaining_asgs: i64,
    #[serde(default)]
    pub scale_down: bool,
    #[serde(default)]
    pub stack: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub target_size: i64,
    #[serde(default)]
    pub load_balancers: Vec<String>,
    #[serde(default)]
    pub container_overrides: Option<ContainerCommand>,
    #[serde(default)]
    pub pod_overrides: Option<PodOverrides>,
    #[serde(default, alias = "kubecost")]
    pub sizing: Option<SizingRef>,
}

impl Scaffold for DeployGroup {
    fn manifest(&self) -> &str {
        &self.manifest_file
    }

    fn image_description_ref(&self, container: &str) -> Option<&ImageDescriptionRef> {
        find_image_ref(&self.image_descriptions, container)
    }

    fn target_size(&self) -> i64 {
        self.target_size
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualJudgementStage {
    #[serde(default)]
    pub fail_pipeline: bool,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub timeout_hours: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManifestFile {
    #[serde(default)]
    pub env: Option<String>,
    pub file: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Moniker {
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub stack: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployEmbeddedManifests {
    #[serde(default)]
    pub default_moniker: Option<Moniker>,
    #[serde(default)]
    pub stack: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub configurator_files: Vec<ManifestFile>,
    #[serde(default)]
    pub files: Vec<ManifestFile>,
    #[serde(default)]
    pub container_overrides: Vec<ContainerOverrides>,
    #[serde(default)]
    pub image_descriptions: Vec<ImageDescriptionRef>,
    #[serde(default, alias = "kubecost")]
    pub sizing: Option<SizingRef>,
    #[serde(flatten)]
    pub policy: StagePolicy,
    #[serde(default)]
    pub stage_timeout_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteEmbeddedManifest {
    pub file: String,
    #[serde(flatten)]
    pub policy: StagePolicy,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScaleManifest {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub replicas: i64,
    #[serde(flatten)]
    pub policy: StagePolicy,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebHookStage {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub custom_headers: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub payload: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PassthroughParameter {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JenkinsStage {
    #[serde(default)]
    pub job: String,
    #[serde(default)]
    pub parameters: Vec<PassthroughParameter>,
    #[serde(default)]
    pub master: String,
    #[serde(flatten)]
    pub policy: StagePolicy,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSpinnakerPipelineStage {
    #[serde(default)]
    pub application: String,
    #[serde(default)]
    pub pipeline: String,
    #[serde(default)]
    pub parameters: Vec<PassthroughParameter>,
    #[serde(flatten)]
    pub policy: StagePolicy,
    #[serde(default)]
    pub stage_timeout_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EvaluateVariablesStage {
    #[serde(default)]
    pub variables: Vec<PassthroughParameter>,
}

/// Per-container override applied to embedded manifests.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerOverrides {
    pub name: String,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub resources: Option<ResourceOverrides>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceOverrides {
    #[serde(default)]
    pub requests: Option<ResourceOverride>,
    #[serde(default)]
    pub limits: Option<ResourceOverride>,
}

/// CPU and memory are independent: an unset field leaves the manifest's value alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceOverride {
    #[serde(default)]
    pub memory: Option<QuantityText>,
    #[serde(default)]
    pub cpu: Option<QuantityText>,
}

/// Quantity text as written by the author; YAML numbers are accepted and kept in their plain
/// textual form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuantityText(pub String);

impl QuantityText {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for QuantityText {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct QuantityVisitor;

        impl Visitor<'_> for QuantityVisitor {
            type Value = QuantityText;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a quantity string or number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(QuantityText(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(QuantityText(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(QuantityText(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Ok(QuantityText(v.to_string()))
            }
        }

        deserializer.deserialize_any(QuantityVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_without_payload_has_no_kind() {
        let stage: StageDefinition = serde_yaml::from_str("name: empty\naccount: int").unwrap();
        assert!(stage.kind.is_none());
        assert_eq!(stage.name, "empty");
    }

    #[test]
    fn stage_with_two_payloads_is_rejected() {
        let source = r#"
name: both
jenkins:
  job: build
webHook:
  url: https://example.com
"#;
        let err = serde_yaml::from_str::<StageDefinition>(source).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("webHook"), "{message}");
        assert!(message.contains("jenkins"), "{message}");
    }

    #[test]
    fn policy_flags_keep_unset_distinct_from_false() {
        let stage: StageDefinition = serde_yaml::from_str(
            "name: j\njenkins:\n  job: build\n  failPipeline: false\n",
        )
        .unwrap();
        let Some(StageKind::Jenkins(jenkins)) = stage.kind else {
            panic!("expected a jenkins stage");
        };
        assert_eq!(jenkins.policy.fail_pipeline, PolicyFlag(Some(false)));
        assert_eq!(jenkins.policy.continue_pipeline, PolicyFlag(None));
        assert!(jenkins.policy.continue_pipeline.value_or(true));
    }

    #[test]
    fn numeric_quantities_become_text() {
        let overrides: ContainerOverrides = serde_yaml::from_str(
            "name: web\nresources:\n  limits:\n    cpu: 2\n    memory: 512Mi\n",
        )
        .unwrap();
        let limits = overrides.resources.unwrap().limits.unwrap();
        assert_eq!(limits.cpu, Some(QuantityText("2".into())));
        assert_eq!(limits.memory, Some(QuantityText("512Mi".into())));
    }
}
