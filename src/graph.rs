//! Output schema: the execution graph handed to the delivery platform.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::definition::Moniker;
use crate::manifest::Node;
use crate::manifest::workload::KeyToPath;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineGraph {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub application: String,
    pub triggers: Vec<TriggerRecord>,
    pub stages: Vec<StageRecord>,
    pub notifications: Vec<NotificationRecord>,
    pub parameter_config: Vec<ParameterRecord>,
    pub limit_concurrent: bool,
    pub keep_waiting_pipelines: bool,
    pub description: String,
    pub app_config: BTreeMap<String, Node>,
}

impl PipelineGraph {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize pipeline graph")
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize pipeline graph")
    }

    /// Hex SHA-256 of the compact JSON rendering; equal graphs always share a fingerprint.
    pub fn fingerprint(&self) -> Result<String> {
        let json = self.to_json()?;
        let digest = Sha256::digest(json.as_bytes());
        Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TriggerRecord {
    Jenkins(JenkinsTriggerRecord),
    Webhook(WebhookTriggerRecord),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JenkinsTriggerRecord {
    pub enabled: bool,
    pub job: String,
    pub master: String,
    pub property_file: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookTriggerRecord {
    pub enabled: bool,
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterRecord {
    pub name: String,
    pub description: String,
    pub default: String,
    pub required: bool,
    pub has_options: bool,
    pub options: Vec<OptionRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptionRecord {
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationRecord {
    pub address: String,
    pub level: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub when: Vec<String>,
    pub message: BTreeMap<String, NotificationText>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationText {
    pub text: String,
}

/// Fields every stage carries regardless of kind.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageMetadata {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ref_id: String,
    pub requisite_stage_ref_ids: Vec<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notifications: Vec<NotificationRecord>,
    pub send_notifications: bool,
    pub traffic_management: TrafficManagement,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_enabled: Option<StageEnabled>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrafficManagement {
    pub enabled: bool,
    pub options: TrafficOptions,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficOptions {
    pub enable_traffic: bool,
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageEnabled {
    pub expression: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    #[serde(flatten)]
    pub metadata: StageMetadata,
    #[serde(flatten)]
    pub body: StageBody,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StageBody {
    RunJob(RunJobBody),
    Deploy(DeployBody),
    ManualJudgement(ManualJudgementBody),
    DeployManifest(DeployManifestBody),
    DeleteManifest(DeleteManifestBody),
    ScaleManifest(ScaleManifestBody),
    WebHook(WebHookBody),
    Jenkins(JenkinsBody),
    EvaluateVariables(EvaluateVariablesBody),
    RunPipeline(RunPipelineBody),
}

/// Execution policy after per-kind defaults were applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPolicy {
    pub complete_other_branches_then_fail: bool,
    pub continue_pipeline: bool,
    pub fail_pipeline: bool,
    pub mark_unstable_as_successful: bool,
    pub wait_for_completion: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunJobBody {
    pub account: String,
    pub annotations: BTreeMap<String, String>,
    pub application: String,
    pub cloud_provider: &'static str,
    pub cloud_provider_type: &'static str,
    pub container: ContainerRecord,
    pub dns_policy: &'static str,
    pub labels: BTreeMap<String, String>,
    pub namespace: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service_account_name: String,
    pub volume_sources: Vec<VolumeSourceRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeployBody {
    pub clusters: Vec<ClusterRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRecord {
    pub account: String,
    pub application: String,
    pub cloud_provider: &'static str,
    pub containers: Vec<ContainerRecord>,
    pub init_containers: Vec<ContainerRecord>,
    pub dns_policy: &'static str,
    pub events: Vec<Node>,
    pub free_form_details: String,
    pub interesting_health_provider_names: Vec<&'static str>,
    pub load_balancers: Vec<String>,
    pub max_remaining_asgs: i64,
    pub namespace: String,
    pub node_selector: BTreeMap<String, String>,
    pub pod_annotations: BTreeMap<String, String>,
    pub provider: &'static str,
    pub region: String,
    pub replica_set_annotations: BTreeMap<String, String>,
    pub scale_down: bool,
    pub security_groups: Vec<Node>,
    pub stack: String,
    pub strategy: String,
    pub target_size: i64,
    pub termination_grace_period_seconds: i64,
    pub volume_sources: Vec<VolumeSourceRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualJudgementBody {
    pub fail_pipeline: bool,
    pub instructions: String,
    pub judgment_inputs: Vec<JudgmentInput>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub override_timeout: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_timeout_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JudgmentInput {
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployManifestBody {
    pub account: String,
    pub cloud_provider: &'static str,
    pub location: String,
    pub manifest_artifact_account: &'static str,
    pub manifest_name: String,
    pub manifests: Vec<Node>,
    pub moniker: Moniker,
    pub relationships: Relationships,
    pub source: &'static str,
    #[serde(flatten)]
    pub policy: ResolvedPolicy,
    pub override_timeout: bool,
    pub stage_timeout_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationships {
    pub load_balancers: Vec<Node>,
    pub security_groups: Vec<Node>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteManifestBody {
    pub account: String,
    pub cloud_provider: &'static str,
    pub location: String,
    pub manifest_name: String,
    #[serde(flatten)]
    pub policy: ResolvedPolicy,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleManifestBody {
    pub account: String,
    pub cloud_provider: &'static str,
    pub kind: String,
    pub location: String,
    pub manifest_name: String,
    pub replicas: i64,
    #[serde(flatten)]
    pub policy: ResolvedPolicy,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebHookBody {
    pub custom_headers: BTreeMap<String, Vec<String>>,
    pub description: String,
    pub method: String,
    pub payload: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JenkinsBody {
    pub job: String,
    pub master: String,
    pub parameters: BTreeMap<String, String>,
    #[serde(flatten)]
    pub policy: ResolvedPolicy,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateVariablesBody {
    pub fail_on_failed_expressions: bool,
    pub variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPipelineBody {
    pub application: String,
    pub pipeline: String,
    pub pipeline_parameters: BTreeMap<String, String>,
    #[serde(flatten)]
    pub policy: ResolvedPolicy,
    pub override_timeout: bool,
    pub stage_timeout_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    pub name: String,
    pub args: Vec<String>,
    pub command: Vec<String>,
    pub env_vars: Vec<EnvVarRecord>,
    pub env_from: Vec<EnvFromRecord>,
    pub image_description: ImageDescriptionRecord,
    pub image_pull_policy: String,
    pub limits: ResourceRecord,
    pub requests: ResourceRecord,
    pub ports: Vec<PortRecord>,
    pub volume_mounts: Vec<VolumeMountRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<ProbeRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<ProbeRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContextRecord>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDescriptionRecord {
    pub account: String,
    pub from_trigger: bool,
    pub image_id: String,
    pub organization: String,
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceRecord {
    pub cpu: String,
    pub memory: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortRecord {
    pub container_port: i32,
    pub name: String,
    pub protocol: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarRecord {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_source: Option<EnvSourceRecord>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvSourceRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_map_source: Option<ConfigMapKeySource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_source: Option<SecretKeySource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_ref: Option<FieldRefSource>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapKeySource {
    pub config_map_name: String,
    pub key: String,
    pub optional: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeySource {
    pub secret_name: String,
    pub key: String,
    pub optional: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRefSource {
    pub field_path: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvFromRecord {
    pub prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<NamedSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<NamedSource>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamedSource {
    pub name: String,
    pub optional: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMountRecord {
    pub name: String,
    pub mount_path: String,
    pub read_only: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sub_path: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeRecord {
    pub handler: ProbeHandler,
    pub failure_threshold: i32,
    pub success_threshold: i32,
    pub initial_delay_seconds: i32,
    pub period_seconds: i32,
    pub timeout_seconds: i32,
}

/// Exactly one action is populated, matching `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeHandler {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_get_action: Option<HttpGetRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec_action: Option<ExecRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_socket_action: Option<TcpSocketRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpGetRecord {
    pub path: String,
    pub port: i32,
    pub uri_scheme: String,
    pub http_headers: Vec<HttpHeaderRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HttpHeaderRecord {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecRecord {
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TcpSocketRecord {
    pub port: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContextRecord {
    pub privileged: bool,
    pub read_only_root_filesystem: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<CapabilitiesRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapabilitiesRecord {
    pub add: Vec<String>,
    pub drop: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSourceRecord {
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapVolumeRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretVolumeRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDirRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<ClaimRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapVolumeRecord {
    pub config_map_name: String,
    pub items: Vec<KeyToPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_mode: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretVolumeRecord {
    pub secret_name: String,
    pub items: Vec<KeyToPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_mode: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmptyDirRecord {
    pub medium: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRecord {
    pub claim_name: String,
    pub read_only: bool,
}
