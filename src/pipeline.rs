//! Pipeline assembly: triggers, parameters and notifications, then every declared stage in
//! order through its stage builder.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, bail};
use tracing::{debug, info, instrument};

use crate::definition::{Parameter, PipelineDefinition, StageDefinition, Trigger};
use crate::error::BuildError;
use crate::graph::{
    JenkinsTriggerRecord, OptionRecord, ParameterRecord, PipelineGraph, TriggerRecord,
    WebhookTriggerRecord,
};
use crate::manifest::ManifestDecoder;
use crate::observability::MetricsCollector;
use crate::sizing::SizingRecommendations;
use crate::stages::{self, StageContext};
use crate::template::{AccountEnvironments, PassthroughTemplate, Templater};

/// Every knob a build takes besides the definition itself.
#[derive(Debug, Clone)]
pub struct BuilderOptions {
    /// Ignore declared wiring and chain stages in declaration order.
    pub linear: bool,
    /// Directory relative manifest paths resolve against.
    pub base_path: Option<PathBuf>,
    /// Manual-judgement timeout applied when a stage declares none.
    pub timeout_hours: Option<u32>,
    /// Account renames applied to every stage before it is built.
    pub account_overrides: BTreeMap<String, String>,
    pub environments: AccountEnvironments,
    pub sizing: SizingRecommendations,
    pub templater: Arc<dyn Templater>,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            linear: false,
            base_path: None,
            timeout_hours: None,
            account_overrides: BTreeMap::new(),
            environments: AccountEnvironments::standard(),
            sizing: SizingRecommendations::default(),
            templater: Arc::new(PassthroughTemplate),
        }
    }
}

impl BuilderOptions {
    pub fn with_linear(mut self, linear: bool) -> Self {
        self.linear = linear;
        self
    }

    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(base_path.into());
        self
    }

    pub fn with_timeout_hours(mut self, hours: u32) -> Self {
        self.timeout_hours = Some(hours);
        self
    }

    pub fn with_account_override(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.account_overrides.insert(from.into(), to.into());
        self
    }

    pub fn with_environments(mut self, environments: AccountEnvironments) -> Self {
        self.environments = environments;
        self
    }

    pub fn with_sizing(mut self, sizing: SizingRecommendations) -> Self {
        self.sizing = sizing;
        self
    }

    pub fn with_templater(mut self, templater: Arc<dyn Templater>) -> Self {
        self.templater = templater;
        self
    }
}

/// Parses an `old:new` account override.
pub fn parse_account_override(value: &str) -> Result<(String, String)> {
    match value.split_once(':') {
        Some((from, to)) if !from.is_empty() && !to.is_empty() && !to.contains(':') => {
            Ok((from.to_string(), to.to_string()))
        }
        _ => bail!("Invalid account override '{value}', expected <old>:<new>"),
    }
}

pub struct PipelineBuilder<'a> {
    pipeline: &'a PipelineDefinition,
    options: BuilderOptions,
    metrics: MetricsCollector,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(pipeline: &'a PipelineDefinition, options: BuilderOptions) -> Self {
        Self {
            pipeline,
            options,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    /// Builds the execution graph. Any stage failure aborts the whole build.
    #[instrument(skip(self), fields(pipeline = %self.pipeline.name, linear = self.options.linear))]
    pub fn build(&self) -> Result<PipelineGraph> {
        self.metrics.reset();
        let started = Instant::now();

        let mut graph = PipelineGraph {
            name: self.pipeline.name.clone(),
            application: self.pipeline.application.clone(),
            triggers: self.pipeline.triggers.iter().flat_map(trigger_records).collect(),
            notifications: stages::notification_records(&self.pipeline.notifications),
            parameter_config: self
                .pipeline
                .parameters
                .iter()
                .map(parameter_record)
                .collect::<Result<_>>()?,
            limit_concurrent: self.pipeline.disable_concurrent_executions,
            keep_waiting_pipelines: self.pipeline.keep_queued_pipelines,
            description: self.pipeline.description.clone(),
            ..Default::default()
        };

        let decoder = ManifestDecoder::new(self.options.base_path.clone());
        let ctx = StageContext {
            pipeline: self.pipeline,
            options: &self.options,
            decoder: &decoder,
            metrics: &self.metrics,
        };

        for declared in &self.pipeline.stages {
            let stage = self.remap_account(declared);
            let index = graph.stages.len();
            if let Some(record) = stages::build_stage(&ctx, &stage, index)? {
                debug!(
                    stage = %record.metadata.name,
                    kind = record.metadata.kind,
                    ref_id = %record.metadata.ref_id,
                    "Built stage"
                );
                graph.stages.push(record);
            }
        }

        self.metrics.record_total_duration(started.elapsed());
        info!(
            stages = graph.stages.len(),
            declared = self.pipeline.stages.len(),
            "Assembled pipeline"
        );
        Ok(graph)
    }

    fn remap_account<'s>(&self, stage: &'s StageDefinition) -> Cow<'s, StageDefinition> {
        match self.options.account_overrides.get(&stage.account) {
            Some(account) => {
                debug!(from = %stage.account, to = %account, "Remapping stage account");
                let mut remapped = stage.clone();
                remapped.account = account.clone();
                Cow::Owned(remapped)
            }
            None => Cow::Borrowed(stage),
        }
    }
}

/// Convenience wrapper around [`PipelineBuilder`].
pub fn build_pipeline(pipeline: &PipelineDefinition, options: BuilderOptions) -> Result<PipelineGraph> {
    PipelineBuilder::new(pipeline, options).build()
}

fn trigger_records(trigger: &Trigger) -> Vec<TriggerRecord> {
    let mut records = Vec::new();
    if let Some(jenkins) = &trigger.jenkins {
        records.push(TriggerRecord::Jenkins(JenkinsTriggerRecord {
            enabled: jenkins.enabled.unwrap_or(true),
            job: jenkins.job.clone(),
            master: jenkins.master.clone(),
            property_file: jenkins.property_file.clone(),
        }));
    }
    if let Some(webhook) = &trigger.webhook {
        records.push(TriggerRecord::Webhook(WebhookTriggerRecord {
            enabled: webhook.enabled,
            source: webhook.source.clone(),
        }));
    }
    records
}

fn parameter_record(parameter: &Parameter) -> Result<ParameterRecord> {
    let has_options = !parameter.options.is_empty();
    if has_options
        && !parameter.default.is_empty()
        && !parameter.options.iter().any(|o| o.value == parameter.default)
    {
        return Err(BuildError::ParameterDefaultMismatch {
            parameter: parameter.name.clone(),
            default: parameter.default.clone(),
        }
        .into());
    }

    Ok(ParameterRecord {
        name: parameter.name.clone(),
        description: parameter.description.clone(),
        default: parameter.default.clone(),
        required: parameter.required,
        has_options,
        options: parameter
            .options
            .iter()
            .map(|o| OptionRecord {
                value: o.value.clone(),
            })
            .collect(),
    })
}
