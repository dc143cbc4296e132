use std::collections::BTreeMap;

use anyhow::Result;

use super::{HOUR_MS, PolicyDefaults, StageBuilder, StageContext, resolve_policy, timeout_or};
use crate::definition::{
    EvaluateVariablesStage, JenkinsStage, ManualJudgementStage, PassthroughParameter,
    RunSpinnakerPipelineStage, StageDefinition, WebHookStage,
};
use crate::graph::{
    EvaluateVariablesBody, JenkinsBody, JudgmentInput, ManualJudgementBody, RunPipelineBody,
    StageBody, WebHookBody,
};

pub const DEFAULT_JENKINS_MASTER: &str = "namely-jenkins";
pub const DEFAULT_PIPELINE_TIMEOUT_MS: i64 = 3_600_000;

impl StageBuilder for ManualJudgementStage {
    fn stage_type(&self) -> &'static str {
        "manualJudgment"
    }

    fn build(&self, ctx: &StageContext<'_>, _stage: &StageDefinition) -> Result<StageBody> {
        // The stage's own timeout wins over the builder-wide one.
        let timeout_hours = self
            .timeout_hours
            .filter(|h| *h > 0)
            .or(ctx.options.timeout_hours.filter(|h| *h > 0));

        Ok(StageBody::ManualJudgement(ManualJudgementBody {
            fail_pipeline: self.fail_pipeline,
            instructions: self.instructions.clone(),
            judgment_inputs: self
                .inputs
                .iter()
                .map(|value| JudgmentInput {
                    value: value.clone(),
                })
                .collect(),
            override_timeout: timeout_hours.is_some(),
            stage_timeout_ms: timeout_hours.map(|h| i64::from(h) * HOUR_MS),
        }))
    }
}

impl StageBuilder for WebHookStage {
    fn stage_type(&self) -> &'static str {
        "webhook"
    }

    fn display_name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn build(&self, _ctx: &StageContext<'_>, _stage: &StageDefinition) -> Result<StageBody> {
        Ok(StageBody::WebHook(WebHookBody {
            custom_headers: self.custom_headers.clone(),
            description: self.description.clone(),
            method: self.method.clone(),
            payload: self.payload.clone(),
            url: self.url.clone(),
        }))
    }
}

impl StageBuilder for JenkinsStage {
    fn stage_type(&self) -> &'static str {
        "jenkins"
    }

    fn build(&self, _ctx: &StageContext<'_>, _stage: &StageDefinition) -> Result<StageBody> {
        let master = match self.master.as_str() {
            "" => DEFAULT_JENKINS_MASTER,
            master => master,
        };
        Ok(StageBody::Jenkins(JenkinsBody {
            job: self.job.clone(),
            master: master.to_string(),
            parameters: parameter_map(&self.parameters),
            policy: resolve_policy(&self.policy, PolicyDefaults::JENKINS),
        }))
    }
}

impl StageBuilder for EvaluateVariablesStage {
    fn stage_type(&self) -> &'static str {
        "evaluateVariables"
    }

    fn build(&self, _ctx: &StageContext<'_>, _stage: &StageDefinition) -> Result<StageBody> {
        Ok(StageBody::EvaluateVariables(EvaluateVariablesBody {
            fail_on_failed_expressions: true,
            variables: parameter_map(&self.variables),
        }))
    }
}

impl StageBuilder for RunSpinnakerPipelineStage {
    fn stage_type(&self) -> &'static str {
        "pipeline"
    }

    fn build(&self, _ctx: &StageContext<'_>, _stage: &StageDefinition) -> Result<StageBody> {
        Ok(StageBody::RunPipeline(RunPipelineBody {
            application: self.application.clone(),
            pipeline: self.pipeline.clone(),
            pipeline_parameters: parameter_map(&self.parameters),
            policy: resolve_policy(&self.policy, PolicyDefaults::STANDARD),
            override_timeout: true,
            stage_timeout_ms: timeout_or(self.stage_timeout_ms, DEFAULT_PIPELINE_TIMEOUT_MS),
        }))
    }
}

/// Later keys overwrite earlier ones.
fn parameter_map(parameters: &[PassthroughParameter]) -> BTreeMap<String, String> {
    parameters
        .iter()
        .map(|p| (p.key.clone(), p.value.clone()))
        .collect()
}
