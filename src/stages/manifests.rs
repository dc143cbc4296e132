use anyhow::{Context, Result};
use tracing::debug;

use super::{
    CLOUD_PROVIDER, PolicyDefaults, StageBuilder, StageContext, resolve_policy, timeout_or,
};
use crate::definition::{
    DeleteEmbeddedManifest, DeployEmbeddedManifests, ManifestFile, Moniker, ScaleManifest,
    StageDefinition,
};
use crate::error::BuildError;
use crate::graph::{
    DeleteManifestBody, DeployManifestBody, Relationships, ScaleManifestBody, StageBody,
};
use crate::manifest::{Manifest, Node, decode_at};
use crate::overrides;
use crate::sizing::ControllerRecommendations;

pub const DEFAULT_MANIFEST_TIMEOUT_MS: i64 = 1_800_000;
const DEFAULT_LOCATION: &str = "default";

impl StageBuilder for DeployEmbeddedManifests {
    fn stage_type(&self) -> &'static str {
        "deployManifest"
    }

    fn build(&self, ctx: &StageContext<'_>, stage: &StageDefinition) -> Result<StageBody> {
        if self.files.is_empty() && self.configurator_files.is_empty() {
            return Err(BuildError::NoManifestFiles.into());
        }

        let sizing = self
            .sizing
            .as_ref()
            .and_then(|selection| ctx.options.sizing.profile(&selection.profile));

        let mut manifests = Vec::new();
        for file in &self.files {
            let decoded = ctx
                .decoder
                .read_file(&file.file)
                .with_context(|| format!("Could not parse manifest file: {}", file.file))?;
            ctx.metrics.record_manifests(decoded.len());
            for manifest in decoded {
                let node = self
                    .prepare(ctx, manifest, sizing)
                    .with_context(|| format!("Failed to apply overrides to: {}", file.file))?;
                manifests.push(node);
            }
        }
        for file in &self.configurator_files {
            manifests.extend(render_configurator(ctx, stage, file)?);
        }

        let moniker = self
            .default_moniker
            .clone()
            .unwrap_or_else(|| assemble_moniker(&ctx.pipeline.application, stage, self));

        Ok(StageBody::DeployManifest(DeployManifestBody {
            account: stage.account.clone(),
            cloud_provider: CLOUD_PROVIDER,
            location: String::new(),
            manifest_artifact_account: "embedded-artifact",
            manifest_name: String::new(),
            manifests,
            moniker,
            relationships: Relationships::default(),
            source: "text",
            policy: resolve_policy(&self.policy, PolicyDefaults::STANDARD),
            override_timeout: true,
            stage_timeout_ms: timeout_or(self.stage_timeout_ms, DEFAULT_MANIFEST_TIMEOUT_MS),
        }))
    }
}

impl DeployEmbeddedManifests {
    /// Images, sizing and container overrides for one decoded document.
    fn prepare(
        &self,
        ctx: &StageContext<'_>,
        manifest: Manifest,
        sizing: Option<&ControllerRecommendations>,
    ) -> Result<Node> {
        let mut node = match manifest {
            Manifest::Workload(mut workload) => {
                if !self.image_descriptions.is_empty() {
                    overrides::inject_images(&mut workload, &self.image_descriptions, ctx.pipeline);
                }
                if let Some(recommendations) = sizing.and_then(|s| s.get(workload.name())) {
                    overrides::fill_sizing(&mut workload, recommendations);
                }
                workload.to_node()?
            }
            Manifest::Object(node) => node,
        };
        overrides::apply_overrides(&mut node, &self.container_overrides)?;
        Ok(node)
    }
}

fn render_configurator(
    ctx: &StageContext<'_>,
    stage: &StageDefinition,
    file: &ManifestFile,
) -> Result<Vec<Node>> {
    let path = ctx.decoder.resolve(&file.file);
    let source = std::fs::read_to_string(&path).with_context(|| {
        format!("Could not read configurator manifest file: {}", path.display())
    })?;
    let environment = ctx
        .options
        .environments
        .resolve(file.env.as_deref(), &stage.account);
    debug!(file = %file.file, environment = %environment, "Rendering configurator file");

    let rendered = ctx
        .options
        .templater
        .render(&source, &environment)
        .with_context(|| {
            format!(
                "Could not render configurator file {} for environment {environment}",
                file.file
            )
        })?;
    let decoded = decode_at(&rendered, &path)?;
    ctx.metrics.record_manifests(decoded.len());
    decoded.into_iter().map(Manifest::into_node).collect()
}

/// Moniker used when the stage does not declare one. The stack falls back to the account.
pub fn assemble_moniker(
    application: &str,
    stage: &StageDefinition,
    manifests: &DeployEmbeddedManifests,
) -> Moniker {
    let stack = match manifests.stack.as_str() {
        "" => stage.account.clone(),
        stack => stack.to_string(),
    };
    let cluster = [application, stack.as_str(), manifests.details.as_str()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    Moniker {
        app: application.to_string(),
        cluster,
        detail: manifests.details.clone(),
        stack,
    }
}

impl StageBuilder for DeleteEmbeddedManifest {
    fn stage_type(&self) -> &'static str {
        "deleteManifest"
    }

    fn build(&self, ctx: &StageContext<'_>, stage: &StageDefinition) -> Result<StageBody> {
        let mut decoded = ctx
            .decoder
            .read_file(&self.file)
            .with_context(|| format!("Could not parse manifest file: {}", self.file))?;
        ctx.metrics.record_manifests(decoded.len());
        if decoded.len() != 1 {
            return Err(BuildError::DeleteTargetCount {
                path: ctx.decoder.resolve(&self.file),
                count: decoded.len(),
            }
            .into());
        }
        let target = decoded.remove(0);

        Ok(StageBody::DeleteManifest(DeleteManifestBody {
            account: stage.account.clone(),
            cloud_provider: CLOUD_PROVIDER,
            location: target.namespace().unwrap_or(DEFAULT_LOCATION).to_string(),
            manifest_name: format!("{} {}", target.kind(), target.name()),
            policy: resolve_policy(&self.policy, PolicyDefaults::STANDARD),
        }))
    }
}

impl StageBuilder for ScaleManifest {
    fn stage_type(&self) -> &'static str {
        "scaleManifest"
    }

    fn build(&self, _ctx: &StageContext<'_>, stage: &StageDefinition) -> Result<StageBody> {
        Ok(StageBody::ScaleManifest(ScaleManifestBody {
            account: stage.account.clone(),
            cloud_provider: CLOUD_PROVIDER,
            kind: self.kind.clone(),
            location: self.namespace.clone(),
            manifest_name: format!("{} {}", self.kind, self.name),
            replicas: self.replicas,
            policy: resolve_policy(&self.policy, PolicyDefaults::STANDARD),
        }))
    }
}
