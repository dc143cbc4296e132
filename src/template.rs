//! Environment templating for configurator files.
//!
//! A configurator file is rendered for one environment before it is decoded like any other
//! manifest file. The rendering step is a collaborator behind [`Templater`].

use std::collections::BTreeMap;

use anyhow::{Context, Result};

use crate::manifest::{Node, NodeMap};

pub const DEFAULT_ENVIRONMENT: &str = "default";

pub trait Templater: Send + Sync + std::fmt::Debug {
    fn render(&self, source: &str, environment: &str) -> Result<String>;
}

/// Returns the source untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTemplate;

impl Templater for PassthroughTemplate {
    fn render(&self, source: &str, _environment: &str) -> Result<String> {
        Ok(source.to_string())
    }
}

/// Renders config maps whose `data` is keyed by environment: the `default` entries merged with
/// the selected environment's entries become the map's data. Other documents pass through.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentMergeTemplate;

impl Templater for EnvironmentMergeTemplate {
    fn render(&self, source: &str, environment: &str) -> Result<String> {
        let mut rendered = Vec::new();
        for document in serde_yaml::Deserializer::from_str(source) {
            let mut node = <Node as serde::Deserialize>::deserialize(document)
                .context("Failed to parse configurator document")?;
            if node.is_null() {
                continue;
            }
            if node.str_at(&["kind"]) == Some("ConfigMap") {
                merge_environment_data(&mut node, environment)?;
            }
            rendered.push(
                serde_yaml::to_string(&node).context("Failed to render configurator document")?,
            );
        }
        Ok(rendered.join("---\n"))
    }
}

fn merge_environment_data(node: &mut Node, environment: &str) -> Result<()> {
    let Some(data) = node.get("data").and_then(Node::as_map) else {
        return Ok(());
    };
    if !data.values().all(|v| v.as_map().is_some()) {
        return Ok(());
    }

    let mut merged = NodeMap::new();
    for key in [DEFAULT_ENVIRONMENT, environment] {
        if let Some(entries) = data.get(key).and_then(Node::as_map) {
            for (name, value) in entries {
                let text = value.scalar_text().unwrap_or_default();
                merged.insert(name.clone(), Node::from(text));
            }
        }
    }
    node.set_path(&["data"], Node::Map(merged))
}

/// Maps delivery accounts to configurator environments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountEnvironments(BTreeMap<String, String>);

impl AccountEnvironments {
    pub fn new(table: BTreeMap<String, String>) -> Self {
        Self(table)
    }

    /// The conventional account naming: `<env>` and `<env>-k8s` accounts.
    pub fn standard() -> Self {
        let table = [
            ("int", "int"),
            ("int-k8s", "int"),
            ("staging", "stage"),
            ("staging-k8s", "stage"),
            ("production", "production"),
            ("production-k8s", "production"),
            ("ops", "ops"),
            ("ops-k8s", "ops"),
        ]
        .into_iter()
        .map(|(account, env)| (account.to_string(), env.to_string()))
        .collect();
        Self(table)
    }

    pub fn get(&self, account: &str) -> Option<&str> {
        self.0.get(account).map(String::as_str)
    }

    /// An explicit environment wins, then the account table, then `default`.
    pub fn resolve(&self, explicit: Option<&str>, account: &str) -> String {
        explicit
            .filter(|env| !env.is_empty())
            .or_else(|| self.get(account))
            .unwrap_or(DEFAULT_ENVIRONMENT)
            .to_string()
    }
}
