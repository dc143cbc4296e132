//! Cost-sizing recommendations.
//!
//! A sizing service answers, per profile, with recommended CPU (cores) and RAM (GiB) requests
//! for every container of every controller it has observed. Parsing is always available; the
//! HTTP client lives behind the `sizing` feature.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::debug;

use crate::quantity::Quantity;

pub const DEFAULT_WINDOW: &str = "7d";
pub const SIZING_PATH: &str = "/model/savings/requestSizing";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);
pub const MAX_RETRIES: u32 = 2;

/// Percentile and utilisation targets a set of recommendations is computed for.
#[derive(Debug, Clone, PartialEq)]
pub struct SizingProfile {
    pub name: String,
    pub percentile: f64,
    pub target_cpu_utilization: f64,
    pub target_ram_utilization: f64,
}

impl SizingProfile {
    pub fn new(name: impl Into<String>, percentile: f64, cpu: f64, ram: f64) -> Self {
        Self {
            name: name.into(),
            percentile,
            target_cpu_utilization: cpu,
            target_ram_utilization: ram,
        }
    }

    pub fn standard() -> Vec<Self> {
        vec![
            Self::new("development", 0.85, 0.8, 0.8),
            Self::new("production", 0.98, 0.65, 0.65),
            Self::new("high-availability", 0.999, 0.5, 0.5),
        ]
    }

    pub fn query(&self, window: &str) -> Vec<(&'static str, String)> {
        vec![
            ("p", format!("{:.6}", self.percentile)),
            ("window", window.to_string()),
            (
                "targetCPUUtilization",
                format!("{:.6}", self.target_cpu_utilization),
            ),
            (
                "targetRAMUtilization",
                format!("{:.6}", self.target_ram_utilization),
            ),
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Recommendation {
    /// Cores.
    pub cpu: f64,
    /// GiB.
    pub ram: f64,
}

impl Recommendation {
    pub fn cpu_quantity(&self) -> Option<Quantity> {
        let millis = (self.cpu * 1_000.0).round();
        (millis >= 1.0).then(|| Quantity::from_millis(millis as u64))
    }

    pub fn ram_quantity(&self) -> Option<Quantity> {
        let mebibytes = (self.ram * 1_024.0).round();
        (mebibytes >= 1.0).then(|| Quantity::from_mebibytes(mebibytes as u64))
    }
}

/// Container name to recommendation.
pub type ContainerRecommendations = BTreeMap<String, Recommendation>;
/// Controller (workload) name to its containers.
pub type ControllerRecommendations = BTreeMap<String, ContainerRecommendations>;

/// Recommendations for every profile that was fetched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SizingRecommendations {
    profiles: BTreeMap<String, ControllerRecommendations>,
}

impl SizingRecommendations {
    pub fn insert(&mut self, profile: impl Into<String>, controllers: ControllerRecommendations) {
        self.profiles.insert(profile.into(), controllers);
    }

    pub fn lookup(&self, profile: &str, controller: &str) -> Option<&ContainerRecommendations> {
        self.profile(profile)?.get(controller)
    }

    pub fn profile(&self, profile: &str) -> Option<&ControllerRecommendations> {
        self.profiles.get(profile)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Reads a JSON object mapping profile names to raw service responses.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sizing file: {}", path.display()))?;
        let root: Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse sizing JSON: {}", path.display()))?;
        let object = root
            .as_object()
            .ok_or_else(|| anyhow!("Sizing file must map profile names to responses"))?;

        let mut recommendations = Self::default();
        for (profile, response) in object {
            recommendations.insert(profile.clone(), recommendations_from_value(response));
        }
        Ok(recommendations)
    }
}

/// Parses one sizing response body. A body without `controllers` yields no recommendations.
pub fn parse_recommendations(body: &str) -> Result<ControllerRecommendations> {
    let value: Value = serde_json::from_str(body).context("Failed to parse sizing response")?;
    Ok(recommendations_from_value(&value))
}

fn recommendations_from_value(value: &Value) -> ControllerRecommendations {
    let mut controllers = ControllerRecommendations::new();
    let Some(entries) = value.get("controllers").and_then(Value::as_array) else {
        return controllers;
    };

    for controller in entries {
        let name = controller
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let containers = controllers.entry(name).or_default();
        match controller.get("containers") {
            Some(Value::Object(by_name)) => {
                for (container, entry) in by_name {
                    containers.insert(container.clone(), recommendation(entry));
                }
            }
            Some(Value::Array(list)) => {
                for (index, entry) in list.iter().enumerate() {
                    let container = entry
                        .get("name")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| index.to_string());
                    containers.insert(container, recommendation(entry));
                }
            }
            _ => {}
        }
    }
    debug!(controllers = controllers.len(), "Parsed sizing recommendations");
    controllers
}

fn recommendation(entry: &Value) -> Recommendation {
    let number = |field: &str| {
        entry
            .get("requests")
            .and_then(|requests| requests.get(field))
            .and_then(|v| v.as_f64().or_else(|| v.as_str()?.parse().ok()))
            .unwrap_or(0.0)
    };
    Recommendation {
        cpu: number("cpu"),
        ram: number("ram"),
    }
}

#[cfg(feature = "sizing")]
pub use client::fetch_recommendations;

#[cfg(feature = "sizing")]
mod client {
    use std::sync::Mutex;
    use std::thread;

    use anyhow::{Context, Result, bail};
    use reqwest::StatusCode;
    use reqwest::blocking::Client;
    use tracing::{info, warn};

    use super::{
        MAX_RETRIES, REQUEST_TIMEOUT, SIZING_PATH, SizingProfile, SizingRecommendations,
        parse_recommendations,
    };

    /// Fetches recommendations for every profile concurrently, one thread per profile. Any
    /// profile that still fails after its retries fails the whole call.
    pub fn fetch_recommendations(
        endpoint: &str,
        profiles: &[SizingProfile],
        window: &str,
    ) -> Result<SizingRecommendations> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build sizing HTTP client")?;
        let url = format!("{}{}", endpoint.trim_end_matches('/'), SIZING_PATH);
        let results = Mutex::new(SizingRecommendations::default());

        let outcomes: Vec<Result<()>> = thread::scope(|scope| {
            let handles: Vec<_> = profiles
                .iter()
                .map(|profile| {
                    let (client, url, results) = (&client, &url, &results);
                    scope.spawn(move || -> Result<()> {
                        let body = get_with_retry(client, url, &profile.query(window), MAX_RETRIES)
                            .with_context(|| {
                                format!("Failed to fetch sizing for profile '{}'", profile.name)
                            })?;
                        let parsed = parse_recommendations(&body)?;
                        let mut guard = results
                            .lock()
                            .map_err(|_| anyhow::anyhow!("Sizing results lock poisoned"))?;
                        guard.insert(profile.name.clone(), parsed);
                        Ok(())
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow::anyhow!("Sizing worker panicked")))
                })
                .collect()
        });

        for outcome in outcomes {
            outcome?;
        }
        let recommendations = results
            .into_inner()
            .map_err(|_| anyhow::anyhow!("Sizing results lock poisoned"))?;
        info!(profiles = profiles.len(), "Fetched sizing recommendations");
        Ok(recommendations)
    }

    fn get_with_retry(
        client: &Client,
        url: &str,
        query: &[(&'static str, String)],
        retries: u32,
    ) -> Result<String> {
        let mut attempt = 0;
        loop {
            let last = attempt >= retries;
            match client.get(url).query(query).send() {
                Ok(response) if response.status() == StatusCode::OK => {
                    return response.text().context("Failed to read sizing response body");
                }
                Ok(response) => {
                    if last {
                        bail!(
                            "Failed to request sizing with status code: {}",
                            response.status()
                        );
                    }
                    warn!(status = %response.status(), attempt, "Sizing request rejected; retrying");
                }
                Err(err) => {
                    if last {
                        return Err(err).context("Sizing request failed");
                    }
                    warn!(error = %err, attempt, "Sizing request failed; retrying");
                }
            }
            attempt += 1;
        }
    }
}
