//! Build metrics: how many stages of each kind were built (and failed), how long they took,
//! how many manifest documents were decoded and how many declared stages produced nothing.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub stages: BTreeMap<String, StageMetrics>,
    pub manifests_decoded: u64,
    pub stages_skipped: u64,
    pub build_ms: f64,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct StageMetrics {
    pub builds: u64,
    pub failures: u64,
    pub total_ms: f64,
    pub slowest_ms: f64,
}

/// Counters for one builder; clones share them.
#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, apply: impl FnOnce(&mut MetricsSnapshot)) {
        if let Ok(mut snapshot) = self.inner.lock() {
            apply(&mut snapshot);
        }
    }

    pub fn start_stage(&self, kind: &'static str) -> StageTimer {
        StageTimer {
            kind,
            started_at: Instant::now(),
            failed: false,
            metrics: self.clone(),
        }
    }

    pub fn record_manifests(&self, count: usize) {
        self.update(|s| s.manifests_decoded += count as u64);
    }

    pub fn record_skipped_stage(&self) {
        self.update(|s| s.stages_skipped += 1);
    }

    pub fn record_total_duration(&self, duration: Duration) {
        self.update(|s| s.build_ms = duration.as_secs_f64() * 1_000.0);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn reset(&self) {
        self.update(|s| *s = MetricsSnapshot::default());
    }
}

/// Times one stage build; the result is recorded when the timer is dropped.
pub struct StageTimer {
    kind: &'static str,
    started_at: Instant,
    failed: bool,
    metrics: MetricsCollector,
}

impl StageTimer {
    pub fn fail(&mut self) {
        self.failed = true;
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        let elapsed_ms = self.started_at.elapsed().as_secs_f64() * 1_000.0;
        let (kind, failed) = (self.kind, self.failed);
        self.metrics.update(|s| {
            let stage = s.stages.entry(kind.to_string()).or_default();
            stage.builds += 1;
            stage.failures += u64::from(failed);
            stage.total_ms += elapsed_ms;
            stage.slowest_ms = stage.slowest_ms.max(elapsed_ms);
        });
        debug!(kind, elapsed_ms, failed, "Stage build timed");
    }
}

pub fn log_snapshot(snapshot: &MetricsSnapshot) {
    info!(
        build_ms = snapshot.build_ms,
        manifests_decoded = snapshot.manifests_decoded,
        stages_skipped = snapshot.stages_skipped,
        "Build metrics"
    );
    for (kind, stage) in &snapshot.stages {
        info!(
            kind = kind.as_str(),
            builds = stage.builds,
            failures = stage.failures,
            total_ms = stage.total_ms,
            slowest_ms = stage.slowest_ms,
            "Stage kind metrics"
        );
    }
}

fn family(out: &mut String, name: &str, metric_type: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {metric_type}");
}

impl MetricsSnapshot {
    /// Prometheus text exposition of the snapshot.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        family(&mut out, "pipeliner_manifests_decoded_total", "counter", "Manifest documents decoded");
        let _ = writeln!(out, "pipeliner_manifests_decoded_total {}", self.manifests_decoded);
        family(&mut out, "pipeliner_stages_skipped_total", "counter", "Declared stages without a kind");
        let _ = writeln!(out, "pipeliner_stages_skipped_total {}", self.stages_skipped);

        let per_kind: [(&str, &str, fn(&StageMetrics) -> String); 3] = [
            ("pipeliner_stage_builds_total", "Stages built per kind", |m| m.builds.to_string()),
            ("pipeliner_stage_failures_total", "Stage builds that failed per kind", |m| {
                m.failures.to_string()
            }),
            ("pipeliner_stage_build_seconds_total", "Build time per kind", |m| {
                format!("{:.6}", m.total_ms / 1_000.0)
            }),
        ];
        for (name, help, value) in per_kind {
            family(&mut out, name, "counter", help);
            for (kind, stage) in &self.stages {
                let _ = writeln!(out, "{name}{{kind=\"{kind}\"}} {}", value(stage));
            }
        }

        family(&mut out, "pipeliner_build_seconds", "gauge", "Duration of the last build");
        let _ = writeln!(out, "pipeliner_build_seconds {:.6}", self.build_ms / 1_000.0);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_builds_still_count_as_builds() {
        let metrics = MetricsCollector::new();
        drop(metrics.start_stage("deploy"));
        let mut failing = metrics.start_stage("deploy");
        failing.fail();
        drop(failing);
        metrics.record_manifests(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.stages["deploy"].builds, 2);
        assert_eq!(snapshot.stages["deploy"].failures, 1);
        assert_eq!(snapshot.manifests_decoded, 3);

        let text = snapshot.to_prometheus();
        assert!(text.contains("pipeliner_stage_builds_total{kind=\"deploy\"} 2"), "{text}");
        assert!(text.contains("pipeliner_stage_failures_total{kind=\"deploy\"} 1"), "{text}");
    }

    #[test]
    fn reset_clears_every_counter() {
        let metrics = MetricsCollector::new();
        metrics.record_skipped_stage();
        drop(metrics.start_stage("runJob"));
        metrics.reset();
        let snapshot = metrics.snapshot();
        assert!(snapshot.stages.is_empty());
        assert_eq!(snapshot.stages_skipped, 0);
    }
}
