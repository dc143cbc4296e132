use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use pipeliner::definition::{PipelineDefinition, StageKind};
use pipeliner::observability::{MetricsCollector, log_snapshot};
use pipeliner::pipeline::{BuilderOptions, PipelineBuilder, parse_account_override};
use pipeliner::sizing::SizingRecommendations;
use pipeliner::template::EnvironmentMergeTemplate;
use pipeliner::validation::validate_graph;
use serde_json::to_writer_pretty;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_tracing()?;

    match cli.command {
        Commands::Create {
            pipeline,
            build,
            pretty,
        } => create(pipeline, build, pretty),
        Commands::Validate { pipeline, build } => validate(pipeline, build),
        Commands::ListStages => {
            list_stages();
            Ok(())
        }
    }
}

fn configure_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))
}

fn create(pipeline_path: PathBuf, args: BuildArgs, pretty: bool) -> Result<()> {
    let definition = PipelineDefinition::load(&pipeline_path)?;
    let options = args.options()?;
    let builder = PipelineBuilder::new(&definition, options);
    let graph = builder.build()?;

    let json = if pretty {
        graph.to_json_pretty()?
    } else {
        graph.to_json()?
    };
    println!("{json}");
    info!(
        file = %pipeline_path.display(),
        stages = graph.stages.len(),
        fingerprint = %graph.fingerprint()?,
        "Pipeline created"
    );

    args.metrics.emit(&builder.metrics())
}

fn validate(pipeline_path: PathBuf, args: BuildArgs) -> Result<()> {
    let definition = PipelineDefinition::load(&pipeline_path)?;
    let options = args.options()?;
    let builder = PipelineBuilder::new(&definition, options);
    let graph = builder.build()?;
    let report = validate_graph(&graph);

    for warning in &report.warnings {
        warn!(file = %pipeline_path.display(), "{warning}");
    }
    args.metrics.emit(&builder.metrics())?;

    if report.is_ok() {
        info!(file = %pipeline_path.display(), "Pipeline validation passed");
        Ok(())
    } else {
        for error_msg in &report.errors {
            error!(file = %pipeline_path.display(), "{error_msg}");
        }
        let count = report.errors.len();
        report
            .into_result()
            .with_context(|| format!("Pipeline validation failed with {count} error(s)"))
    }
}

fn list_stages() {
    println!("Available stage kinds:");
    for key in StageKind::KEYS {
        println!("- {key}");
    }
}

#[derive(Parser)]
#[command(
    name = "pipeliner",
    version,
    about = "Builds delivery-platform stage graphs from pipeline definitions"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the pipeline and print its JSON to stdout.
    Create {
        pipeline: PathBuf,
        #[command(flatten)]
        build: BuildArgs,
        #[arg(long)]
        pretty: bool,
    },
    /// Build the pipeline and check every deploy container for resource requests and limits.
    Validate {
        pipeline: PathBuf,
        #[command(flatten)]
        build: BuildArgs,
    },
    ListStages,
}

#[derive(Args)]
struct BuildArgs {
    /// Chain stages in declaration order instead of using declared references.
    #[arg(short, long)]
    linear: bool,
    /// Manual judgement timeout in hours.
    #[arg(long = "timeout")]
    timeout_hours: Option<u32>,
    /// Rename an account, as <old>:<new>. Repeatable.
    #[arg(long = "override", value_name = "OLD:NEW")]
    account_overrides: Vec<String>,
    #[arg(long)]
    base_path: Option<PathBuf>,
    /// JSON file mapping sizing profiles to recommendation responses.
    #[arg(long)]
    sizing: Option<PathBuf>,
    #[cfg(feature = "sizing")]
    /// Sizing service to fetch recommendations from for the standard profiles.
    #[arg(long = "sizing-endpoint", conflicts_with = "sizing")]
    sizing_endpoint: Option<String>,
    #[cfg(feature = "sizing")]
    #[arg(long = "sizing-window", default_value = pipeliner::sizing::DEFAULT_WINDOW)]
    sizing_window: String,
    #[command(flatten)]
    metrics: MetricsArgs,
}

impl BuildArgs {
    fn options(&self) -> Result<BuilderOptions> {
        let mut options = BuilderOptions::default()
            .with_linear(self.linear)
            .with_templater(Arc::new(EnvironmentMergeTemplate));
        if let Some(hours) = self.timeout_hours {
            options = options.with_timeout_hours(hours);
        }
        if let Some(base_path) = &self.base_path {
            options = options.with_base_path(base_path);
        }
        for value in &self.account_overrides {
            let (from, to) = parse_account_override(value)?;
            options = options.with_account_override(from, to);
        }
        if let Some(path) = &self.sizing {
            options = options.with_sizing(SizingRecommendations::load(path)?);
        }
        #[cfg(feature = "sizing")]
        if let Some(endpoint) = &self.sizing_endpoint {
            let profiles = pipeliner::sizing::SizingProfile::standard();
            let fetched =
                pipeliner::sizing::fetch_recommendations(endpoint, &profiles, &self.sizing_window)?;
            options = options.with_sizing(fetched);
        }
        Ok(options)
    }
}

#[derive(Args)]
struct MetricsArgs {
    #[arg(long)]
    print_metrics: bool,
    #[arg(long = "metrics-json")]
    metrics_json: Option<PathBuf>,
    #[arg(long = "metrics-prometheus")]
    metrics_prometheus: Option<PathBuf>,
}

impl MetricsArgs {
    fn emit(&self, metrics: &MetricsCollector) -> Result<()> {
        let snapshot = metrics.snapshot();
        if self.print_metrics {
            log_snapshot(&snapshot);
        }
        if let Some(path) = &self.metrics_json {
            let file = File::create(path)
                .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
            to_writer_pretty(file, &snapshot)
                .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
            info!(metrics = %path.display(), "Metrics JSON written");
        }
        if let Some(path) = &self.metrics_prometheus {
            std::fs::write(path, snapshot.to_prometheus()).with_context(|| {
                format!("Failed to write Prometheus metrics: {}", path.display())
            })?;
            info!(metrics = %path.display(), "Prometheus metrics written");
        }
        Ok(())
    }
}
