use std::path::PathBuf;

use thiserror::Error;

/// Fatal build failures. Every one of these aborts the whole pipeline assembly; callers receive
/// them wrapped in `anyhow` context naming the stage, file and container involved.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("could not decode manifest {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("manifest kind '{kind}' is not supported for container projection")]
    UnsupportedManifestKind { kind: String },

    #[error("no containers were found in manifest {path}")]
    NoContainers { path: PathBuf },

    #[error(
        "container overrides were provided for manifest {path} which defines {count} containers"
    )]
    OverrideContention { path: PathBuf, count: usize },

    #[error("could not override {section} for container {container}: could not parse {field} quantity '{value}'")]
    QuantityParse {
        section: &'static str,
        container: String,
        field: &'static str,
        value: String,
    },

    #[error("no manifest files defined")]
    NoManifestFiles,

    #[error("parameter '{parameter}': the specified default value '{default}' is not one of the options")]
    ParameterDefaultMismatch { parameter: String, default: String },

    #[error("stage declares more than one kind: {}", kinds.join(", "))]
    AmbiguousStageKind { kinds: Vec<&'static str> },

    #[error(
        "manifest file {path} declares {count} resources; a delete stage needs exactly one"
    )]
    DeleteTargetCount { path: PathBuf, count: usize },
}

/// Aggregate of every resource-presence violation found in an assembled graph.
#[derive(Error, Debug)]
#[error("{} resource violation(s):\n{}", violations.len(), violations.join("\n"))]
pub struct ResourceViolations {
    pub violations: Vec<String>,
}
