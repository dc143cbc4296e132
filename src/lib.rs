pub mod containers;
pub mod definition;
pub mod error;
pub mod graph;
pub mod manifest;
pub mod observability;
pub mod overrides;
pub mod pipeline;
pub mod quantity;
pub mod sizing;
pub mod stages;
pub mod template;
pub mod validation;

pub use definition::PipelineDefinition;
pub use error::{BuildError, ResourceViolations};
pub use graph::PipelineGraph;
pub use pipeline::{BuilderOptions, PipelineBuilder, build_pipeline};
pub use validation::{ValidationReport, validate_graph};
