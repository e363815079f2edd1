//! Generation pipeline: stage contract, pipeline definition and the
//! reference stage executors.
//!
//! - [`definition`]: factor derivation, progress weights and the ordered
//!   stage plan for one job.
//! - [`stage`]: the [`StageExecutor`] trait and the data passed between
//!   stages.
//! - [`executors`]: reference executors and the [`StageSet`] registry.

pub mod definition;
pub mod executors;
pub mod stage;

pub use definition::{
    GenerationPlan, PipelineDefinition, StageRange, StageSpec, StageTimeouts, StageWeights,
};
pub use executors::StageSet;
pub use stage::{
    MediaArtifact, StageConfig, StageData, StageError, StageExecutor, StageProgress,
};
