//! Stage identities and per-attempt stage execution records.
//!
//! The set of stages is closed: every pipeline run walks the same five
//! kinds in the same order, and each kind has a fixed resource class.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// StageKind / ResourceClass
// ---------------------------------------------------------------------------

/// Concurrency pool a stage draws its slot from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    Cpu,
    Gpu,
}

impl ResourceClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceClass::Cpu => "cpu",
            ResourceClass::Gpu => "gpu",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of the generation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Preprocess,
    Generate,
    Interpolate,
    Upscale,
    Postprocess,
}

impl StageKind {
    /// All stages in execution order.
    pub const ALL: [StageKind; 5] = [
        StageKind::Preprocess,
        StageKind::Generate,
        StageKind::Interpolate,
        StageKind::Upscale,
        StageKind::Postprocess,
    ];

    /// Pre/postprocessing are CPU-bound; everything touching the models is GPU-bound.
    pub fn resource_class(self) -> ResourceClass {
        match self {
            StageKind::Preprocess | StageKind::Postprocess => ResourceClass::Cpu,
            StageKind::Generate | StageKind::Interpolate | StageKind::Upscale => {
                ResourceClass::Gpu
            }
        }
    }

    /// Position of this stage in [`StageKind::ALL`].
    pub fn index(self) -> usize {
        match self {
            StageKind::Preprocess => 0,
            StageKind::Generate => 1,
            StageKind::Interpolate => 2,
            StageKind::Upscale => 3,
            StageKind::Postprocess => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Preprocess => "preprocess",
            StageKind::Generate => "generate",
            StageKind::Interpolate => "interpolate",
            StageKind::Upscale => "upscale",
            StageKind::Postprocess => "postprocess",
        }
    }

    /// Human-readable `current_step` label shown while the stage runs.
    pub fn step_label(self) -> &'static str {
        match self {
            StageKind::Preprocess => "Processing parameters",
            StageKind::Generate => "Generating frames",
            StageKind::Interpolate => "Interpolating frames",
            StageKind::Upscale => "Upscaling frames",
            StageKind::Postprocess => "Post-processing and encoding video",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StageExecution
// ---------------------------------------------------------------------------

/// Lifecycle of a single stage inside one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// The stage was a no-op for this request (factor 1).
    Skipped,
    /// The stage was unwound by a cancellation request.
    Cancelled,
}

/// Record of one stage's execution within a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageExecution {
    pub id: uuid::Uuid,
    pub stage: StageKind,
    pub resource_class: ResourceClass,
    pub status: StageStatus,
    pub started_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
    /// Local progress fraction in `0.0..=1.0`.
    pub progress: f32,
}

impl StageExecution {
    pub fn new(stage: StageKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            stage,
            resource_class: stage.resource_class(),
            status: StageStatus::Pending,
            started_at: None,
            ended_at: None,
            progress: 0.0,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = StageStatus::Running;
        self.started_at = Some(chrono::Utc::now());
    }

    /// Record local progress. Regressions are ignored.
    pub fn set_progress(&mut self, fraction: f32) {
        let fraction = fraction.clamp(0.0, 1.0);
        if fraction > self.progress {
            self.progress = fraction;
        }
    }

    /// Close the execution with a final status.
    pub fn finish(&mut self, status: StageStatus) {
        if status == StageStatus::Succeeded || status == StageStatus::Skipped {
            self.progress = 1.0;
        }
        self.status = status;
        self.ended_at = Some(chrono::Utc::now());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
