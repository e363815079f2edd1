//! Stage executor contract and the data that flows between stages.
//!
//! Every stage consumes one [`StageData`] value and produces the next. The
//! orchestrator never inspects frame payloads; it only routes the value from
//! one executor to the next and reports progress.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use vidgen_core::parameters::{BaseModel, GenerationParameters, MotionAdapter, OutputFormat};
use vidgen_core::stage::{ResourceClass, StageKind};

use crate::definition::GenerationPlan;

// ---------------------------------------------------------------------------
// Frames and media
// ---------------------------------------------------------------------------

/// How a frame came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameOrigin {
    /// Emitted by the generator.
    Generated,
    /// Synthesized between two neighbours by the interpolator.
    Interpolated,
}

/// Descriptor of a single video frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Position on the generator's timeline, in generated-frame units.
    /// Interpolated frames sit at fractional positions.
    pub position: f32,
    pub origin: FrameOrigin,
    pub width: u32,
    pub height: u32,
}

/// An ordered run of frames sharing dimensions and frame rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameBatch {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub frames: Vec<Frame>,
}

impl FrameBatch {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Encoded output of the final stage, ready to hand to storage.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaArtifact {
    pub file_name: String,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub frame_count: u32,
    pub bytes: Vec<u8>,
}

impl MediaArtifact {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    pub fn duration_secs(&self) -> f32 {
        if self.fps == 0 {
            return 0.0;
        }
        self.frame_count as f32 / self.fps as f32
    }
}

/// Preprocessed request: parameters plus the derived operating point.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub parameters: GenerationParameters,
    pub plan: GenerationPlan,
}

/// Value passed between consecutive stages.
#[derive(Debug, Clone, PartialEq)]
pub enum StageData {
    Parameters(GenerationParameters),
    Prepared(PreparedRequest),
    Frames(FrameBatch),
    Media(MediaArtifact),
}

impl StageData {
    pub fn kind_name(&self) -> &'static str {
        match self {
            StageData::Parameters(_) => "parameters",
            StageData::Prepared(_) => "prepared request",
            StageData::Frames(_) => "frames",
            StageData::Media(_) => "media",
        }
    }
}

// ---------------------------------------------------------------------------
// Stage configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateConfig {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub base_model: BaseModel,
    pub motion_adapter: MotionAdapter,
    pub inference_steps: u32,
    pub guidance_scale: f32,
    pub seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpolateConfig {
    pub factor: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpscaleConfig {
    pub factor: u32,
}

/// Final encode settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeConfig {
    /// Requested output width; frames are cropped or padded to it.
    pub width: u32,
    pub height: u32,
    /// Frame rate after interpolation.
    pub fps: u32,
    pub video_length: u32,
    pub output_format: OutputFormat,
    /// Used for the output file name.
    pub prompt: String,
    pub seed: u64,
}

/// Per-stage configuration resolved by the pipeline definition.
#[derive(Debug, Clone, PartialEq)]
pub enum StageConfig {
    Preprocess,
    Generate(GenerateConfig),
    Interpolate(InterpolateConfig),
    Upscale(UpscaleConfig),
    Postprocess(EncodeConfig),
}

// ---------------------------------------------------------------------------
// StageError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StageError {
    /// The run's cancellation token fired at a checkpoint.
    #[error("Stage cancelled")]
    Cancelled,

    #[error("Stage failed: {0}")]
    Failed(String),

    /// The stage received data or configuration it cannot work with.
    #[error("Invalid stage input: {0}")]
    InvalidInput(String),
}

impl StageError {
    pub fn unexpected_input(stage: StageKind, got: &StageData) -> Self {
        StageError::InvalidInput(format!("{stage} cannot consume {}", got.kind_name()))
    }

    pub fn unexpected_config(stage: StageKind) -> Self {
        StageError::InvalidInput(format!("{stage} received another stage's configuration"))
    }
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

type ProgressSink = Arc<dyn Fn(f32) + Send + Sync>;

/// Monotonic local-progress reporter handed to an executor.
///
/// Reports are clamped to `0.0..=1.0`; anything at or below the last
/// forwarded value is dropped.
#[derive(Clone)]
pub struct StageProgress {
    last_bits: Arc<AtomicU32>,
    sink: ProgressSink,
}

impl StageProgress {
    pub fn new(sink: impl Fn(f32) + Send + Sync + 'static) -> Self {
        Self {
            last_bits: Arc::new(AtomicU32::new(0f32.to_bits())),
            sink: Arc::new(sink),
        }
    }

    /// A reporter that forwards nowhere.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, fraction: f32) {
        if fraction.is_nan() {
            return;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        let mut current = self.last_bits.load(Ordering::Acquire);
        loop {
            if fraction <= f32::from_bits(current) {
                return;
            }
            match self.last_bits.compare_exchange_weak(
                current,
                fraction.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        (self.sink)(fraction);
    }

    /// Last forwarded fraction.
    pub fn current(&self) -> f32 {
        f32::from_bits(self.last_bits.load(Ordering::Acquire))
    }
}

impl std::fmt::Debug for StageProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageProgress")
            .field("current", &self.current())
            .finish()
    }
}

/// Fail with [`StageError::Cancelled`] if the run has been cancelled.
pub fn checkpoint(cancel: &CancellationToken) -> Result<(), StageError> {
    if cancel.is_cancelled() {
        return Err(StageError::Cancelled);
    }
    Ok(())
}

/// Simulated unit of work between two checkpoints.
///
/// Sleeps for `delay` unless the run is cancelled first.
pub async fn pace(delay: Duration, cancel: &CancellationToken) -> Result<(), StageError> {
    checkpoint(cancel)?;
    if delay.is_zero() {
        tokio::task::yield_now().await;
        return checkpoint(cancel);
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(StageError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// StageExecutor
// ---------------------------------------------------------------------------

/// One pipeline stage.
///
/// Implementations must check `cancel` before doing any work and at every
/// progress checkpoint, returning [`StageError::Cancelled`] once it fires.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn kind(&self) -> StageKind;

    fn resource_class(&self) -> ResourceClass {
        self.kind().resource_class()
    }

    async fn execute(
        &self,
        input: StageData,
        config: &StageConfig,
        progress: &StageProgress,
        cancel: &CancellationToken,
    ) -> Result<StageData, StageError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
