//! Pipeline definition: from resolved parameters to an ordered stage plan.
//!
//! The generator always runs at a fixed low operating point
//! ([`BASE_RESOLUTION`], [`BASE_FPS`]). Interpolation and upscaling derive
//! their factors from `requested / base`, and a factor of 1 turns the stage
//! into a pass-through whose progress weight is handed to generation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use vidgen_core::error::CoreError;
use vidgen_core::parameters::GenerationParameters;
use vidgen_core::stage::StageKind;

use crate::stage::{EncodeConfig, GenerateConfig, InterpolateConfig, StageConfig, UpscaleConfig};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Frame rate the generator always produces.
pub const BASE_FPS: u32 = 8;

/// Longest edge the generator works at, in pixels.
pub const BASE_RESOLUTION: u32 = 512;

/// Generation dimensions are aligned down to a multiple of this.
pub const DIMENSION_ALIGNMENT: u32 = 8;

/// Smallest generation dimension after alignment.
pub const MIN_DIMENSION: u32 = 8;

/// Extra seconds generated when interpolating, so the interpolator has
/// enough source frames to cover the requested length.
pub const EXTRA_GENERATION_SECONDS: u32 = 1;

// ---------------------------------------------------------------------------
// Factor derivation
// ---------------------------------------------------------------------------

/// Number of output frames per generated frame needed to reach `target_fps`.
pub fn interpolation_factor(target_fps: u32) -> u32 {
    if target_fps <= BASE_FPS {
        return 1;
    }
    (target_fps / BASE_FPS).max(1)
}

/// Upscale factor needed to reach `width × height` from the base resolution.
///
/// `ceil(longest_edge / BASE_RESOLUTION)` rounded to the nearest power of
/// two (ties round up).
pub fn upscale_factor(width: u32, height: u32) -> u32 {
    let longest = width.max(height);
    if longest <= BASE_RESOLUTION {
        return 1;
    }
    round_to_power_of_two(longest.div_ceil(BASE_RESOLUTION))
}

/// Round `n` to the nearest power of two; ties go to the larger one.
pub fn round_to_power_of_two(n: u32) -> u32 {
    if n <= 1 {
        return 1;
    }
    let mut power = 1u32;
    while power * 2 < n {
        power *= 2;
    }
    if n - power < power * 2 - n {
        power
    } else {
        power * 2
    }
}

fn generation_dimension(requested: u32, scale: u32) -> u32 {
    let scaled = requested / scale;
    let aligned = (scaled / DIMENSION_ALIGNMENT) * DIMENSION_ALIGNMENT;
    aligned.max(MIN_DIMENSION)
}

// ---------------------------------------------------------------------------
// GenerationPlan
// ---------------------------------------------------------------------------

/// Operating point of the generator and the factors needed to reach the
/// requested output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationPlan {
    pub interpolation_factor: u32,
    pub upscale_factor: u32,
    pub generation_width: u32,
    pub generation_height: u32,
    /// Seconds of footage the generator produces.
    pub generation_length: u32,
    /// Frame rate after interpolation.
    pub final_fps: u32,
}

impl GenerationPlan {
    /// Derive the plan for a requested output size, frame rate and length.
    pub fn for_output(width: u32, height: u32, fps: u32, video_length: u32) -> Self {
        let interpolation_factor = interpolation_factor(fps);
        let upscale_factor = upscale_factor(width, height);
        let generation_length = if interpolation_factor > 1 {
            video_length + EXTRA_GENERATION_SECONDS
        } else {
            video_length
        };

        Self {
            interpolation_factor,
            upscale_factor,
            generation_width: generation_dimension(width, upscale_factor),
            generation_height: generation_dimension(height, upscale_factor),
            generation_length,
            final_fps: BASE_FPS * interpolation_factor,
        }
    }

    pub fn from_parameters(params: &GenerationParameters) -> Self {
        Self::for_output(params.width, params.height, params.fps, params.video_length)
    }

    /// Frames the generator emits.
    pub fn base_frame_count(&self) -> u32 {
        self.generation_length * BASE_FPS
    }

    pub fn needs_interpolation(&self) -> bool {
        self.interpolation_factor > 1
    }

    pub fn needs_upscaling(&self) -> bool {
        self.upscale_factor > 1
    }

    /// Whether `kind` is a no-op for this plan.
    pub fn skips(&self, kind: StageKind) -> bool {
        match kind {
            StageKind::Interpolate => !self.needs_interpolation(),
            StageKind::Upscale => !self.needs_upscaling(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Weights and ranges
// ---------------------------------------------------------------------------

/// Share of the job-level percentage each stage accounts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageWeights {
    pub preprocess: u8,
    pub generate: u8,
    pub interpolate: u8,
    pub upscale: u8,
    pub postprocess: u8,
}

impl Default for StageWeights {
    fn default() -> Self {
        Self {
            preprocess: 5,
            generate: 55,
            interpolate: 15,
            upscale: 20,
            postprocess: 5,
        }
    }
}

impl StageWeights {
    pub fn weight(&self, kind: StageKind) -> u8 {
        match kind {
            StageKind::Preprocess => self.preprocess,
            StageKind::Generate => self.generate,
            StageKind::Interpolate => self.interpolate,
            StageKind::Upscale => self.upscale,
            StageKind::Postprocess => self.postprocess,
        }
    }

    /// Weights must sum to exactly 100.
    pub fn validate(&self) -> Result<(), CoreError> {
        let total: u32 = StageKind::ALL
            .iter()
            .map(|kind| u32::from(self.weight(*kind)))
            .sum();
        if total != 100 {
            return Err(CoreError::Validation(format!(
                "Stage weights must sum to 100 (got {total})"
            )));
        }
        Ok(())
    }

    /// Parse `"5,55,15,20,5"` (stage order) into weights.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        let parts = parse_five(value, "stage weights")?;
        let mut weights = [0u8; 5];
        for (slot, part) in weights.iter_mut().zip(parts) {
            *slot = u8::try_from(part).map_err(|_| {
                CoreError::Validation(format!("Stage weight {part} exceeds 100"))
            })?;
        }
        let weights = Self {
            preprocess: weights[0],
            generate: weights[1],
            interpolate: weights[2],
            upscale: weights[3],
            postprocess: weights[4],
        };
        weights.validate()?;
        Ok(weights)
    }
}

/// Half-open `[start, end)` slice of the job percentage owned by a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRange {
    pub start: u8,
    pub end: u8,
}

impl StageRange {
    /// Job-level percentage for a local stage fraction.
    pub fn percentage_at(&self, fraction: f32) -> u8 {
        let fraction = fraction.clamp(0.0, 1.0);
        let span = f32::from(self.end - self.start);
        self.start + (fraction * span).floor() as u8
    }
}

/// Compute each stage's range, handing skipped stages' weight to generation.
pub fn progress_ranges(weights: &StageWeights, plan: &GenerationPlan) -> [StageRange; 5] {
    let redistributed: u8 = [StageKind::Interpolate, StageKind::Upscale]
        .into_iter()
        .filter(|kind| plan.skips(*kind))
        .map(|kind| weights.weight(kind))
        .sum();

    let mut ranges = [StageRange { start: 0, end: 0 }; 5];
    let mut cursor = 0u8;
    for kind in StageKind::ALL {
        let width = if plan.skips(kind) {
            0
        } else if kind == StageKind::Generate {
            weights.weight(kind) + redistributed
        } else {
            weights.weight(kind)
        };
        ranges[kind.index()] = StageRange {
            start: cursor,
            end: cursor + width,
        };
        cursor += width;
    }
    ranges
}

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

/// Maximum duration each stage may run before the job fails with a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub preprocess: Duration,
    pub generate: Duration,
    pub interpolate: Duration,
    pub upscale: Duration,
    pub postprocess: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            preprocess: Duration::from_secs(30),
            generate: Duration::from_secs(600),
            interpolate: Duration::from_secs(300),
            upscale: Duration::from_secs(300),
            postprocess: Duration::from_secs(120),
        }
    }
}

impl StageTimeouts {
    pub fn budget(&self, kind: StageKind) -> Duration {
        match kind {
            StageKind::Preprocess => self.preprocess,
            StageKind::Generate => self.generate,
            StageKind::Interpolate => self.interpolate,
            StageKind::Upscale => self.upscale,
            StageKind::Postprocess => self.postprocess,
        }
    }

    /// Same budget for every stage.
    pub fn uniform(budget: Duration) -> Self {
        Self {
            preprocess: budget,
            generate: budget,
            interpolate: budget,
            upscale: budget,
            postprocess: budget,
        }
    }

    /// Parse `"30,600,300,300,120"` (seconds, stage order).
    pub fn parse_secs(value: &str) -> Result<Self, CoreError> {
        let secs = parse_five(value, "stage timeouts")?;
        if secs.contains(&0) {
            return Err(CoreError::Validation(
                "Stage timeouts must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            preprocess: Duration::from_secs(secs[0]),
            generate: Duration::from_secs(secs[1]),
            interpolate: Duration::from_secs(secs[2]),
            upscale: Duration::from_secs(secs[3]),
            postprocess: Duration::from_secs(secs[4]),
        })
    }
}

fn parse_five(value: &str, what: &str) -> Result<[u64; 5], CoreError> {
    let parts: Vec<u64> = value
        .split(',')
        .map(|part| part.trim().parse::<u64>())
        .collect::<Result<_, _>>()
        .map_err(|e| CoreError::Validation(format!("Invalid {what} '{value}': {e}")))?;
    <[u64; 5]>::try_from(parts).map_err(|parts| {
        CoreError::Validation(format!(
            "Expected 5 comma-separated {what}, got {}",
            parts.len()
        ))
    })
}

// ---------------------------------------------------------------------------
// PipelineDefinition
// ---------------------------------------------------------------------------

/// One entry of the ordered stage sequence.
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub kind: StageKind,
    pub config: StageConfig,
    pub range: StageRange,
    pub timeout: Duration,
    /// Pass-through for this request; the executor is not invoked.
    pub skipped: bool,
}

/// Ordered stage sequence with per-stage configuration for one job.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    plan: GenerationPlan,
    stages: Vec<StageSpec>,
}

impl PipelineDefinition {
    /// Resolve the stage sequence for `params`.
    pub fn build(
        params: &GenerationParameters,
        weights: &StageWeights,
        timeouts: &StageTimeouts,
    ) -> Result<Self, CoreError> {
        weights.validate()?;
        let plan = GenerationPlan::from_parameters(params);
        let ranges = progress_ranges(weights, &plan);

        let stages = StageKind::ALL
            .into_iter()
            .map(|kind| StageSpec {
                kind,
                config: stage_config(kind, params, &plan),
                range: ranges[kind.index()],
                timeout: timeouts.budget(kind),
                skipped: plan.skips(kind),
            })
            .collect();

        Ok(Self { plan, stages })
    }

    pub fn plan(&self) -> &GenerationPlan {
        &self.plan
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn stage(&self, kind: StageKind) -> &StageSpec {
        &self.stages[kind.index()]
    }
}

fn stage_config(kind: StageKind, params: &GenerationParameters, plan: &GenerationPlan) -> StageConfig {
    match kind {
        StageKind::Preprocess => StageConfig::Preprocess,
        StageKind::Generate => StageConfig::Generate(GenerateConfig {
            prompt: params.prompt.clone(),
            negative_prompt: params.negative_prompt.clone(),
            base_model: params.base_model,
            motion_adapter: params.motion_adapter,
            inference_steps: params.inference_steps,
            guidance_scale: params.guidance_scale,
            seed: params.seed,
        }),
        StageKind::Interpolate => StageConfig::Interpolate(InterpolateConfig {
            factor: plan.interpolation_factor,
        }),
        StageKind::Upscale => StageConfig::Upscale(UpscaleConfig {
            factor: plan.upscale_factor,
        }),
        StageKind::Postprocess => StageConfig::Postprocess(EncodeConfig {
            width: params.width,
            height: params.height,
            fps: plan.final_fps,
            video_length: params.video_length,
            output_format: params.output_format,
            prompt: params.prompt.clone(),
            seed: params.seed,
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
