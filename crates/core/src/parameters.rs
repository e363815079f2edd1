//! Generation request validation and resolution (aspect ratio × resolution
//! class → pixel dimensions, model defaults, seeds).
//!
//! A [`GenerationRequest`] is the raw submission payload; [`resolve`] turns
//! it into fully-typed [`GenerationParameters`] or rejects it with
//! [`CoreError::Validation`]. A rejected request never becomes a job.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Named constants
// ---------------------------------------------------------------------------

/// Frame rates a client may request.
pub const SUPPORTED_FPS: &[u32] = &[8, 16, 24, 32];

/// Shortest video length in seconds.
pub const MIN_VIDEO_LENGTH: u32 = 1;

/// Longest video length in seconds.
pub const MAX_VIDEO_LENGTH: u32 = 10;

/// Inference step bounds (inclusive).
pub const MIN_INFERENCE_STEPS: u32 = 1;
pub const MAX_INFERENCE_STEPS: u32 = 100;

/// Used when the request does not specify inference steps.
pub const DEFAULT_INFERENCE_STEPS: u32 = 25;

/// Guidance scale bounds (inclusive).
pub const MIN_GUIDANCE_SCALE: f32 = 1.0;
pub const MAX_GUIDANCE_SCALE: f32 = 20.0;

/// Seeds are drawn from `0..MAX_SEED` when the request has none.
pub const MAX_SEED: u64 = 1_000_000_000;

/// Maximum prompt length in characters.
const MAX_PROMPT_LEN: usize = 1000;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Supported aspect ratios, transported as `[w, h]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[u32; 2]", into = "[u32; 2]")]
pub enum AspectRatio {
    Landscape16x9,
    Landscape3x2,
    Square,
    Portrait2x3,
    Portrait9x16,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Landscape16x9,
        AspectRatio::Landscape3x2,
        AspectRatio::Square,
        AspectRatio::Portrait2x3,
        AspectRatio::Portrait9x16,
    ];

    pub fn pair(self) -> [u32; 2] {
        match self {
            AspectRatio::Landscape16x9 => [16, 9],
            AspectRatio::Landscape3x2 => [3, 2],
            AspectRatio::Square => [1, 1],
            AspectRatio::Portrait2x3 => [2, 3],
            AspectRatio::Portrait9x16 => [9, 16],
        }
    }

    pub fn ratio_string(self) -> String {
        let [w, h] = self.pair();
        format!("{w}:{h}")
    }
}

impl TryFrom<[u32; 2]> for AspectRatio {
    type Error = CoreError;

    fn try_from(pair: [u32; 2]) -> Result<Self, Self::Error> {
        AspectRatio::ALL
            .into_iter()
            .find(|ratio| ratio.pair() == pair)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Unsupported aspect ratio {}:{}. Valid ratios: 16:9, 3:2, 1:1, 2:3, 9:16",
                    pair[0], pair[1]
                ))
            })
    }
}

impl From<AspectRatio> for [u32; 2] {
    fn from(ratio: AspectRatio) -> Self {
        ratio.pair()
    }
}

/// Output resolution class, identified by its pixel height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ResolutionClass {
    P256,
    P480,
    P512,
    P720,
    P1024,
}

impl ResolutionClass {
    pub const ALL: [ResolutionClass; 5] = [
        ResolutionClass::P256,
        ResolutionClass::P480,
        ResolutionClass::P512,
        ResolutionClass::P720,
        ResolutionClass::P1024,
    ];

    pub fn height(self) -> u32 {
        match self {
            ResolutionClass::P256 => 256,
            ResolutionClass::P480 => 480,
            ResolutionClass::P512 => 512,
            ResolutionClass::P720 => 720,
            ResolutionClass::P1024 => 1024,
        }
    }

    /// Standard output width for the given aspect ratio.
    ///
    /// Portrait widths are rounded to even values so encoders accept them.
    pub fn width(self, aspect_ratio: AspectRatio) -> u32 {
        use AspectRatio::*;
        match (self, aspect_ratio) {
            (ResolutionClass::P256, Landscape16x9) => 456,
            (ResolutionClass::P256, Landscape3x2) => 384,
            (ResolutionClass::P256, Square) => 256,
            (ResolutionClass::P256, Portrait2x3) => 170,
            (ResolutionClass::P256, Portrait9x16) => 144,

            (ResolutionClass::P480, Landscape16x9) => 854,
            (ResolutionClass::P480, Landscape3x2) => 720,
            (ResolutionClass::P480, Square) => 480,
            (ResolutionClass::P480, Portrait2x3) => 320,
            (ResolutionClass::P480, Portrait9x16) => 270,

            (ResolutionClass::P512, Landscape16x9) => 910,
            (ResolutionClass::P512, Landscape3x2) => 768,
            (ResolutionClass::P512, Square) => 512,
            (ResolutionClass::P512, Portrait2x3) => 342,
            (ResolutionClass::P512, Portrait9x16) => 288,

            (ResolutionClass::P720, Landscape16x9) => 1280,
            (ResolutionClass::P720, Landscape3x2) => 1080,
            (ResolutionClass::P720, Square) => 720,
            (ResolutionClass::P720, Portrait2x3) => 480,
            (ResolutionClass::P720, Portrait9x16) => 406,

            (ResolutionClass::P1024, Landscape16x9) => 1820,
            (ResolutionClass::P1024, Landscape3x2) => 1536,
            (ResolutionClass::P1024, Square) => 1024,
            (ResolutionClass::P1024, Portrait2x3) => 682,
            (ResolutionClass::P1024, Portrait9x16) => 576,
        }
    }

    /// `(width, height)` for this class at the given aspect ratio.
    pub fn dimensions(self, aspect_ratio: AspectRatio) -> (u32, u32) {
        (self.width(aspect_ratio), self.height())
    }
}

impl TryFrom<u32> for ResolutionClass {
    type Error = CoreError;

    fn try_from(height: u32) -> Result<Self, Self::Error> {
        ResolutionClass::ALL
            .into_iter()
            .find(|class| class.height() == height)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Unsupported resolution {height}p. Valid resolutions: 256, 480, 512, 720, 1024"
                ))
            })
    }
}

impl From<ResolutionClass> for u32 {
    fn from(class: ResolutionClass) -> Self {
        class.height()
    }
}

/// Container format of the final media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp4,
    Webm,
    Gif,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value.to_ascii_lowercase().as_str() {
            "mp4" => Ok(OutputFormat::Mp4),
            "webm" => Ok(OutputFormat::Webm),
            "gif" => Ok(OutputFormat::Gif),
            other => Err(CoreError::Validation(format!(
                "Unsupported output format '{other}'. Valid formats: mp4, webm, gif"
            ))),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
            OutputFormat::Gif => "gif",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "video/mp4",
            OutputFormat::Webm => "video/webm",
            OutputFormat::Gif => "image/gif",
        }
    }
}

/// Base diffusion checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseModel {
    Sd15,
    Sd21,
    Epicrealism,
    RealisticVision,
    Dreamshaper,
    Juggernaut,
    RevAnimated,
}

impl BaseModel {
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value {
            "sd15" => Ok(BaseModel::Sd15),
            "sd21" => Ok(BaseModel::Sd21),
            "epicrealism" => Ok(BaseModel::Epicrealism),
            "realistic_vision" => Ok(BaseModel::RealisticVision),
            "dreamshaper" => Ok(BaseModel::Dreamshaper),
            "juggernaut" => Ok(BaseModel::Juggernaut),
            "rev_animated" => Ok(BaseModel::RevAnimated),
            other => Err(CoreError::Validation(format!(
                "Unknown base model '{other}'"
            ))),
        }
    }

    /// Guidance scale used when the request does not set one.
    pub fn default_guidance_scale(self) -> f32 {
        7.5
    }
}

/// Motion module paired with the base model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionAdapter {
    #[default]
    Default,
}

impl MotionAdapter {
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value {
            "default" => Ok(MotionAdapter::Default),
            other => Err(CoreError::Validation(format!(
                "Unknown motion adapter '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Request / resolved parameters
// ---------------------------------------------------------------------------

/// Raw submission payload as sent by clients.
///
/// Enumerated fields are kept as primitives so that every bad value is
/// reported as a validation error rather than a deserialization failure.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    pub aspect_ratio: [u32; 2],
    pub resolution: u32,
    pub fps: u32,
    pub video_length: u32,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    pub base_model: String,
    #[serde(default)]
    pub motion_adapter: Option<String>,
    #[serde(default)]
    pub inference_steps: Option<u32>,
    #[serde(default)]
    pub guidance_scale: Option<f32>,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_output_format() -> String {
    "mp4".to_string()
}

/// Fully resolved, validated generation parameters stored on the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub aspect_ratio: AspectRatio,
    pub resolution: ResolutionClass,
    /// Requested output width in pixels.
    pub width: u32,
    /// Requested output height in pixels.
    pub height: u32,
    pub fps: u32,
    /// Requested length in seconds.
    pub video_length: u32,
    pub output_format: OutputFormat,
    pub base_model: BaseModel,
    pub motion_adapter: MotionAdapter,
    pub inference_steps: u32,
    pub guidance_scale: f32,
    pub seed: u64,
}

// ---------------------------------------------------------------------------
// Validation functions
// ---------------------------------------------------------------------------

/// Validate that the prompt is non-blank and within the length limit.
pub fn validate_prompt(prompt: &str) -> Result<(), CoreError> {
    if prompt.trim().is_empty() {
        return Err(CoreError::Validation(
            "Prompt must not be empty".to_string(),
        ));
    }
    if prompt.chars().count() > MAX_PROMPT_LEN {
        return Err(CoreError::Validation(format!(
            "Prompt must not exceed {MAX_PROMPT_LEN} characters"
        )));
    }
    Ok(())
}

/// Validate the requested frame rate against [`SUPPORTED_FPS`].
pub fn validate_fps(fps: u32) -> Result<(), CoreError> {
    if SUPPORTED_FPS.contains(&fps) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Unsupported fps {fps}. Valid values: 8, 16, 24, 32"
        )))
    }
}

pub fn validate_video_length(seconds: u32) -> Result<(), CoreError> {
    if !(MIN_VIDEO_LENGTH..=MAX_VIDEO_LENGTH).contains(&seconds) {
        return Err(CoreError::Validation(format!(
            "Video length must be between {MIN_VIDEO_LENGTH} and {MAX_VIDEO_LENGTH} seconds (got {seconds})"
        )));
    }
    Ok(())
}

pub fn validate_inference_steps(steps: u32) -> Result<(), CoreError> {
    if !(MIN_INFERENCE_STEPS..=MAX_INFERENCE_STEPS).contains(&steps) {
        return Err(CoreError::Validation(format!(
            "Inference steps must be between {MIN_INFERENCE_STEPS} and {MAX_INFERENCE_STEPS} (got {steps})"
        )));
    }
    Ok(())
}

pub fn validate_guidance_scale(scale: f32) -> Result<(), CoreError> {
    if !scale.is_finite() || !(MIN_GUIDANCE_SCALE..=MAX_GUIDANCE_SCALE).contains(&scale) {
        return Err(CoreError::Validation(format!(
            "Guidance scale must be between {MIN_GUIDANCE_SCALE} and {MAX_GUIDANCE_SCALE} (got {scale})"
        )));
    }
    Ok(())
}

pub fn validate_seed(seed: u64) -> Result<(), CoreError> {
    if seed >= MAX_SEED {
        return Err(CoreError::Validation(format!(
            "Seed must be below {MAX_SEED}"
        )));
    }
    Ok(())
}

/// Validate a raw request and resolve it into [`GenerationParameters`].
///
/// Fills in model defaults and draws a random seed when none is given.
pub fn resolve(request: GenerationRequest) -> Result<GenerationParameters, CoreError> {
    validate_prompt(&request.prompt)?;
    let aspect_ratio = AspectRatio::try_from(request.aspect_ratio)?;
    let resolution = ResolutionClass::try_from(request.resolution)?;
    validate_fps(request.fps)?;
    validate_video_length(request.video_length)?;
    let output_format = OutputFormat::parse(&request.output_format)?;
    let base_model = BaseModel::parse(&request.base_model)?;
    let motion_adapter = match request.motion_adapter.as_deref() {
        Some(name) => MotionAdapter::parse(name)?,
        None => MotionAdapter::default(),
    };

    let inference_steps = request.inference_steps.unwrap_or(DEFAULT_INFERENCE_STEPS);
    validate_inference_steps(inference_steps)?;

    let guidance_scale = request
        .guidance_scale
        .unwrap_or_else(|| base_model.default_guidance_scale());
    validate_guidance_scale(guidance_scale)?;

    let seed = match request.seed {
        Some(seed) => {
            validate_seed(seed)?;
            seed
        }
        None => rand::random_range(0..MAX_SEED),
    };

    let negative_prompt = request
        .negative_prompt
        .filter(|negative| !negative.trim().is_empty());

    let (width, height) = resolution.dimensions(aspect_ratio);

    Ok(GenerationParameters {
        prompt: request.prompt,
        negative_prompt,
        aspect_ratio,
        resolution,
        width,
        height,
        fps: request.fps,
        video_length: request.video_length,
        output_format,
        base_model,
        motion_adapter,
        inference_steps,
        guidance_scale,
        seed,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
