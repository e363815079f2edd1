use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use vidgen_core::parameters::OutputFormat;
use vidgen_core::stage::StageKind;

use crate::stage::{
    pace, Frame, FrameBatch, MediaArtifact, StageConfig, StageData, StageError, StageExecutor,
    StageProgress,
};

/// Characters of the prompt kept in the output file name.
const FILE_NAME_PROMPT_CHARS: usize = 30;

/// How frames were fitted to the requested output size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMode {
    Exact,
    /// Center crop of a larger frame.
    Crop,
    /// Centered on a black canvas.
    Pad,
}

/// Choose the fit for a `source` frame rendered into `target`.
///
/// Any axis smaller than the target forces padding.
pub fn fit_mode(source: (u32, u32), target: (u32, u32)) -> FitMode {
    if source == target {
        FitMode::Exact
    } else if source.0 < target.0 || source.1 < target.1 {
        FitMode::Pad
    } else {
        FitMode::Crop
    }
}

/// Keep only the first `video_length * fps` frames.
pub fn trim_frames(frames: &mut Vec<Frame>, video_length: u32, fps: u32) {
    let target = (video_length * fps) as usize;
    if frames.len() > target {
        frames.truncate(target);
    }
}

/// `{timestamp}_{prompt}_seed{seed}_len{n}s_fps{fps}.{ext}`
pub fn output_file_name(
    prompt: &str,
    seed: u64,
    video_length: u32,
    fps: u32,
    format: OutputFormat,
    now: DateTime<Utc>,
) -> String {
    let safe: String = prompt
        .chars()
        .take(FILE_NAME_PROMPT_CHARS)
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '_')
        .collect();
    let safe = safe.trim_end().replace(' ', "_");
    let safe = if safe.is_empty() { "video" } else { safe.as_str() };
    format!(
        "{}_{}_seed{}_len{}s_fps{}.{}",
        now.format("%Y%m%d_%H%M%S"),
        safe,
        seed,
        video_length,
        fps,
        format.extension()
    )
}

#[derive(Serialize)]
struct ContainerManifest<'a> {
    format: OutputFormat,
    width: u32,
    height: u32,
    fps: u32,
    duration_secs: f32,
    fit: FitMode,
    source_width: u32,
    source_height: u32,
    frames: &'a [Frame],
}

/// Trims, fits and encodes the final frame sequence.
pub struct VideoEncoder {
    checkpoint_delay: Duration,
}

impl VideoEncoder {
    pub fn new(checkpoint_delay: Duration) -> Self {
        Self { checkpoint_delay }
    }
}

#[async_trait]
impl StageExecutor for VideoEncoder {
    fn kind(&self) -> StageKind {
        StageKind::Postprocess
    }

    async fn execute(
        &self,
        input: StageData,
        config: &StageConfig,
        progress: &StageProgress,
        cancel: &CancellationToken,
    ) -> Result<StageData, StageError> {
        let StageConfig::Postprocess(config) = config else {
            return Err(StageError::unexpected_config(self.kind()));
        };
        let FrameBatch {
            width: source_width,
            height: source_height,
            fps,
            mut frames,
        } = match input {
            StageData::Frames(batch) => batch,
            other => return Err(StageError::unexpected_input(self.kind(), &other)),
        };

        if frames.is_empty() {
            return Err(StageError::InvalidInput("No frames to encode".to_string()));
        }
        if fps != config.fps {
            return Err(StageError::InvalidInput(format!(
                "Frames arrive at {fps} fps but {} fps output was requested",
                config.fps
            )));
        }
        if config.width == 0 || config.height == 0 {
            return Err(StageError::InvalidInput(format!(
                "Invalid output dimensions {}x{}",
                config.width, config.height
            )));
        }

        pace(self.checkpoint_delay, cancel).await?;
        trim_frames(&mut frames, config.video_length, config.fps);
        progress.report(0.25);

        pace(self.checkpoint_delay, cancel).await?;
        let fit = fit_mode((source_width, source_height), (config.width, config.height));
        for frame in frames.iter_mut() {
            frame.width = config.width;
            frame.height = config.height;
        }
        progress.report(0.5);

        pace(self.checkpoint_delay, cancel).await?;
        let frame_count = frames.len() as u32;
        let manifest = ContainerManifest {
            format: config.output_format,
            width: config.width,
            height: config.height,
            fps: config.fps,
            duration_secs: frame_count as f32 / config.fps as f32,
            fit,
            source_width,
            source_height,
            frames: &frames,
        };
        let bytes = serde_json::to_vec(&manifest)
            .map_err(|e| StageError::Failed(format!("Encoding failed: {e}")))?;
        progress.report(1.0);

        let file_name = output_file_name(
            &config.prompt,
            config.seed,
            config.video_length,
            config.fps,
            config.output_format,
            Utc::now(),
        );

        tracing::debug!(
            file_name = %file_name,
            frames = frame_count,
            fit = ?fit,
            size_bytes = bytes.len(),
            "Video encoded",
        );

        Ok(StageData::Media(MediaArtifact {
            file_name,
            format: config.output_format,
            width: config.width,
            height: config.height,
            fps: config.fps,
            frame_count,
            bytes,
        }))
    }
}
