use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use vidgen_core::stage::StageKind;

use crate::definition::BASE_FPS;
use crate::stage::{
    pace, Frame, FrameBatch, FrameOrigin, StageConfig, StageData, StageError, StageExecutor,
    StageProgress,
};

/// Share of the stage spent denoising; the remainder is frame decoding.
const DENOISE_SHARE: f32 = 0.9;

/// Text-to-frames generator running at the base operating point.
///
/// Runs one checkpoint per inference step, then decodes
/// `generation_length * BASE_FPS` frames at the generation dimensions.
pub struct DiffusionGenerator {
    checkpoint_delay: Duration,
}

impl DiffusionGenerator {
    pub fn new(checkpoint_delay: Duration) -> Self {
        Self { checkpoint_delay }
    }
}

#[async_trait]
impl StageExecutor for DiffusionGenerator {
    fn kind(&self) -> StageKind {
        StageKind::Generate
    }

    async fn execute(
        &self,
        input: StageData,
        config: &StageConfig,
        progress: &StageProgress,
        cancel: &CancellationToken,
    ) -> Result<StageData, StageError> {
        let StageConfig::Generate(config) = config else {
            return Err(StageError::unexpected_config(self.kind()));
        };
        let prepared = match input {
            StageData::Prepared(prepared) => prepared,
            other => return Err(StageError::unexpected_input(self.kind(), &other)),
        };
        let plan = prepared.plan;

        let frame_count = plan.base_frame_count();
        if frame_count == 0 {
            return Err(StageError::Failed(
                "Generator produced no frames".to_string(),
            ));
        }

        tracing::debug!(
            model = ?config.base_model,
            steps = config.inference_steps,
            guidance_scale = config.guidance_scale,
            seed = config.seed,
            width = plan.generation_width,
            height = plan.generation_height,
            frames = frame_count,
            "Generating frames",
        );

        let steps = config.inference_steps.max(1);
        for step in 1..=steps {
            pace(self.checkpoint_delay, cancel).await?;
            progress.report(DENOISE_SHARE * step as f32 / steps as f32);
        }

        pace(self.checkpoint_delay, cancel).await?;
        let frames = (0..frame_count)
            .map(|i| Frame {
                position: i as f32,
                origin: FrameOrigin::Generated,
                width: plan.generation_width,
                height: plan.generation_height,
            })
            .collect();
        progress.report(1.0);

        Ok(StageData::Frames(FrameBatch {
            width: plan.generation_width,
            height: plan.generation_height,
            fps: BASE_FPS,
            frames,
        }))
    }
}
