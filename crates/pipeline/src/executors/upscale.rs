use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use vidgen_core::stage::StageKind;

use crate::stage::{
    pace, FrameBatch, StageConfig, StageData, StageError, StageExecutor, StageProgress,
};

/// Frames upscaled between two checkpoints.
const FRAMES_PER_CHECKPOINT: usize = 16;

/// Super-resolution stage multiplying frame dimensions by a power-of-two
/// factor.
pub struct FrameUpscaler {
    checkpoint_delay: Duration,
}

impl FrameUpscaler {
    pub fn new(checkpoint_delay: Duration) -> Self {
        Self { checkpoint_delay }
    }
}

#[async_trait]
impl StageExecutor for FrameUpscaler {
    fn kind(&self) -> StageKind {
        StageKind::Upscale
    }

    async fn execute(
        &self,
        input: StageData,
        config: &StageConfig,
        progress: &StageProgress,
        cancel: &CancellationToken,
    ) -> Result<StageData, StageError> {
        let StageConfig::Upscale(config) = config else {
            return Err(StageError::unexpected_config(self.kind()));
        };
        let mut batch = match input {
            StageData::Frames(batch) => batch,
            other => return Err(StageError::unexpected_input(self.kind(), &other)),
        };
        if config.factor == 0 {
            return Err(StageError::InvalidInput(
                "Upscale factor must be at least 1".to_string(),
            ));
        }
        if batch.is_empty() {
            return Err(StageError::InvalidInput("No frames to upscale".to_string()));
        }

        pace(self.checkpoint_delay, cancel).await?;
        if config.factor == 1 {
            progress.report(1.0);
            return Ok(StageData::Frames(batch));
        }

        let factor = config.factor;
        let total = batch.len();
        let mut done = 0usize;
        for chunk in batch.frames.chunks_mut(FRAMES_PER_CHECKPOINT) {
            pace(self.checkpoint_delay, cancel).await?;
            for frame in chunk.iter_mut() {
                frame.width *= factor;
                frame.height *= factor;
            }
            done += chunk.len();
            progress.report(done as f32 / total as f32);
        }

        tracing::debug!(
            frames = total,
            factor,
            from_width = batch.width,
            from_height = batch.height,
            "Frames upscaled",
        );

        Ok(StageData::Frames(FrameBatch {
            width: batch.width * factor,
            height: batch.height * factor,
            ..batch
        }))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::executors::test_support::generated_batch;
    use crate::stage::UpscaleConfig;

    async fn run(batch: FrameBatch, factor: u32) -> Result<StageData, StageError> {
        FrameUpscaler::new(Duration::ZERO)
            .execute(
                StageData::Frames(batch),
                &StageConfig::Upscale(UpscaleConfig { factor }),
                &StageProgress::noop(),
                &CancellationToken::new(),
            )
            .await
    }

    #[tokio::test]
    async fn multiplies_every_frame() {
        let out = run(generated_batch(40, 256, 144), 4).await.unwrap();
        assert_matches!(out, StageData::Frames(batch) => {
            assert_eq!((batch.width, batch.height), (1024, 576));
            assert_eq!(batch.len(), 40);
            assert!(batch.frames.iter().all(|f| f.width == 1024 && f.height == 576));
        });
    }

    #[tokio::test]
    async fn factor_one_passes_through() {
        let batch = generated_batch(4, 64, 64);
        let out = run(batch.clone(), 1).await.unwrap();
        assert_eq!(out, StageData::Frames(batch));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_work() {
        let token = CancellationToken::new();
        token.cancel();
        let result = FrameUpscaler::new(Duration::ZERO)
            .execute(
                StageData::Frames(generated_batch(4, 64, 64)),
                &StageConfig::Upscale(UpscaleConfig { factor: 2 }),
                &StageProgress::noop(),
                &token,
            )
            .await;
        assert_eq!(result, Err(StageError::Cancelled));
    }
}
