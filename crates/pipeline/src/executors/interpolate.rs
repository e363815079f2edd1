use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use vidgen_core::stage::StageKind;

use crate::stage::{
    pace, Frame, FrameBatch, FrameOrigin, StageConfig, StageData, StageError, StageExecutor,
    StageProgress,
};

/// Consecutive frame pairs processed between two checkpoints.
const PAIRS_PER_CHECKPOINT: usize = 8;

/// Raises the frame rate by synthesizing `factor - 1` frames between every
/// consecutive pair.
///
/// `n` input frames become `(n - 1) * factor + 1`. Synthesized frames sit at
/// fractional timeline positions and are never copies of their neighbours.
pub struct FrameInterpolator {
    checkpoint_delay: Duration,
}

impl FrameInterpolator {
    pub fn new(checkpoint_delay: Duration) -> Self {
        Self { checkpoint_delay }
    }
}

/// Interpolate `batch` by `factor`. Factor 1 returns the batch unchanged.
pub fn interpolate_frames(batch: &FrameBatch, factor: u32) -> FrameBatch {
    if factor <= 1 || batch.frames.len() < 2 {
        return FrameBatch {
            fps: batch.fps * factor.max(1),
            ..batch.clone()
        };
    }
    let mut frames = Vec::with_capacity((batch.frames.len() - 1) * factor as usize + 1);
    for pair in batch.frames.windows(2) {
        frames.push(pair[0].clone());
        frames.extend(synthesize(&pair[0], &pair[1], factor));
    }
    if let Some(last) = batch.frames.last() {
        frames.push(last.clone());
    }
    FrameBatch {
        width: batch.width,
        height: batch.height,
        fps: batch.fps * factor,
        frames,
    }
}

fn synthesize<'a>(a: &'a Frame, b: &'a Frame, factor: u32) -> impl Iterator<Item = Frame> + 'a {
    (1..factor).map(move |k| {
        let t = k as f32 / factor as f32;
        Frame {
            position: a.position + (b.position - a.position) * t,
            origin: FrameOrigin::Interpolated,
            width: a.width,
            height: a.height,
        }
    })
}

#[async_trait]
impl StageExecutor for FrameInterpolator {
    fn kind(&self) -> StageKind {
        StageKind::Interpolate
    }

    async fn execute(
        &self,
        input: StageData,
        config: &StageConfig,
        progress: &StageProgress,
        cancel: &CancellationToken,
    ) -> Result<StageData, StageError> {
        let StageConfig::Interpolate(config) = config else {
            return Err(StageError::unexpected_config(self.kind()));
        };
        let batch = match input {
            StageData::Frames(batch) => batch,
            other => return Err(StageError::unexpected_input(self.kind(), &other)),
        };
        if config.factor == 0 {
            return Err(StageError::InvalidInput(
                "Interpolation factor must be at least 1".to_string(),
            ));
        }
        if batch.is_empty() {
            return Err(StageError::InvalidInput("No frames to interpolate".to_string()));
        }

        pace(self.checkpoint_delay, cancel).await?;
        if config.factor == 1 {
            progress.report(1.0);
            return Ok(StageData::Frames(batch));
        }

        let factor = config.factor;
        let pairs: Vec<&[Frame]> = batch.frames.windows(2).collect();
        let total = pairs.len();
        let mut frames = Vec::with_capacity(total * factor as usize + 1);
        for (chunk_idx, chunk) in pairs.chunks(PAIRS_PER_CHECKPOINT).enumerate() {
            pace(self.checkpoint_delay, cancel).await?;
            for pair in chunk {
                frames.push(pair[0].clone());
                frames.extend(synthesize(&pair[0], &pair[1], factor));
            }
            let done = ((chunk_idx + 1) * PAIRS_PER_CHECKPOINT).min(total);
            progress.report(done as f32 / total as f32);
        }
        if let Some(last) = batch.frames.last() {
            frames.push(last.clone());
        }
        progress.report(1.0);

        tracing::debug!(
            input_frames = batch.len(),
            output_frames = frames.len(),
            factor,
            "Frames interpolated",
        );

        Ok(StageData::Frames(FrameBatch {
            width: batch.width,
            height: batch.height,
            fps: batch.fps * factor,
            frames,
        }))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::executors::test_support::generated_batch;
    use crate::stage::InterpolateConfig;

    #[test]
    fn frame_count_follows_formula() {
        let batch = generated_batch(24, 64, 64);
        let out = interpolate_frames(&batch, 3);
        assert_eq!(out.len(), (24 - 1) * 3 + 1);
        assert_eq!(out.fps, 24);
    }

    #[test]
    fn synthesized_frames_are_distinct_and_ordered() {
        let out = interpolate_frames(&generated_batch(3, 8, 8), 4);
        let positions: Vec<f32> = out.frames.iter().map(|f| f.position).collect();
        assert_eq!(positions, vec![0.0, 0.25, 0.5, 0.75, 1.0, 1.25, 1.5, 1.75, 2.0]);
        assert_eq!(
            out.frames
                .iter()
                .filter(|f| f.origin == FrameOrigin::Interpolated)
                .count(),
            6
        );
    }

    #[test]
    fn factor_one_is_identity() {
        let batch = generated_batch(5, 8, 8);
        assert_eq!(interpolate_frames(&batch, 1), batch);
    }

    #[tokio::test]
    async fn executor_matches_pure_transform() {
        let batch = generated_batch(40, 16, 16);
        let expected = interpolate_frames(&batch, 2);
        let out = FrameInterpolator::new(Duration::ZERO)
            .execute(
                StageData::Frames(batch),
                &StageConfig::Interpolate(InterpolateConfig { factor: 2 }),
                &StageProgress::noop(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out, StageData::Frames(expected));
    }

    #[tokio::test]
    async fn empty_batch_rejected() {
        let result = FrameInterpolator::new(Duration::ZERO)
            .execute(
                StageData::Frames(generated_batch(0, 8, 8)),
                &StageConfig::Interpolate(InterpolateConfig { factor: 2 }),
                &StageProgress::noop(),
                &CancellationToken::new(),
            )
            .await;
        assert_matches!(result, Err(StageError::InvalidInput(_)));
    }
}
