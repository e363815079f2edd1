use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use vidgen_core::stage::StageKind;

use crate::definition::GenerationPlan;
use crate::stage::{
    pace, PreparedRequest, StageConfig, StageData, StageError, StageExecutor, StageProgress,
};

/// Derives the generator's operating point from the requested output.
pub struct Preprocessor {
    checkpoint_delay: Duration,
}

impl Preprocessor {
    pub fn new(checkpoint_delay: Duration) -> Self {
        Self { checkpoint_delay }
    }
}

#[async_trait]
impl StageExecutor for Preprocessor {
    fn kind(&self) -> StageKind {
        StageKind::Preprocess
    }

    async fn execute(
        &self,
        input: StageData,
        config: &StageConfig,
        progress: &StageProgress,
        cancel: &CancellationToken,
    ) -> Result<StageData, StageError> {
        if !matches!(config, StageConfig::Preprocess) {
            return Err(StageError::unexpected_config(self.kind()));
        }
        let parameters = match input {
            StageData::Parameters(parameters) => parameters,
            other => return Err(StageError::unexpected_input(self.kind(), &other)),
        };

        pace(self.checkpoint_delay, cancel).await?;
        let plan = GenerationPlan::from_parameters(&parameters);
        progress.report(0.5);

        tracing::debug!(
            interpolation_factor = plan.interpolation_factor,
            upscale_factor = plan.upscale_factor,
            generation_width = plan.generation_width,
            generation_height = plan.generation_height,
            generation_length = plan.generation_length,
            "Generation plan derived",
        );

        pace(self.checkpoint_delay, cancel).await?;
        progress.report(1.0);

        Ok(StageData::Prepared(PreparedRequest { parameters, plan }))
    }
}
