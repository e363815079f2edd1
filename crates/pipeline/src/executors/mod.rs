//! Reference stage executors and the registry that maps each
//! [`StageKind`] to the executor that runs it.
//!
//! The reference executors model the neural networks as transforms over
//! frame descriptors. Each checkpoint sleeps for a configurable delay so
//! the orchestrator sees realistic progress and cancellation timing.

pub mod generate;
pub mod interpolate;
pub mod postprocess;
pub mod preprocess;
pub mod upscale;

use std::sync::Arc;
use std::time::Duration;

use vidgen_core::stage::StageKind;

use crate::stage::StageExecutor;

pub use generate::DiffusionGenerator;
pub use interpolate::FrameInterpolator;
pub use postprocess::VideoEncoder;
pub use preprocess::Preprocessor;
pub use upscale::FrameUpscaler;

/// One executor per stage kind.
#[derive(Clone)]
pub struct StageSet {
    executors: [Arc<dyn StageExecutor>; 5],
}

impl StageSet {
    /// The reference executors with the given per-checkpoint delay.
    pub fn reference(checkpoint_delay: Duration) -> Self {
        Self {
            executors: [
                Arc::new(Preprocessor::new(checkpoint_delay)),
                Arc::new(DiffusionGenerator::new(checkpoint_delay)),
                Arc::new(FrameInterpolator::new(checkpoint_delay)),
                Arc::new(FrameUpscaler::new(checkpoint_delay)),
                Arc::new(VideoEncoder::new(checkpoint_delay)),
            ],
        }
    }

    /// Replace the executor for `executor.kind()`.
    pub fn with_executor(mut self, executor: Arc<dyn StageExecutor>) -> Self {
        let slot = executor.kind().index();
        self.executors[slot] = executor;
        self
    }

    pub fn executor(&self, kind: StageKind) -> &Arc<dyn StageExecutor> {
        &self.executors[kind.index()]
    }
}

impl std::fmt::Debug for StageSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.executors.iter().map(|e| e.kind()))
            .finish()
    }
}
