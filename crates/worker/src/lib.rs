//! Job orchestration: registry, scheduling, pipeline runs, cancellation
//! and artifact hand-off.
//!
//! [`Engine`] is the entry point. It owns a [`JobRegistry`], the CPU/GPU
//! [`ResourcePools`] and a background dispatcher that turns queued jobs
//! into pipeline runs.

pub mod artifacts;
pub mod cancel;
pub mod config;
mod dispatcher;
pub mod engine;
pub mod registry;
mod retention;
mod runner;
pub mod runs;
pub mod slots;

pub use artifacts::{ArtifactStore, InMemoryArtifactStore, LocalArtifactStore, StorageError};
pub use cancel::CancellationController;
pub use config::EngineConfig;
pub use engine::Engine;
pub use registry::JobRegistry;
pub use runner::STEP_STORING;
pub use slots::{ResourcePools, SlotGuard};
