//! Orchestrator facade: submit, inspect, follow and cancel jobs.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use vidgen_core::error::CoreError;
use vidgen_core::job::{Job, JobStatus};
use vidgen_core::parameters::{resolve, GenerationParameters, GenerationRequest};
use vidgen_core::types::{JobId, OwnerId};
use vidgen_events::{NotifierError, ProgressNotifier, ProgressSubscription};
use vidgen_pipeline::StageSet;

use crate::artifacts::{ArtifactStore, LocalArtifactStore};
use crate::cancel::CancellationController;
use crate::config::EngineConfig;
use crate::dispatcher::JobDispatcher;
use crate::registry::JobRegistry;
use crate::retention;
use crate::runner::RunContext;
use crate::runs::ActiveRuns;
use crate::slots::ResourcePools;

/// The job-orchestration engine.
///
/// Owns the job registry, the slot pools, the background dispatcher and
/// the finished-job retention task. Must be started inside a Tokio runtime.
pub struct Engine {
    ctx: Arc<RunContext>,
    notifier: Arc<ProgressNotifier>,
    queue: mpsc::UnboundedSender<JobId>,
    controller: CancellationController,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    retention: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Start an engine with the given stage executors and artifact store.
    pub fn start(
        config: EngineConfig,
        stages: StageSet,
        store: Arc<dyn ArtifactStore>,
    ) -> Result<Self, CoreError> {
        config.validate()?;

        let notifier = Arc::new(ProgressNotifier::new(config.progress_buffer));
        let registry = Arc::new(JobRegistry::new(Arc::clone(&notifier)));
        let ctx = Arc::new(RunContext {
            pools: ResourcePools::new(config.cpu_slots, config.gpu_slots),
            config,
            registry,
            runs: ActiveRuns::new(),
            stages,
            store,
            tasks: TaskTracker::new(),
        });

        let (queue, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let dispatcher = JobDispatcher::new(Arc::clone(&ctx), rx);
        let handle = tokio::spawn(dispatcher.run(shutdown.clone()));
        let sweeper = tokio::spawn(retention::run(
            Arc::clone(&ctx.registry),
            ctx.config.job_retention,
            ctx.config.retention_sweep_interval,
            shutdown.clone(),
        ));

        Ok(Self {
            controller: CancellationController::new(Arc::clone(&ctx)),
            ctx,
            notifier,
            queue,
            shutdown,
            dispatcher: Mutex::new(Some(handle)),
            retention: Mutex::new(Some(sweeper)),
        })
    }

    /// Start an engine with the reference executors writing to
    /// `config.artifact_dir`.
    pub fn with_reference_stages(config: EngineConfig) -> Result<Self, CoreError> {
        let stages = StageSet::reference(config.checkpoint_delay);
        let store = Arc::new(LocalArtifactStore::new(config.artifact_dir.clone()));
        Self::start(config, stages, store)
    }

    /// Validate a raw request and enqueue it.
    ///
    /// Returns as soon as the job is recorded as `pending`. Invalid requests
    /// are rejected and no job is created.
    pub fn submit(
        &self,
        owner_id: Option<OwnerId>,
        request: GenerationRequest,
    ) -> Result<JobId, CoreError> {
        let parameters = resolve(request)?;
        self.submit_parameters(owner_id, parameters)
    }

    /// Enqueue already-resolved parameters.
    pub fn submit_parameters(
        &self,
        owner_id: Option<OwnerId>,
        parameters: GenerationParameters,
    ) -> Result<JobId, CoreError> {
        if self.shutdown.is_cancelled() {
            return Err(CoreError::Conflict("Engine is shutting down".to_string()));
        }

        let job = Job::new(uuid::Uuid::new_v4(), owner_id, parameters);
        let job_id = job.id;
        self.ctx.registry.insert(job)?;

        if self.queue.send(job_id).is_err() {
            self.ctx.registry.cancel(job_id)?;
            return Err(CoreError::Internal("Job dispatcher is not running".to_string()));
        }

        tracing::info!(job_id = %job_id, owner_id = ?owner_id, "Job submitted");
        Ok(job_id)
    }

    /// Current snapshot of a job.
    pub fn status(&self, job_id: JobId) -> Result<Job, CoreError> {
        self.ctx.registry.snapshot(job_id)
    }

    /// Follow a job's progress, starting from its latest event.
    ///
    /// Finished jobs can be followed until they are evicted by retention.
    pub fn subscribe(&self, job_id: JobId) -> Result<ProgressSubscription, CoreError> {
        self.notifier
            .subscribe(job_id)
            .map_err(|NotifierError::NotFound(id)| CoreError::JobNotFound(id))
    }

    pub fn cancel(&self, job_id: JobId) -> Result<JobStatus, CoreError> {
        self.controller.cancel(job_id)
    }

    pub fn notifier(&self) -> &Arc<ProgressNotifier> {
        &self.notifier
    }

    pub fn pools(&self) -> &ResourcePools {
        &self.ctx.pools
    }

    /// Number of pipeline runs currently in flight.
    pub fn active_runs(&self) -> usize {
        self.ctx.runs.len()
    }

    /// Stop dispatching, cancel active runs and wait up to `grace` for them
    /// to unwind.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutdown.cancel();

        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Job dispatcher task failed");
            }
        }
        let handle = self
            .retention
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Job retention task failed");
            }
        }

        self.ctx.tasks.close();
        if tokio::time::timeout(grace, self.ctx.tasks.wait()).await.is_err() {
            tracing::warn!(
                remaining = self.ctx.tasks.len(),
                grace_secs = grace.as_secs(),
                "Pipeline runs still active after shutdown grace period",
            );
        }
        tracing::info!("Engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
