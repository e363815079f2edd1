//! Drives one pipeline run: the job's stages in order, each under its
//! resource-class slot and duration budget, followed by artifact hand-off.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use vidgen_core::job::{Job, JobError, MAX_RUNNING_PROGRESS};
use vidgen_core::stage::StageStatus;
use vidgen_core::types::JobId;
use vidgen_pipeline::definition::{PipelineDefinition, StageSpec};
use vidgen_pipeline::stage::{StageData, StageError, StageProgress};
use vidgen_pipeline::StageSet;

use crate::artifacts::{store_with_retry, ArtifactStore};
use crate::config::EngineConfig;
use crate::registry::JobRegistry;
use crate::runs::ActiveRuns;
use crate::slots::{ResourcePools, SlotGuard};

/// `current_step` while the artifact is handed to storage.
pub const STEP_STORING: &str = "Storing artifact";

/// Everything a run needs, shared by the dispatcher and every run.
pub(crate) struct RunContext {
    pub config: EngineConfig,
    pub registry: Arc<JobRegistry>,
    pub pools: ResourcePools,
    pub runs: ActiveRuns,
    pub stages: StageSet,
    pub store: Arc<dyn ArtifactStore>,
    pub tasks: TaskTracker,
}

/// How a single stage ended.
enum StageOutcome {
    Completed(StageData),
    Cancelled,
    Failed(JobError),
}

/// Run `job` to a terminal state.
///
/// `first_slot` is the slot the dispatcher acquired for the first stage.
/// The run's entry in [`ActiveRuns`] is removed on every exit path.
pub(crate) async fn run_pipeline(
    ctx: Arc<RunContext>,
    job: Job,
    first_slot: SlotGuard,
    cancel: CancellationToken,
) {
    let job_id = job.id;
    tracing::info!(job_id = %job_id, name = %job.name, "Pipeline run started");

    drive(&ctx, job, first_slot, &cancel).await;

    // a shutdown trips the token without going through the cancellation
    // controller, so the job may still be live here
    if cancel.is_cancelled() {
        if let Ok((status, true)) = ctx.registry.cancel(job_id) {
            tracing::info!(job_id = %job_id, status = %status, "Run cancelled by shutdown");
        }
    }

    ctx.runs.remove(job_id);
    match ctx.registry.snapshot(job_id) {
        Ok(job) => tracing::info!(
            job_id = %job_id,
            status = %job.status,
            "Pipeline run finished",
        ),
        Err(e) => tracing::error!(job_id = %job_id, error = %e, "Pipeline run lost its job"),
    }
}

async fn drive(ctx: &RunContext, job: Job, first_slot: SlotGuard, cancel: &CancellationToken) {
    let job_id = job.id;
    let definition = match PipelineDefinition::build(
        &job.parameters,
        &ctx.config.stage_weights,
        &ctx.config.stage_timeouts,
    ) {
        Ok(definition) => definition,
        Err(e) => {
            fail(ctx, job_id, JobError::internal(e.to_string()));
            return;
        }
    };

    let mut held = Some(first_slot);
    let mut data = StageData::Parameters(job.parameters);

    for spec in definition.stages() {
        if cancel.is_cancelled() {
            ctx.registry
                .stage_finished(job_id, spec.kind, StageStatus::Cancelled);
            return;
        }

        if spec.skipped {
            ctx.registry
                .stage_finished(job_id, spec.kind, StageStatus::Skipped);
            ctx.registry
                .record_progress(job_id, spec.range.end, spec.kind.step_label());
            tracing::debug!(job_id = %job_id, stage = %spec.kind, "Stage skipped");
            continue;
        }

        let class = spec.kind.resource_class();
        let slot = match held.take() {
            Some(slot) if slot.class() == class => slot,
            other => {
                drop(other);
                let acquired = tokio::select! {
                    _ = cancel.cancelled() => None,
                    slot = ctx.pools.acquire(class) => Some(slot),
                };
                match acquired {
                    None => {
                        ctx.registry
                            .stage_finished(job_id, spec.kind, StageStatus::Cancelled);
                        return;
                    }
                    Some(Ok(slot)) => slot,
                    Some(Err(e)) => {
                        fail(ctx, job_id, JobError::internal(e.to_string()));
                        return;
                    }
                }
            }
        };

        match run_stage(ctx, job_id, spec, data, cancel).await {
            StageOutcome::Completed(output) => data = output,
            StageOutcome::Cancelled => return,
            StageOutcome::Failed(error) => {
                fail(ctx, job_id, error);
                return;
            }
        }
        drop(slot);
    }

    let media = match data {
        StageData::Media(media) => media,
        other => {
            fail(
                ctx,
                job_id,
                JobError::internal(format!("Pipeline ended with {}", other.kind_name())),
            );
            return;
        }
    };

    if cancel.is_cancelled() {
        return;
    }
    ctx.registry
        .record_progress(job_id, MAX_RUNNING_PROGRESS, STEP_STORING);

    let stored = store_with_retry(
        ctx.store.as_ref(),
        job_id,
        &media,
        ctx.config.store_retry_attempts,
        ctx.config.store_retry_backoff,
    )
    .await;

    match stored {
        Ok(artifact) => match ctx.registry.complete(job_id, artifact) {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(job_id = %job_id, "Job reached a terminal state before completion");
            }
            Err(e) => tracing::error!(job_id = %job_id, error = %e, "Failed to complete job"),
        },
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Artifact hand-off failed");
            fail(ctx, job_id, JobError::storage(e.to_string()));
        }
    }
}

async fn run_stage(
    ctx: &RunContext,
    job_id: JobId,
    spec: &StageSpec,
    input: StageData,
    cancel: &CancellationToken,
) -> StageOutcome {
    let kind = spec.kind;
    let label = kind.step_label();
    ctx.registry.stage_running(job_id, kind);
    ctx.registry
        .record_progress(job_id, spec.range.start, label);

    let registry = Arc::clone(&ctx.registry);
    let range = spec.range;
    let progress = StageProgress::new(move |fraction| {
        registry.stage_progress(job_id, kind, fraction);
        registry.record_progress(job_id, range.percentage_at(fraction), label);
    });

    let executor = ctx.stages.executor(kind);
    tracing::debug!(
        job_id = %job_id,
        stage = %kind,
        resource_class = %kind.resource_class(),
        timeout_secs = spec.timeout.as_secs(),
        "Stage started",
    );

    let result = tokio::time::timeout(
        spec.timeout,
        executor.execute(input, &spec.config, &progress, cancel),
    )
    .await;

    match result {
        Ok(Ok(output)) => {
            ctx.registry
                .stage_finished(job_id, kind, StageStatus::Succeeded);
            ctx.registry.record_progress(job_id, range.end, label);
            tracing::debug!(job_id = %job_id, stage = %kind, "Stage succeeded");
            StageOutcome::Completed(output)
        }
        Ok(Err(StageError::Cancelled)) => {
            ctx.registry
                .stage_finished(job_id, kind, StageStatus::Cancelled);
            tracing::info!(job_id = %job_id, stage = %kind, "Stage cancelled");
            StageOutcome::Cancelled
        }
        Ok(Err(_)) if cancel.is_cancelled() => {
            ctx.registry
                .stage_finished(job_id, kind, StageStatus::Cancelled);
            StageOutcome::Cancelled
        }
        Ok(Err(e)) => {
            ctx.registry.stage_finished(job_id, kind, StageStatus::Failed);
            tracing::warn!(job_id = %job_id, stage = %kind, error = %e, "Stage failed");
            StageOutcome::Failed(JobError::stage_failure(kind, e.to_string()))
        }
        Err(_elapsed) => {
            ctx.registry.stage_finished(job_id, kind, StageStatus::Failed);
            tracing::warn!(
                job_id = %job_id,
                stage = %kind,
                timeout_secs = spec.timeout.as_secs(),
                "Stage timed out",
            );
            StageOutcome::Failed(JobError::timeout(kind, spec.timeout.as_secs()))
        }
    }
}

fn fail(ctx: &RunContext, job_id: JobId, error: JobError) {
    match ctx.registry.fail(job_id, error) {
        Ok(true) => tracing::warn!(job_id = %job_id, "Job failed"),
        Ok(false) => {}
        Err(e) => tracing::error!(job_id = %job_id, error = %e, "Failed to record job failure"),
    }
}
