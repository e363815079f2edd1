//! Background job dispatcher.
//!
//! Takes submitted job ids in FIFO order, waits for a slot in the first
//! stage's pool and hands the job to a new pipeline run. The claim
//! (`pending → processing`) happens only after the slot is held, so a job
//! cancelled while queued never starts a run.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vidgen_core::job::JobStatus;
use vidgen_core::stage::StageKind;
use vidgen_core::types::JobId;

use crate::runner::{run_pipeline, RunContext};

/// Outcome of one dispatch attempt.
#[derive(Debug, PartialEq, Eq)]
enum Dispatch {
    Started,
    Skipped,
    ShuttingDown,
}

/// Single long-lived task feeding queued jobs into pipeline runs.
pub(crate) struct JobDispatcher {
    ctx: Arc<RunContext>,
    queue: mpsc::UnboundedReceiver<JobId>,
}

impl JobDispatcher {
    pub fn new(ctx: Arc<RunContext>, queue: mpsc::UnboundedReceiver<JobId>) -> Self {
        Self { ctx, queue }
    }

    /// Run the dispatcher loop until the cancellation token is triggered.
    ///
    /// On shutdown every active run is cancelled, and so is every job that
    /// was still queued.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            cpu_slots = self.ctx.config.cpu_slots,
            gpu_slots = self.ctx.config.gpu_slots,
            "Job dispatcher started",
        );

        loop {
            let job_id = tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.queue.recv() => match next {
                    Some(job_id) => job_id,
                    None => break,
                },
            };

            if self.dispatch(job_id, &cancel).await == Dispatch::ShuttingDown {
                self.cancel_queued(job_id);
                break;
            }
        }

        let cancelled = self.ctx.runs.cancel_all();
        self.queue.close();
        let mut queued = 0;
        while let Ok(job_id) = self.queue.try_recv() {
            self.cancel_queued(job_id);
            queued += 1;
        }
        tracing::info!(
            active_runs = cancelled,
            queued_jobs = queued,
            "Job dispatcher shutting down",
        );
    }

    /// Cancel a job that never reached a pipeline run.
    fn cancel_queued(&self, job_id: JobId) {
        match self.ctx.registry.cancel(job_id) {
            Ok((_, true)) => tracing::info!(job_id = %job_id, "Queued job cancelled by shutdown"),
            Ok((_, false)) => {}
            Err(e) => tracing::error!(job_id = %job_id, error = %e, "Failed to cancel queued job"),
        }
    }

    async fn dispatch(&self, job_id: JobId, cancel: &CancellationToken) -> Dispatch {
        match self.ctx.registry.status(job_id) {
            Ok(JobStatus::Pending) => {}
            Ok(status) => {
                tracing::debug!(job_id = %job_id, status = %status, "Skipping job that is no longer pending");
                return Dispatch::Skipped;
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Queued job missing from registry");
                return Dispatch::Skipped;
            }
        }

        let class = StageKind::ALL[0].resource_class();
        let slot = tokio::select! {
            _ = cancel.cancelled() => return Dispatch::ShuttingDown,
            slot = self.ctx.pools.acquire(class) => slot,
        };
        let slot = match slot {
            Ok(slot) => slot,
            Err(e) => {
                tracing::error!(error = %e, "Slot pool unavailable");
                return Dispatch::ShuttingDown;
            }
        };

        // Register the run before claiming so a cancel that lands after the
        // claim always finds a token to trip.
        let token = match self.ctx.runs.register(job_id) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Refusing second run");
                return Dispatch::Skipped;
            }
        };

        match self.ctx.registry.claim(job_id) {
            Ok(Some(job)) => {
                tracing::info!(job_id = %job_id, resource_class = %class, "Job claimed");
                let ctx = Arc::clone(&self.ctx);
                self.ctx
                    .tasks
                    .spawn(run_pipeline(ctx, job, slot, token));
                Dispatch::Started
            }
            Ok(None) => {
                self.ctx.runs.remove(job_id);
                tracing::debug!(job_id = %job_id, "Job cancelled while waiting for a slot");
                Dispatch::Skipped
            }
            Err(e) => {
                self.ctx.runs.remove(job_id);
                tracing::error!(job_id = %job_id, error = %e, "Failed to claim job");
                Dispatch::Skipped
            }
        }
    }
}
