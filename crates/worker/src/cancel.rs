use std::sync::Arc;

use vidgen_core::error::CoreError;
use vidgen_core::job::JobStatus;
use vidgen_core::types::JobId;

use crate::registry::JobRegistry;
use crate::runner::RunContext;

/// Turns cancel requests into job transitions and run-token trips.
///
/// The job is moved to `cancelled` before the run's token is tripped, so
/// the terminal event is published before the stage unwinds.
pub struct CancellationController {
    ctx: Arc<RunContext>,
}

impl CancellationController {
    pub(crate) fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }

    fn registry(&self) -> &JobRegistry {
        &self.ctx.registry
    }

    /// Cancel `job_id`.
    ///
    /// Idempotent: terminal jobs report their existing status. Unknown ids
    /// are [`CoreError::JobNotFound`].
    pub fn cancel(&self, job_id: JobId) -> Result<JobStatus, CoreError> {
        let (status, changed) = self.registry().cancel(job_id)?;
        if !changed {
            tracing::debug!(job_id = %job_id, status = %status, "Cancel on finished job ignored");
            return Ok(status);
        }

        if self.ctx.runs.cancel(job_id) {
            tracing::info!(job_id = %job_id, "Running job cancelled");
        } else {
            tracing::info!(job_id = %job_id, "Pending job cancelled");
        }
        Ok(status)
    }
}
