//! Progress events describing a job's current stage and completion.

use serde::{Deserialize, Serialize};

use crate::job::{Job, JobError, JobStatus};
use crate::job_events::{
    MSG_TYPE_JOB_CANCELLED, MSG_TYPE_JOB_COMPLETED, MSG_TYPE_JOB_FAILED, MSG_TYPE_JOB_PROGRESS,
};
use crate::types::{JobId, Timestamp};

/// A timestamped, sequenced update for one job.
///
/// Sequence numbers start at 1 and increase by one for every event the job
/// emits. Consumers never mutate events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub sequence: u64,
    pub status: JobStatus,
    pub progress_percentage: u8,
    pub current_step: String,
    /// Set on the last event a job will ever emit.
    #[serde(rename = "final")]
    pub terminal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub timestamp: Timestamp,
}

impl ProgressEvent {
    /// Snapshot the visible state of `job` as event number `sequence`.
    pub fn from_job(job: &Job, sequence: u64) -> Self {
        Self {
            job_id: job.id,
            sequence,
            status: job.status,
            progress_percentage: job.progress_percentage,
            current_step: job.current_step.clone(),
            terminal: job.status.is_terminal(),
            error: job.error.clone(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// WebSocket message type for this event.
    pub fn message_type(&self) -> &'static str {
        match self.status {
            JobStatus::Completed => MSG_TYPE_JOB_COMPLETED,
            JobStatus::Failed => MSG_TYPE_JOB_FAILED,
            JobStatus::Cancelled => MSG_TYPE_JOB_CANCELLED,
            JobStatus::Pending | JobStatus::Processing => MSG_TYPE_JOB_PROGRESS,
        }
    }
}
