//! WebSocket message type constants for job progress events.
//!
//! Used by the API's progress socket when serializing
//! [`ProgressEvent`](crate::progress::ProgressEvent)s for clients.

/// Progress update during job execution (percentage + current step).
pub const MSG_TYPE_JOB_PROGRESS: &str = "job_progress";

/// Job completed successfully.
pub const MSG_TYPE_JOB_COMPLETED: &str = "job_completed";

/// Job failed with an error.
pub const MSG_TYPE_JOB_FAILED: &str = "job_failed";

/// Job was cancelled (by user or system).
pub const MSG_TYPE_JOB_CANCELLED: &str = "job_cancelled";

/// Subscription could not be served (unknown job id).
pub const MSG_TYPE_ERROR: &str = "error";
