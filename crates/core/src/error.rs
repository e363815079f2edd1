use crate::job::JobStatus;
use crate::types::JobId;

/// Failures surfaced by job bookkeeping and request resolution.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// No job with this id is known, or it has been evicted.
    #[error("Job {0} not found")]
    JobNotFound(JobId),

    /// The job's lifecycle does not allow this move.
    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// A generation request or engine setting was rejected.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
