//! Job record and lifecycle state machine.
//!
//! ```text
//! pending ──> processing ──> completed
//!    │             ├───────> failed
//!    │             └───────> cancelled
//!    └───────────────────────> cancelled
//! ```
//!
//! Terminal states are final. Every mutator checks the transition and
//! returns [`CoreError::Conflict`] instead of silently overwriting state, so
//! the record's invariants hold no matter which component races to close it:
//!
//! - `completed_at` is set iff the status is terminal.
//! - `progress_percentage == 100` iff the status is `completed`.
//! - `artifact` is set iff the status is `completed`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::parameters::GenerationParameters;
use crate::stage::{StageExecution, StageKind};
use crate::types::{JobId, OwnerId, Timestamp};

/// Highest percentage a job may report before it is completed.
pub const MAX_RUNNING_PROGRESS: u8 = 99;

/// Job names longer than this are truncated with an ellipsis.
const MAX_NAME_LEN: usize = 50;

/// `current_step` shown for a job waiting in the queue.
pub const STEP_QUEUED: &str = "Queued";
/// `current_step` shown once the artifact has been stored.
pub const STEP_COMPLETED: &str = "Completed";
/// `current_step` shown after a failure.
pub const STEP_FAILED: &str = "Failed";
/// `current_step` shown after cancellation.
pub const STEP_CANCELLED: &str = "Cancelled";

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Failure cause / artifact reference
// ---------------------------------------------------------------------------

/// Short failure category exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The stage executor returned an error.
    StageFailure,
    /// The stage exceeded its duration budget.
    Timeout,
    /// The artifact could not be handed off to storage.
    Storage,
    /// Anything the orchestrator itself could not recover from.
    Internal,
}

/// Structured failure cause recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    /// Stage that failed, if the failure happened inside a stage.
    pub stage: Option<StageKind>,
    pub category: ErrorCategory,
    pub message: String,
}

impl JobError {
    pub fn stage_failure(stage: StageKind, message: impl Into<String>) -> Self {
        Self {
            stage: Some(stage),
            category: ErrorCategory::StageFailure,
            message: message.into(),
        }
    }

    pub fn timeout(stage: StageKind, budget_secs: u64) -> Self {
        Self {
            stage: Some(stage),
            category: ErrorCategory::Timeout,
            message: format!("{stage} exceeded its {budget_secs}s budget"),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self {
            stage: Some(StageKind::Postprocess),
            category: ErrorCategory::Storage,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            stage: None,
            category: ErrorCategory::Internal,
            message: message.into(),
        }
    }
}

/// Durable reference returned by the artifact persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub uri: String,
    pub content_type: String,
    pub size_bytes: u64,
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One generation request and its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub owner_id: Option<OwnerId>,
    /// Display name derived from the prompt.
    pub name: String,
    pub status: JobStatus,
    pub progress_percentage: u8,
    pub current_step: String,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub error: Option<JobError>,
    pub parameters: GenerationParameters,
    pub artifact: Option<ArtifactRef>,
    /// Stage executions of the current (or last) pipeline run.
    pub stages: Vec<StageExecution>,
}

impl Job {
    /// Create a new job in `pending`.
    pub fn new(id: JobId, owner_id: Option<OwnerId>, parameters: GenerationParameters) -> Self {
        Self {
            id,
            owner_id,
            name: job_name_from_prompt(&parameters.prompt),
            status: JobStatus::Pending,
            progress_percentage: 0,
            current_step: STEP_QUEUED.to_string(),
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            parameters,
            artifact: None,
            stages: Vec::new(),
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(chrono::Utc::now());
        }
        Ok(())
    }

    /// `pending → processing`. Entered exactly once per successful dispatch.
    pub fn start(&mut self) -> Result<(), CoreError> {
        self.transition(JobStatus::Processing)?;
        self.started_at = Some(chrono::Utc::now());
        Ok(())
    }

    /// Record running progress.
    ///
    /// The percentage never decreases and is capped at
    /// [`MAX_RUNNING_PROGRESS`]. Returns `true` if anything visible changed.
    pub fn record_progress(&mut self, percentage: u8, step: &str) -> Result<bool, CoreError> {
        if self.status != JobStatus::Processing {
            return Err(CoreError::Conflict(format!(
                "Job {} is {}, not processing",
                self.id, self.status
            )));
        }
        let percentage = percentage.min(MAX_RUNNING_PROGRESS).max(self.progress_percentage);
        let changed = percentage != self.progress_percentage || step != self.current_step;
        self.progress_percentage = percentage;
        if step != self.current_step {
            self.current_step = step.to_string();
        }
        Ok(changed)
    }

    /// `processing → completed` with the stored artifact.
    pub fn complete(&mut self, artifact: ArtifactRef) -> Result<(), CoreError> {
        self.transition(JobStatus::Completed)?;
        self.progress_percentage = 100;
        self.current_step = STEP_COMPLETED.to_string();
        self.artifact = Some(artifact);
        Ok(())
    }

    /// `processing → failed` with a recorded cause.
    pub fn fail(&mut self, error: JobError) -> Result<(), CoreError> {
        self.transition(JobStatus::Failed)?;
        self.current_step = STEP_FAILED.to_string();
        self.error = Some(error);
        Ok(())
    }

    /// Cancel the job if it is still live.
    ///
    /// Idempotent: a terminal job is left untouched. Returns the resulting
    /// status and whether this call performed the transition.
    pub fn cancel(&mut self) -> (JobStatus, bool) {
        if self.status.is_terminal() {
            return (self.status, false);
        }
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(chrono::Utc::now());
        self.current_step = STEP_CANCELLED.to_string();
        (self.status, true)
    }

    pub fn stage_mut(&mut self, kind: StageKind) -> Option<&mut StageExecution> {
        self.stages.iter_mut().find(|exec| exec.stage == kind)
    }
}

/// Derive a display name from the prompt, truncating long prompts to 50
/// characters (47 + `...`).
pub fn job_name_from_prompt(prompt: &str) -> String {
    let prompt = prompt.trim();
    if prompt.chars().count() > MAX_NAME_LEN {
        let head: String = prompt.chars().take(MAX_NAME_LEN - 3).collect();
        format!("{head}...")
    } else {
        prompt.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::{
        AspectRatio, BaseModel, MotionAdapter, OutputFormat, ResolutionClass,
    };

    fn params() -> GenerationParameters {
        GenerationParameters {
            prompt: "a red fox running through snow".to_string(),
            negative_prompt: None,
            aspect_ratio: AspectRatio::Square,
            resolution: ResolutionClass::P512,
            width: 512,
            height: 512,
            fps: 8,
            video_length: 2,
            output_format: OutputFormat::Gif,
            base_model: BaseModel::Sd15,
            motion_adapter: MotionAdapter::Default,
            inference_steps: 4,
            guidance_scale: 7.5,
            seed: 1,
        }
    }

    fn job() -> Job {
        Job::new(uuid::Uuid::new_v4(), Some(7), params())
    }

    fn artifact() -> ArtifactRef {
        ArtifactRef {
            uri: "file:///tmp/out.gif".to_string(),
            content_type: "image/gif".to_string(),
            size_bytes: 10,
        }
    }

    fn assert_invariants(job: &Job) {
        assert_eq!(job.completed_at.is_some(), job.status.is_terminal());
        assert_eq!(job.progress_percentage == 100, job.status == JobStatus::Completed);
        assert_eq!(job.artifact.is_some(), job.status == JobStatus::Completed);
    }

    // -- transitions --

    #[test]
    fn new_job_is_pending() {
        let job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.current_step, STEP_QUEUED);
        assert_invariants(&job);
    }

    #[test]
    fn happy_path_reaches_completed() {
        let mut job = job();
        job.start().unwrap();
        assert!(job.started_at.is_some());
        job.record_progress(40, "Generating frames").unwrap();
        job.complete(artifact()).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress_percentage, 100);
        assert_invariants(&job);
    }

    #[test]
    fn cannot_complete_from_pending() {
        let mut job = job();
        let result = job.complete(artifact());
        assert!(matches!(
            result,
            Err(CoreError::InvalidTransition {
                from: JobStatus::Pending,
                to: JobStatus::Completed,
                ..
            })
        ));
        assert_invariants(&job);
    }

    #[test]
    fn start_only_once() {
        let mut job = job();
        job.start().unwrap();
        assert!(job.start().is_err());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut job = job();
        job.start().unwrap();
        job.fail(JobError::stage_failure(StageKind::Generate, "out of memory"))
            .unwrap();
        assert!(job.complete(artifact()).is_err());
        assert!(job.start().is_err());
        assert_eq!(job.cancel(), (JobStatus::Failed, false));
        assert_invariants(&job);
    }

    #[test]
    fn transition_table() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Pending));
        for terminal in [Completed, Failed, Cancelled] {
            for next in [Pending, Processing, Completed, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    // -- cancellation --

    #[test]
    fn cancel_pending_sets_completed_at() {
        let mut job = job();
        assert_eq!(job.cancel(), (JobStatus::Cancelled, true));
        assert_invariants(&job);
        assert_eq!(job.cancel(), (JobStatus::Cancelled, false));
    }

    #[test]
    fn cancel_processing_keeps_progress_below_100() {
        let mut job = job();
        job.start().unwrap();
        job.record_progress(60, "Upscaling frames").unwrap();
        job.cancel();
        assert_eq!(job.progress_percentage, 60);
        assert_invariants(&job);
    }

    // -- progress --

    #[test]
    fn progress_is_monotonic_and_capped() {
        let mut job = job();
        job.start().unwrap();
        assert!(job.record_progress(30, "Generating frames").unwrap());
        assert!(!job.record_progress(10, "Generating frames").unwrap());
        assert_eq!(job.progress_percentage, 30);
        job.record_progress(100, "Encoding").unwrap();
        assert_eq!(job.progress_percentage, MAX_RUNNING_PROGRESS);
    }

    #[test]
    fn progress_rejected_outside_processing() {
        let mut job = job();
        assert!(job.record_progress(10, "x").is_err());
    }

    // -- naming --

    #[test]
    fn long_prompt_is_truncated() {
        let name = job_name_from_prompt(&"x".repeat(80));
        assert_eq!(name.chars().count(), 50);
        assert!(name.ends_with("..."));
        assert_eq!(job_name_from_prompt("short"), "short");
    }
}
