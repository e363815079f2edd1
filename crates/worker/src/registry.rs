//! In-memory job table and the only place job state is mutated.
//!
//! Every visible change to a job is published to the progress notifier
//! while the table lock is held, so event sequence numbers follow the order
//! in which the changes were applied.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use vidgen_core::error::CoreError;
use vidgen_core::job::{ArtifactRef, Job, JobError, JobStatus};
use vidgen_core::progress::ProgressEvent;
use vidgen_core::stage::{StageExecution, StageKind, StageStatus};
use vidgen_core::types::{JobId, Timestamp};
use vidgen_events::ProgressNotifier;

struct Entry {
    job: Job,
    /// Sequence number of the last published event.
    sequence: u64,
}

impl Entry {
    fn publish(&mut self, notifier: &ProgressNotifier) {
        self.sequence += 1;
        notifier.publish(ProgressEvent::from_job(&self.job, self.sequence));
    }
}

/// Shared job table.
pub struct JobRegistry {
    entries: Mutex<HashMap<JobId, Entry>>,
    notifier: Arc<ProgressNotifier>,
}

impl JobRegistry {
    pub fn new(notifier: Arc<ProgressNotifier>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            notifier,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<JobId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a freshly created `pending` job and publish its first event.
    pub fn insert(&self, job: Job) -> Result<(), CoreError> {
        let mut entries = self.entries();
        if entries.contains_key(&job.id) {
            return Err(CoreError::Conflict(format!("Job {} already exists", job.id)));
        }
        let id = job.id;
        let entry = entries.entry(id).or_insert(Entry { job, sequence: 0 });
        entry.publish(&self.notifier);
        Ok(())
    }

    pub fn snapshot(&self, id: JobId) -> Result<Job, CoreError> {
        self.entries()
            .get(&id)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| CoreError::JobNotFound(id))
    }

    pub fn status(&self, id: JobId) -> Result<JobStatus, CoreError> {
        self.entries()
            .get(&id)
            .map(|entry| entry.job.status)
            .ok_or_else(|| CoreError::JobNotFound(id))
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Atomically move a `pending` job to `processing` and open a fresh set
    /// of stage executions.
    ///
    /// Returns `None` if the job is no longer pending, e.g. it was cancelled
    /// while waiting for a slot.
    pub fn claim(&self, id: JobId) -> Result<Option<Job>, CoreError> {
        let mut entries = self.entries();
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| CoreError::JobNotFound(id))?;
        if entry.job.status != JobStatus::Pending {
            return Ok(None);
        }
        entry.job.start()?;
        entry.job.stages = StageKind::ALL.into_iter().map(StageExecution::new).collect();
        entry.publish(&self.notifier);
        Ok(Some(entry.job.clone()))
    }

    /// Record running progress. Changes to non-processing jobs are ignored.
    ///
    /// Returns whether an event was published.
    pub fn record_progress(&self, id: JobId, percentage: u8, step: &str) -> bool {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(&id) else {
            return false;
        };
        match entry.job.record_progress(percentage, step) {
            Ok(true) => {
                entry.publish(&self.notifier);
                true
            }
            Ok(false) | Err(_) => false,
        }
    }

    /// Apply `update` to one stage execution of a job.
    pub fn update_stage(&self, id: JobId, kind: StageKind, update: impl FnOnce(&mut StageExecution)) {
        let mut entries = self.entries();
        if let Some(exec) = entries
            .get_mut(&id)
            .and_then(|entry| entry.job.stage_mut(kind))
        {
            update(exec);
        }
    }

    pub fn stage_running(&self, id: JobId, kind: StageKind) {
        self.update_stage(id, kind, StageExecution::mark_running);
    }

    pub fn stage_progress(&self, id: JobId, kind: StageKind, fraction: f32) {
        self.update_stage(id, kind, |exec| exec.set_progress(fraction));
    }

    pub fn stage_finished(&self, id: JobId, kind: StageKind, status: StageStatus) {
        self.update_stage(id, kind, |exec| exec.finish(status));
    }

    /// `processing → completed`. Returns `false` if the job already reached
    /// a terminal state (a cancel won the race).
    pub fn complete(&self, id: JobId, artifact: ArtifactRef) -> Result<bool, CoreError> {
        self.finish(id, |job| job.complete(artifact))
    }

    /// `processing → failed`. Returns `false` if the job was already terminal.
    pub fn fail(&self, id: JobId, error: JobError) -> Result<bool, CoreError> {
        self.finish(id, |job| job.fail(error))
    }

    fn finish(
        &self,
        id: JobId,
        apply: impl FnOnce(&mut Job) -> Result<(), CoreError>,
    ) -> Result<bool, CoreError> {
        let mut entries = self.entries();
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| CoreError::JobNotFound(id))?;
        if entry.job.status.is_terminal() {
            return Ok(false);
        }
        apply(&mut entry.job)?;
        entry.publish(&self.notifier);
        Ok(true)
    }

    /// Cancel a live job.
    ///
    /// Returns the resulting status and whether this call performed the
    /// transition. Terminal jobs are returned unchanged.
    pub fn cancel(&self, id: JobId) -> Result<(JobStatus, bool), CoreError> {
        let mut entries = self.entries();
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| CoreError::JobNotFound(id))?;
        let (status, changed) = entry.job.cancel();
        if changed {
            for exec in entry.job.stages.iter_mut() {
                if matches!(exec.status, StageStatus::Pending | StageStatus::Running) {
                    exec.finish(StageStatus::Cancelled);
                }
            }
            entry.publish(&self.notifier);
        }
        Ok((status, changed))
    }

    /// Drop terminal jobs that finished before `cutoff`, along with their
    /// progress channels. Returns the evicted ids.
    pub fn evict_finished(&self, cutoff: Timestamp) -> Vec<JobId> {
        let mut entries = self.entries();
        let expired: Vec<JobId> = entries
            .values()
            .filter(|entry| entry.job.status.is_terminal())
            .filter(|entry| entry.job.completed_at.is_some_and(|at| at < cutoff))
            .map(|entry| entry.job.id)
            .collect();
        for id in &expired {
            entries.remove(id);
            self.notifier.forget(*id);
        }
        expired
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use vidgen_core::parameters::{resolve, GenerationRequest};

    use super::*;

    fn job() -> Job {
        let request = GenerationRequest {
            prompt: "paper boats in the rain".to_string(),
            negative_prompt: None,
            aspect_ratio: [1, 1],
            resolution: 512,
            fps: 8,
            video_length: 1,
            output_format: "mp4".to_string(),
            base_model: "sd15".to_string(),
            motion_adapter: None,
            inference_steps: Some(2),
            guidance_scale: None,
            seed: Some(3),
        };
        Job::new(uuid::Uuid::new_v4(), Some(1), resolve(request).unwrap())
    }

    fn registry() -> (JobRegistry, Arc<ProgressNotifier>) {
        let notifier = Arc::new(ProgressNotifier::default());
        (JobRegistry::new(Arc::clone(&notifier)), notifier)
    }

    fn artifact() -> ArtifactRef {
        ArtifactRef {
            uri: "memory://clip.mp4".to_string(),
            content_type: "video/mp4".to_string(),
            size_bytes: 10,
        }
    }

    #[test]
    fn insert_publishes_first_event() {
        let (registry, notifier) = registry();
        let job = job();
        let id = job.id;
        registry.insert(job).unwrap();
        let latest = notifier.latest(id).unwrap();
        assert_eq!(latest.sequence, 1);
        assert_eq!(latest.status, JobStatus::Pending);
        assert_eq!(latest.current_step, "Queued");
    }

    #[test]
    fn duplicate_insert_is_conflict() {
        let (registry, _) = registry();
        let job = job();
        registry.insert(job.clone()).unwrap();
        assert_matches!(registry.insert(job), Err(CoreError::Conflict(_)));
    }

    #[test]
    fn claim_opens_stage_executions() {
        let (registry, notifier) = registry();
        let job = job();
        let id = job.id;
        registry.insert(job).unwrap();

        let claimed = registry.claim(id).unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.stages.len(), 5);
        assert!(claimed.started_at.is_some());
        assert_eq!(notifier.latest(id).unwrap().sequence, 2);

        // a second claim finds the job no longer pending
        assert!(registry.claim(id).unwrap().is_none());
    }

    #[test]
    fn cancelled_job_cannot_be_claimed() {
        let (registry, _) = registry();
        let job = job();
        let id = job.id;
        registry.insert(job).unwrap();
        assert_eq!(registry.cancel(id).unwrap(), (JobStatus::Cancelled, true));
        assert!(registry.claim(id).unwrap().is_none());
    }

    #[test]
    fn progress_only_publishes_changes() {
        let (registry, notifier) = registry();
        let job = job();
        let id = job.id;
        registry.insert(job).unwrap();
        assert!(!registry.record_progress(id, 10, "Generating frames"));

        registry.claim(id).unwrap();
        assert!(registry.record_progress(id, 10, "Generating frames"));
        assert!(!registry.record_progress(id, 10, "Generating frames"));
        assert!(!registry.record_progress(id, 5, "Generating frames"));
        assert_eq!(notifier.latest(id).unwrap().progress_percentage, 10);
    }

    #[test]
    fn complete_after_cancel_is_ignored() {
        let (registry, notifier) = registry();
        let job = job();
        let id = job.id;
        registry.insert(job).unwrap();
        registry.claim(id).unwrap();
        registry.stage_running(id, StageKind::Generate);
        registry.cancel(id).unwrap();

        assert!(!registry.complete(id, artifact()).unwrap());
        let snapshot = registry.snapshot(id).unwrap();
        assert_eq!(snapshot.status, JobStatus::Cancelled);
        assert!(snapshot.artifact.is_none());
        assert_eq!(
            snapshot.stages[StageKind::Generate.index()].status,
            StageStatus::Cancelled
        );
        assert!(notifier.latest(id).unwrap().terminal);
    }

    #[test]
    fn repeated_cancel_is_noop() {
        let (registry, notifier) = registry();
        let job = job();
        let id = job.id;
        registry.insert(job).unwrap();
        registry.claim(id).unwrap();
        registry.complete(id, artifact()).unwrap();
        let before = notifier.latest(id).unwrap().sequence;

        assert_eq!(registry.cancel(id).unwrap(), (JobStatus::Completed, false));
        assert_eq!(notifier.latest(id).unwrap().sequence, before);
    }

    #[test]
    fn eviction_only_takes_jobs_finished_before_cutoff() {
        let (registry, notifier) = registry();
        let (done, live) = (job(), job());
        let (done_id, live_id) = (done.id, live.id);
        registry.insert(done).unwrap();
        registry.insert(live).unwrap();
        registry.claim(done_id).unwrap();
        registry.complete(done_id, artifact()).unwrap();
        registry.claim(live_id).unwrap();

        let finished_at = registry.snapshot(done_id).unwrap().completed_at.unwrap();
        assert!(registry.evict_finished(finished_at).is_empty());

        let evicted = registry.evict_finished(finished_at + chrono::Duration::seconds(1));
        assert_eq!(evicted, vec![done_id]);
        assert_matches!(registry.snapshot(done_id), Err(CoreError::JobNotFound(_)));
        assert!(notifier.latest(done_id).is_none());
        assert_eq!(registry.status(live_id).unwrap(), JobStatus::Processing);
        assert!(notifier.latest(live_id).is_some());
    }

    #[test]
    fn unknown_job_is_not_found() {
        let (registry, _) = registry();
        let id = uuid::Uuid::new_v4();
        assert_matches!(registry.snapshot(id), Err(CoreError::JobNotFound(_)));
        assert_matches!(registry.cancel(id), Err(CoreError::JobNotFound(_)));
        assert!(!registry.record_progress(id, 1, "x"));
    }
}
