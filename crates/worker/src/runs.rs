//! Cancellation tokens of active pipeline runs, at most one per job.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use vidgen_core::error::CoreError;
use vidgen_core::types::JobId;

#[derive(Default)]
pub struct ActiveRuns {
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
}

impl ActiveRuns {
    pub fn new() -> Self {
        Self::default()
    }

    fn tokens(&self) -> MutexGuard<'_, HashMap<JobId, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a run for `job_id`. Fails if one is already active.
    pub fn register(&self, job_id: JobId) -> Result<CancellationToken, CoreError> {
        let mut tokens = self.tokens();
        if tokens.contains_key(&job_id) {
            return Err(CoreError::Conflict(format!(
                "Job {job_id} already has an active pipeline run"
            )));
        }
        let token = CancellationToken::new();
        tokens.insert(job_id, token.clone());
        Ok(token)
    }

    /// Trip the run's token. Returns `false` if no run is active.
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.tokens().get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, job_id: JobId) {
        self.tokens().remove(&job_id);
    }

    /// Trip every active run's token. Returns how many were tripped.
    pub fn cancel_all(&self) -> usize {
        let tokens = self.tokens();
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }

    pub fn is_active(&self, job_id: JobId) -> bool {
        self.tokens().contains_key(&job_id)
    }

    pub fn len(&self) -> usize {
        self.tokens().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens().is_empty()
    }
}
