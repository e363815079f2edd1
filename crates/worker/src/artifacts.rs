//! Hand-off of finished media to durable storage.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use vidgen_core::job::ArtifactRef;
use vidgen_core::types::JobId;
use vidgen_pipeline::stage::MediaArtifact;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Temporary outage; the write may succeed if retried.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// The store refused the artifact; retrying will not help.
    #[error("Artifact rejected: {0}")]
    Rejected(String),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Io(_) | StorageError::Unavailable(_))
    }
}

/// Durable destination for finished media.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn store(&self, job_id: JobId, artifact: &MediaArtifact)
        -> Result<ArtifactRef, StorageError>;
}

/// Store `artifact`, retrying transient failures up to `attempts` times in
/// total with a fixed `backoff` between tries.
pub async fn store_with_retry(
    store: &dyn ArtifactStore,
    job_id: JobId,
    artifact: &MediaArtifact,
    attempts: u32,
    backoff: Duration,
) -> Result<ArtifactRef, StorageError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match store.store(job_id, artifact).await {
            Ok(stored) => return Ok(stored),
            Err(e) if e.is_transient() && attempt < attempts => {
                tracing::warn!(
                    job_id = %job_id,
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    "Artifact store failed, retrying",
                );
                attempt += 1;
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// LocalArtifactStore
// ---------------------------------------------------------------------------

/// Writes artifacts to `{root}/{job_id}/{file_name}`.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn store(
        &self,
        job_id: JobId,
        artifact: &MediaArtifact,
    ) -> Result<ArtifactRef, StorageError> {
        if artifact.file_name.contains(['/', '\\']) || artifact.file_name.starts_with('.') {
            return Err(StorageError::Rejected(format!(
                "Unsafe file name '{}'",
                artifact.file_name
            )));
        }

        let dir = self.root.join(job_id.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(&artifact.file_name);
        tokio::fs::write(&path, &artifact.bytes).await?;

        tracing::info!(
            job_id = %job_id,
            path = %path.display(),
            size_bytes = artifact.bytes.len(),
            "Artifact stored",
        );

        Ok(ArtifactRef {
            uri: format!("file://{}", path.display()),
            content_type: artifact.content_type().to_string(),
            size_bytes: artifact.bytes.len() as u64,
        })
    }
}

// ---------------------------------------------------------------------------
// InMemoryArtifactStore
// ---------------------------------------------------------------------------

/// Keeps artifacts in memory. Can be told to fail a number of times first.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    transient_failures: AtomicU32,
    reject_all: bool,
    calls: AtomicU32,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report [`StorageError::Unavailable`] for the first `failures` calls.
    pub fn failing(failures: u32) -> Self {
        Self {
            transient_failures: AtomicU32::new(failures),
            ..Self::default()
        }
    }

    /// Reject every artifact.
    pub fn rejecting() -> Self {
        Self {
            reject_all: true,
            ..Self::default()
        }
    }

    pub fn get(&self, uri: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uri)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of store calls received, failed ones included.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn store(
        &self,
        job_id: JobId,
        artifact: &MediaArtifact,
    ) -> Result<ArtifactRef, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_all {
            return Err(StorageError::Rejected("store is read-only".to_string()));
        }
        let failed = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StorageError::Unavailable("simulated outage".to_string()));
        }

        let uri = format!("memory://{job_id}/{}", artifact.file_name);
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uri.clone(), artifact.bytes.clone());
        Ok(ArtifactRef {
            uri,
            content_type: artifact.content_type().to_string(),
            size_bytes: artifact.bytes.len() as u64,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
