#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use vidgen_core::job::{Job, JobStatus};
use vidgen_core::parameters::{resolve, GenerationParameters, GenerationRequest};
use vidgen_core::stage::StageKind;
use vidgen_core::types::JobId;
use vidgen_pipeline::stage::{pace, StageConfig, StageData, StageError, StageExecutor, StageProgress};
use vidgen_pipeline::StageSet;
use vidgen_worker::{Engine, EngineConfig};

/// Engine configuration with no simulated latency.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        cpu_slots: 4,
        gpu_slots: 1,
        checkpoint_delay: Duration::ZERO,
        store_retry_backoff: Duration::ZERO,
        ..EngineConfig::default()
    }
}

pub fn reference_stages() -> StageSet {
    StageSet::reference(Duration::ZERO)
}

pub fn request(resolution: u32, fps: u32, video_length: u32) -> GenerationRequest {
    GenerationRequest {
        prompt: "a lighthouse in a storm".to_string(),
        negative_prompt: None,
        aspect_ratio: [1, 1],
        resolution,
        fps,
        video_length,
        output_format: "mp4".to_string(),
        base_model: "sd15".to_string(),
        motion_adapter: None,
        inference_steps: Some(4),
        guidance_scale: None,
        seed: Some(99),
    }
}

pub fn parameters(resolution: u32, fps: u32, video_length: u32) -> GenerationParameters {
    resolve(request(resolution, fps, video_length)).unwrap()
}

/// Poll until `predicate` holds for the job, or panic after `timeout`.
pub async fn wait_for(
    engine: &Engine,
    job_id: JobId,
    timeout: Duration,
    predicate: impl Fn(&Job) -> bool,
) -> Job {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = engine.status(job_id).unwrap();
        if predicate(&job) {
            return job;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("job {job_id} never reached the expected state; last seen {job:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_terminal(engine: &Engine, job_id: JobId) -> Job {
    wait_for(engine, job_id, Duration::from_secs(10), |job| {
        job.status.is_terminal()
    })
    .await
}

pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn is_status(status: JobStatus) -> impl Fn(&Job) -> bool {
    move |job: &Job| job.status == status
}

// ---------------------------------------------------------------------------
// Scripted executors
// ---------------------------------------------------------------------------

/// Shared counters for a group of tracked executors.
#[derive(Default)]
pub struct Tracker {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl Tracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(self: &Arc<Self>) -> InFlight {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(Arc::clone(self))
    }
}

struct InFlight(Arc<Tracker>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Wraps a reference executor, holding it for `delay` first and counting
/// concurrent executions.
pub struct Tracked {
    inner: Arc<dyn StageExecutor>,
    delay: Duration,
    tracker: Arc<Tracker>,
}

impl Tracked {
    pub fn wrap(kind: StageKind, delay: Duration, tracker: &Arc<Tracker>) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::clone(reference_stages().executor(kind)),
            delay,
            tracker: Arc::clone(tracker),
        })
    }
}

#[async_trait]
impl StageExecutor for Tracked {
    fn kind(&self) -> StageKind {
        self.inner.kind()
    }

    async fn execute(
        &self,
        input: StageData,
        config: &StageConfig,
        progress: &StageProgress,
        cancel: &CancellationToken,
    ) -> Result<StageData, StageError> {
        let _in_flight = self.tracker.enter();
        pace(self.delay, cancel).await?;
        self.inner.execute(input, config, progress, cancel).await
    }
}

/// Always fails with the given message.
pub struct Failing(pub StageKind);

#[async_trait]
impl StageExecutor for Failing {
    fn kind(&self) -> StageKind {
        self.0
    }

    async fn execute(
        &self,
        _input: StageData,
        _config: &StageConfig,
        progress: &StageProgress,
        _cancel: &CancellationToken,
    ) -> Result<StageData, StageError> {
        progress.report(0.5);
        Err(StageError::Failed("model weights unavailable".to_string()))
    }
}

/// Ignores cancellation and never finishes in time.
pub struct Stalled(pub StageKind);

#[async_trait]
impl StageExecutor for Stalled {
    fn kind(&self) -> StageKind {
        self.0
    }

    async fn execute(
        &self,
        _input: StageData,
        _config: &StageConfig,
        _progress: &StageProgress,
        _cancel: &CancellationToken,
    ) -> Result<StageData, StageError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(StageError::Failed("unreachable".to_string()))
    }
}

/// Holds for `delay` without observing cancellation, then runs the
/// reference executor to completion.
pub struct Uninterruptible {
    inner: Arc<dyn StageExecutor>,
    delay: Duration,
    tracker: Arc<Tracker>,
}

impl Uninterruptible {
    pub fn wrap(kind: StageKind, delay: Duration, tracker: &Arc<Tracker>) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::clone(reference_stages().executor(kind)),
            delay,
            tracker: Arc::clone(tracker),
        })
    }
}

#[async_trait]
impl StageExecutor for Uninterruptible {
    fn kind(&self) -> StageKind {
        self.inner.kind()
    }

    async fn execute(
        &self,
        input: StageData,
        config: &StageConfig,
        progress: &StageProgress,
        _cancel: &CancellationToken,
    ) -> Result<StageData, StageError> {
        let _in_flight = self.tracker.enter();
        tokio::time::sleep(self.delay).await;
        self.inner
            .execute(input, config, progress, &CancellationToken::new())
            .await
    }
}

/// Drain a subscription and return its last event.
pub async fn last_event(
    mut subscription: vidgen_events::ProgressSubscription,
) -> vidgen_core::progress::ProgressEvent {
    let drain = async {
        let mut last = None;
        while let Some(event) = subscription.next().await {
            last = Some(event);
        }
        last
    };
    tokio::time::timeout(Duration::from_secs(10), drain)
        .await
        .expect("subscription never ended")
        .expect("subscription yielded no events")
}
