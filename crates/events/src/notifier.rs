//! Per-job progress fan-out backed by `tokio::sync::broadcast` channels.
//!
//! Every job gets its own channel plus a copy of the latest event. A new
//! subscriber first receives that latest event and then every newer one in
//! sequence order, so late subscribers never wait for the next change to
//! learn where a job stands.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use vidgen_core::progress::ProgressEvent;
use vidgen_core::types::JobId;

/// Default buffer capacity of each job's broadcast channel.
const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NotifierError {
    #[error("No progress channel for job {0}")]
    NotFound(JobId),
}

// ---------------------------------------------------------------------------
// ProgressNotifier
// ---------------------------------------------------------------------------

struct JobChannel {
    sender: broadcast::Sender<ProgressEvent>,
    latest: Arc<Mutex<ProgressEvent>>,
}

/// Fan-out hub for job progress events.
///
/// Designed to be shared via `Arc<ProgressNotifier>`. Publishers are
/// expected to emit events for a job in sequence order; stale or duplicate
/// sequences are filtered on the subscriber side.
pub struct ProgressNotifier {
    channels: Mutex<HashMap<JobId, JobChannel>>,
    capacity: usize,
}

impl ProgressNotifier {
    /// Create a notifier whose per-job channels buffer `capacity` events.
    ///
    /// Subscribers that fall further behind observe a lag and skip ahead to
    /// the latest event.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<JobId, JobChannel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish an event to every current subscriber of its job.
    ///
    /// The first event for a job opens its channel.
    pub fn publish(&self, event: ProgressEvent) {
        let mut channels = self.channels();
        let channel = channels.entry(event.job_id).or_insert_with(|| {
            let (sender, _) = broadcast::channel(self.capacity);
            JobChannel {
                sender,
                latest: Arc::new(Mutex::new(event.clone())),
            }
        });

        {
            let mut latest = channel.latest.lock().unwrap_or_else(PoisonError::into_inner);
            if event.sequence < latest.sequence {
                tracing::warn!(
                    job_id = %event.job_id,
                    sequence = event.sequence,
                    latest = latest.sequence,
                    "Dropping out-of-order progress event",
                );
                return;
            }
            *latest = event.clone();
        }

        // A send error only means nobody is listening right now.
        let _ = channel.sender.send(event);
    }

    /// Subscribe to a job's progress.
    ///
    /// The subscription yields the latest event first. Unknown jobs are
    /// reported as [`NotifierError::NotFound`].
    pub fn subscribe(&self, job_id: JobId) -> Result<ProgressSubscription, NotifierError> {
        let channels = self.channels();
        let channel = channels
            .get(&job_id)
            .ok_or(NotifierError::NotFound(job_id))?;

        let receiver = channel.sender.subscribe();
        let snapshot = channel
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        Ok(ProgressSubscription {
            job_id,
            pending: Some(snapshot),
            receiver,
            latest: Arc::clone(&channel.latest),
            last_sequence: 0,
            finished: false,
        })
    }

    /// Latest event published for `job_id`.
    pub fn latest(&self, job_id: JobId) -> Option<ProgressEvent> {
        self.channels().get(&job_id).map(|channel| {
            channel
                .latest
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        })
    }

    /// Drop a job's channel. Open subscriptions drain and then end.
    pub fn forget(&self, job_id: JobId) -> bool {
        self.channels().remove(&job_id).is_some()
    }

    /// Number of live subscribers for `job_id`.
    pub fn subscriber_count(&self, job_id: JobId) -> usize {
        self.channels()
            .get(&job_id)
            .map(|channel| channel.sender.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for ProgressNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// ProgressSubscription
// ---------------------------------------------------------------------------

/// Ordered view of one job's progress.
///
/// Sequences strictly increase across everything a subscription yields, and
/// it ends right after the job's final event.
pub struct ProgressSubscription {
    job_id: JobId,
    pending: Option<ProgressEvent>,
    receiver: broadcast::Receiver<ProgressEvent>,
    latest: Arc<Mutex<ProgressEvent>>,
    last_sequence: u64,
    finished: bool,
}

impl std::fmt::Debug for ProgressSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSubscription")
            .field("job_id", &self.job_id)
            .field("last_sequence", &self.last_sequence)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl ProgressSubscription {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Next event, or `None` once the final event has been delivered.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if self.finished {
            return None;
        }
        if let Some(snapshot) = self.pending.take() {
            return Some(self.accept(snapshot));
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) if event.sequence <= self.last_sequence => continue,
                Ok(event) => return Some(self.accept(event)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(job_id = %self.job_id, skipped, "Progress subscriber lagged");
                    if let Some(event) = self.newer_snapshot() {
                        return Some(self.accept(event));
                    }
                }
                Err(RecvError::Closed) => {
                    let event = self.newer_snapshot();
                    match event {
                        Some(event) => return Some(self.accept(event)),
                        None => {
                            self.finished = true;
                            return None;
                        }
                    }
                }
            }
        }
    }

    /// Adapt the subscription into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            let event = sub.next().await?;
            Some((event, sub))
        })
    }

    fn newer_snapshot(&self) -> Option<ProgressEvent> {
        let latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        (latest.sequence > self.last_sequence).then(|| latest.clone())
    }

    fn accept(&mut self, event: ProgressEvent) -> ProgressEvent {
        self.last_sequence = event.sequence;
        if event.terminal {
            self.finished = true;
        }
        event
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
