//! Periodic eviction of finished jobs.
//!
//! Terminal jobs stay queryable (status and a single final progress event)
//! for `job_retention`, then the registry entry and the job's progress
//! channel are dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::registry::JobRegistry;

/// Run the retention loop until `cancel` is triggered.
pub(crate) async fn run(
    registry: Arc<JobRegistry>,
    retention: Duration,
    every: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        retention_secs = retention.as_secs(),
        interval_secs = every.as_secs(),
        "Job retention task started",
    );

    let retention = match chrono::Duration::from_std(retention) {
        Ok(retention) => retention,
        Err(e) => {
            tracing::error!(error = %e, "Job retention period out of range");
            return;
        }
    };
    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job retention task stopping");
                break;
            }
            _ = interval.tick() => {
                let evicted = registry.evict_finished(Utc::now() - retention);
                if evicted.is_empty() {
                    tracing::debug!("Job retention: nothing to evict");
                } else {
                    tracing::info!(evicted = evicted.len(), "Job retention: evicted finished jobs");
                }
            }
        }
    }
}
