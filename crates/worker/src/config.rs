use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use vidgen_core::error::CoreError;
use vidgen_pipeline::definition::{StageTimeouts, StageWeights};

/// Orchestrator configuration.
///
/// Defaults suit a single-GPU development machine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Concurrent CPU-bound stages (default: `4`).
    pub cpu_slots: usize,
    /// Concurrent GPU-bound stages (default: `1`).
    pub gpu_slots: usize,
    /// Root directory for stored artifacts (default: `outputs`).
    pub artifact_dir: PathBuf,
    pub stage_weights: StageWeights,
    pub stage_timeouts: StageTimeouts,
    /// Store attempts per artifact before the job fails (default: `3`).
    pub store_retry_attempts: u32,
    /// Pause between store attempts (default: `200ms`).
    pub store_retry_backoff: Duration,
    /// Simulated work between reference-executor checkpoints (default: `50ms`).
    pub checkpoint_delay: Duration,
    /// Per-job progress channel buffer (default: `64`).
    pub progress_buffer: usize,
    /// How long a finished job stays queryable (default: `1h`).
    pub job_retention: Duration,
    /// Period of the finished-job sweep (default: `60s`).
    pub retention_sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cpu_slots: 4,
            gpu_slots: 1,
            artifact_dir: PathBuf::from("outputs"),
            stage_weights: StageWeights::default(),
            stage_timeouts: StageTimeouts::default(),
            store_retry_attempts: 3,
            store_retry_backoff: Duration::from_millis(200),
            checkpoint_delay: Duration::from_millis(50),
            progress_buffer: 64,
            job_retention: Duration::from_secs(3600),
            retention_sweep_interval: Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default              |
    /// |-------------------------|----------------------|
    /// | `CPU_SLOTS`             | `4`                  |
    /// | `GPU_SLOTS`             | `1`                  |
    /// | `ARTIFACT_DIR`          | `outputs`            |
    /// | `STAGE_WEIGHTS`         | `5,55,15,20,5`       |
    /// | `STAGE_TIMEOUTS_SECS`   | `30,600,300,300,120` |
    /// | `STORE_RETRY_ATTEMPTS`  | `3`                  |
    /// | `STORE_RETRY_BACKOFF_MS`| `200`                |
    /// | `CHECKPOINT_DELAY_MS`   | `50`                 |
    /// | `PROGRESS_BUFFER`       | `64`                 |
    /// | `JOB_RETENTION_SECS`    | `3600`               |
    /// | `RETENTION_SWEEP_SECS`  | `60`                 |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let defaults = Self::default();

        let stage_weights = match lookup("STAGE_WEIGHTS") {
            Some(raw) => StageWeights::parse(&raw)?,
            None => defaults.stage_weights,
        };
        let stage_timeouts = match lookup("STAGE_TIMEOUTS_SECS") {
            Some(raw) => StageTimeouts::parse_secs(&raw)?,
            None => defaults.stage_timeouts,
        };

        let config = Self {
            cpu_slots: parse_or(&lookup, "CPU_SLOTS", defaults.cpu_slots)?,
            gpu_slots: parse_or(&lookup, "GPU_SLOTS", defaults.gpu_slots)?,
            artifact_dir: lookup("ARTIFACT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifact_dir),
            stage_weights,
            stage_timeouts,
            store_retry_attempts: parse_or(
                &lookup,
                "STORE_RETRY_ATTEMPTS",
                defaults.store_retry_attempts,
            )?,
            store_retry_backoff: Duration::from_millis(parse_or(
                &lookup,
                "STORE_RETRY_BACKOFF_MS",
                defaults.store_retry_backoff.as_millis() as u64,
            )?),
            checkpoint_delay: Duration::from_millis(parse_or(
                &lookup,
                "CHECKPOINT_DELAY_MS",
                defaults.checkpoint_delay.as_millis() as u64,
            )?),
            progress_buffer: parse_or(&lookup, "PROGRESS_BUFFER", defaults.progress_buffer)?,
            job_retention: Duration::from_secs(parse_or(
                &lookup,
                "JOB_RETENTION_SECS",
                defaults.job_retention.as_secs(),
            )?),
            retention_sweep_interval: Duration::from_secs(parse_or(
                &lookup,
                "RETENTION_SWEEP_SECS",
                defaults.retention_sweep_interval.as_secs(),
            )?),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.cpu_slots == 0 {
            return Err(CoreError::Validation("CPU_SLOTS must be at least 1".to_string()));
        }
        if self.gpu_slots == 0 {
            return Err(CoreError::Validation("GPU_SLOTS must be at least 1".to_string()));
        }
        if self.store_retry_attempts == 0 {
            return Err(CoreError::Validation(
                "STORE_RETRY_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.progress_buffer == 0 {
            return Err(CoreError::Validation(
                "PROGRESS_BUFFER must be at least 1".to_string(),
            ));
        }
        if self.job_retention.is_zero() || self.retention_sweep_interval.is_zero() {
            return Err(CoreError::Validation(
                "JOB_RETENTION_SECS and RETENTION_SWEEP_SECS must be at least 1".to_string(),
            ));
        }
        self.stage_weights.validate()
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, CoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| CoreError::Validation(format!("{key} is invalid ('{raw}'): {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use vidgen_core::stage::StageKind;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.cpu_slots, 4);
        assert_eq!(config.gpu_slots, 1);
        assert_eq!(config.artifact_dir, PathBuf::from("outputs"));
        assert_eq!(config.stage_weights, StageWeights::default());
        assert_eq!(config.store_retry_attempts, 3);
        assert_eq!(config.job_retention, Duration::from_secs(3600));
        assert_eq!(config.retention_sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("GPU_SLOTS", "2"),
            ("ARTIFACT_DIR", "/var/lib/vidgen"),
            ("STAGE_WEIGHTS", "10,50,10,20,10"),
            ("STAGE_TIMEOUTS_SECS", "5,60,30,30,10"),
            ("CHECKPOINT_DELAY_MS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.gpu_slots, 2);
        assert_eq!(config.artifact_dir, PathBuf::from("/var/lib/vidgen"));
        assert_eq!(config.stage_weights.generate, 50);
        assert_eq!(
            config.stage_timeouts.budget(StageKind::Generate),
            Duration::from_secs(60)
        );
        assert_eq!(config.checkpoint_delay, Duration::ZERO);
    }

    #[test]
    fn zero_pool_rejected() {
        let result = EngineConfig::from_lookup(lookup(&[("GPU_SLOTS", "0")]));
        assert_matches!(result, Err(CoreError::Validation(_)));
    }

    #[test]
    fn retention_is_configurable_but_never_zero() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("JOB_RETENTION_SECS", "120"),
            ("RETENTION_SWEEP_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.job_retention, Duration::from_secs(120));
        assert_eq!(config.retention_sweep_interval, Duration::from_secs(5));

        let result = EngineConfig::from_lookup(lookup(&[("JOB_RETENTION_SECS", "0")]));
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("JOB_RETENTION_SECS"));
    }

    #[test]
    fn garbage_number_rejected() {
        let result = EngineConfig::from_lookup(lookup(&[("CPU_SLOTS", "many")]));
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("CPU_SLOTS"));
    }

    #[test]
    fn weights_must_sum_to_100() {
        let result = EngineConfig::from_lookup(lookup(&[("STAGE_WEIGHTS", "5,5,5,5,5")]));
        assert_matches!(result, Err(CoreError::Validation(_)));
    }
}
