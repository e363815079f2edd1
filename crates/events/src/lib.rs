//! Live progress delivery for generation jobs.
//!
//! - [`ProgressNotifier`]: per-job publish/subscribe hub with replay of the
//!   latest event, backed by `tokio::sync::broadcast`.
//! - [`ProgressSubscription`]: ordered, self-terminating view of one job.

pub mod notifier;

pub use notifier::{NotifierError, ProgressNotifier, ProgressSubscription};
