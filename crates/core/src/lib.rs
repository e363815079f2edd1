//! Shared domain types for the vidgen job-orchestration core.
//!
//! Pure types and functions only: no I/O, no runtime. Every other crate in
//! the workspace depends on this one.

pub mod error;
pub mod job;
pub mod job_events;
pub mod parameters;
pub mod progress;
pub mod stage;
pub mod types;
