//! Live job progress over WebSocket.

pub mod handler;
pub mod message;

pub use handler::job_progress_ws;
