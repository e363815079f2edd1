use serde::Serialize;
use vidgen_core::job_events::MSG_TYPE_ERROR;
use vidgen_core::progress::ProgressEvent;
use vidgen_core::types::JobId;

/// A progress event tagged with its message type.
///
/// Serializes as the event's fields plus `"type"`.
#[derive(Debug, Serialize)]
pub struct ProgressMessage<'a> {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    #[serde(flatten)]
    pub event: &'a ProgressEvent,
}

impl<'a> ProgressMessage<'a> {
    pub fn new(event: &'a ProgressEvent) -> Self {
        Self {
            msg_type: event.message_type(),
            event,
        }
    }
}

/// Sent once before closing when a subscription cannot be served.
#[derive(Debug, Serialize)]
pub struct ErrorMessage {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub job_id: JobId,
    pub code: &'static str,
    pub error: String,
}

impl ErrorMessage {
    pub fn not_found(job_id: JobId) -> Self {
        Self {
            msg_type: MSG_TYPE_ERROR,
            job_id,
            code: "NOT_FOUND",
            error: format!("Job {job_id} not found"),
        }
    }
}
