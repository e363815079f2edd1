use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use vidgen_core::types::JobId;
use vidgen_worker::Engine;

use crate::state::AppState;
use crate::ws::message::{ErrorMessage, ProgressMessage};

/// GET /api/v1/jobs/{id}/ws
///
/// Upgrades to a WebSocket that streams the job's progress events, latest
/// first, and closes after the final one. An unknown id gets a single
/// error frame and a close.
pub async fn job_progress_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.engine, job_id))
}

/// Drive one progress socket after upgrade.
///
/// A sender task forwards subscription events to the sink; the current
/// task drains inbound frames until the client goes away. Whichever side
/// finishes first ends the connection.
async fn handle_socket(socket: WebSocket, engine: Arc<Engine>, job_id: JobId) {
    let (mut sink, mut stream) = socket.split();

    let mut subscription = match engine.subscribe(job_id) {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::debug!(job_id = %job_id, error = %e, "Progress subscription refused");
            if let Some(frame) = text_frame(&ErrorMessage::not_found(job_id)) {
                let _ = sink.send(frame).await;
            }
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };
    tracing::info!(job_id = %job_id, "Progress socket connected");

    // Sender task: forward events, then close once the stream ends.
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = subscription.next().await {
            let Some(frame) = text_frame(&ProgressMessage::new(&event)) else {
                continue;
            };
            if sink.send(frame).await.is_err() {
                tracing::debug!(job_id = %job_id, "Progress socket sink closed");
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    // Receiver loop: inbound frames are ignored apart from close.
    let receive = async {
        while let Some(result) = stream.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(job_id = %job_id, error = %e, "Progress socket receive error");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = &mut send_task => {}
        () = receive => send_task.abort(),
    }

    tracing::info!(job_id = %job_id, "Progress socket disconnected");
}

fn text_frame<T: Serialize>(message: &T) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize progress message");
            None
        }
    }
}
