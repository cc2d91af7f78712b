//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! Each open socket holds the user's watch-count monitoring session open and
//! subscribes to the user's change feed; watch events flow back the other way.
//! The session ends when the user's last socket closes.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::port_error_response;
use crate::web::{
    protocol::{ClientMessage, ServerMessage},
    state::AppState,
};

type WsSender = SplitSink<WebSocket, Message>;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, user_id))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, user_id: Uuid) {
    info!("New WebSocket connection established for user: {}", user_id);
    let (mut sender, mut receiver) = socket.split();

    // --- 1. Initialization Phase ---
    // Subscribe before starting the monitor so the first snapshot is not missed.
    let mut changes = app_state.changes.subscribe(user_id);
    if let Err(e) = app_state.monitor.attach(user_id).await {
        error!("Failed to start monitoring for {}: {:?}", user_id, e);
        let (_, message) = port_error_response(&e);
        let _ = send_message(&mut sender, &ServerMessage::Error { message }).await;
        return;
    }

    // --- 2. Main Message Loop ---
    loop {
        tokio::select! {
            event = changes.next() => {
                let Some(event) = event else {
                    warn!("Change feed closed for user {}", user_id);
                    break;
                };
                if send_message(&mut sender, &ServerMessage::from(event)).await.is_err() {
                    info!("Client went away while pushing a change.");
                    break;
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_text_message(text.as_str(), &app_state, user_id).await {
                            if send_message(&mut sender, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client sent close message.");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {}", e);
                        break;
                    }
                    None => {
                        info!("Client disconnected.");
                        break;
                    }
                }
            }
        }
    }

    // --- 3. Cleanup ---
    app_state.monitor.detach(user_id);
    info!("WebSocket connection closed for user: {}", user_id);
}

/// Handles one client text frame, returning an error message to push back if any.
async fn handle_text_message(
    text: &str,
    app_state: &AppState,
    user_id: Uuid,
) -> Option<ServerMessage> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::VideoWatched { video_id }) => {
            match app_state.watch_counts.record_watch(user_id).await {
                Ok(counts) => {
                    info!(
                        %user_id,
                        video_id,
                        count = counts.videos_watched_since_last_profile,
                        "Recorded watch"
                    );
                    // The updated counts reach the client through the change feed.
                    None
                }
                Err(e) => {
                    error!("Failed to record watch: {:?}", e);
                    let (_, message) = port_error_response(&e);
                    Some(ServerMessage::Error { message })
                }
            }
        }
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
            Some(ServerMessage::Error {
                message: format!("Unrecognized message: {}", e),
            })
        }
    }
}

async fn send_message(sender: &mut WsSender, message: &ServerMessage) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server message: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(json.into())).await
}
