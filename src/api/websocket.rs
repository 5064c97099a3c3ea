//! WebSocket transport for the broadcast channel

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use tracing::{debug, info, warn};

use crate::api::state::ApiState;

/// WebSocket upgrade handler
///
/// GET /api/v1/stream
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

/// Handle WebSocket connection
///
/// Outbound frames are written by their own task, so pushes keep flowing
/// while an invocation of this connection is outstanding. Inbound frames
/// are handled one at a time.
async fn handle_websocket(socket: WebSocket, state: ApiState) {
    let hub = state.hub;
    let connection = hub.connect().await;
    let connection_id = connection.id.clone();
    let mut outbound = connection.receiver;

    info!(connection = %connection_id, "WebSocket client connected");

    let (mut sender, mut receiver) = socket.split();

    // Forward queued server frames to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!("failed to encode {} frame: {e}", message.kind());
                    continue;
                }
            };

            if sender.send(Message::Text(text)).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                break;
            }
        }
    });

    // Handle client invocations strictly in order
    let recv_hub = hub.clone();
    let recv_id = connection_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => recv_hub.handle_frame(&recv_id, &text).await,
                Message::Close(_) => break,
                Message::Ping(_) => {
                    // Pong is automatically sent by axum
                    debug!("Received ping");
                }
                _ => {
                    debug!("ignoring non-text frame");
                }
            }
        }
    });

    // Wait for either task to finish, then for the other to be gone, so no
    // invocation of this connection outlives its disconnect
    let sender_finished = tokio::select! {
        _ = (&mut send_task) => true,
        _ = (&mut recv_task) => false,
    };

    let remaining = if sender_finished { recv_task } else { send_task };
    remaining.abort();
    let _ = remaining.await;

    hub.disconnect(&connection_id);
    info!(connection = %connection_id, "WebSocket client disconnected");
}
