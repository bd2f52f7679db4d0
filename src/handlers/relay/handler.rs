use axum::{
    extract::{
        ConnectInfo, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::core::admission::AdmittedSession;
use crate::core::relay::{ClientRoute, Frame, ManagerEvent};
use crate::state::AppState;

/// Client-bound channel depth
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Close frame reasons are limited to 123 bytes on the wire.
const MAX_CLOSE_REASON_BYTES: usize = 123;

/// How long queued client-bound frames get to drain once a session ends.
const SENDER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Relay WebSocket handler
///
/// Upgrades the connection, then admits (or refuses) it and runs the
/// session until either side closes.
pub async fn relay_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    debug!(ip = %addr.ip(), "Relay WebSocket upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_relay_socket(socket, state, addr.ip()))
}

async fn handle_relay_socket(socket: WebSocket, state: Arc<AppState>, ip: IpAddr) {
    let (mut sender, mut receiver) = socket.split();
    let (client_tx, mut client_rx) = mpsc::channel::<ClientRoute>(CHANNEL_BUFFER_SIZE);

    let AdmittedSession {
        id,
        manager,
        handle,
        guard,
    } = match state.admission.admit(ip, client_tx) {
        Ok(session) => session,
        Err(e) => {
            debug!(
                ip = %ip,
                active = state.admission.count_for(ip),
                "Sending refusal close: {}",
                e
            );
            let close = Message::Close(Some(CloseFrame {
                code: e.close_code(),
                reason: close_reason(&e.to_string()).into(),
            }));
            if let Err(send_err) = sender.send(close).await {
                debug!(ip = %ip, "Failed to deliver refusal close frame: {}", send_err);
            }
            return;
        }
    };

    info!(session_id = %id, ip = %ip, "Relay session started");

    // Sender task for client-bound traffic
    let sender_task = tokio::spawn(async move {
        while let Some(route) = client_rx.recv().await {
            let should_close = matches!(route, ClientRoute::Close { .. });

            let result = match route {
                ClientRoute::Frame(Frame::Text(text)) => sender.send(Message::Text(text.into())).await,
                ClientRoute::Frame(Frame::Binary(data)) => sender.send(Message::Binary(data)).await,
                ClientRoute::Outgoing(message) => match serde_json::to_string(&message) {
                    Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                    Err(e) => {
                        error!("Failed to serialize outgoing message: {}", e);
                        continue;
                    }
                },
                ClientRoute::Close { code, reason } => {
                    sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: close_reason(&reason).into(),
                        })))
                        .await
                }
            };

            if let Err(e) = result {
                debug!("Failed to send WebSocket message: {}", e);
                break;
            }

            if should_close {
                break;
            }
        }
    });
    let sender_abort = sender_task.abort_handle();

    let manager_task = tokio::spawn(manager.run());
    let events = handle.events();

    loop {
        select! {
            msg_result = receiver.next() => {
                let frame = match msg_result {
                    Some(Ok(Message::Text(text))) => Frame::Text(text.as_str().to_string()),
                    Some(Ok(Message::Binary(data))) => Frame::Binary(data),
                    // Pings are answered by the WebSocket layer
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(frame))) => {
                        debug!(session_id = %id, code = ?frame.as_ref().map(|f| f.code), "Client sent close");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %id, "Relay WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };

                if events.send(ManagerEvent::ClientFrame(frame)).await.is_err() {
                    break;
                }
            }
            // Session ended on its own (fatal close, exhaustion, shutdown)
            _ = events.closed() => break,
        }
    }

    // No-op when the session already ended
    let _ = events.send(ManagerEvent::ClientClosed).await;
    if let Err(e) = manager_task.await {
        error!(session_id = %id, "Relay session task failed: {}", e);
    }

    if tokio::time::timeout(SENDER_DRAIN_TIMEOUT, sender_task)
        .await
        .is_err()
    {
        sender_abort.abort();
    }

    let state = handle.view().state;
    drop(guard);
    info!(session_id = %id, ip = %ip, state = %state, "Relay session ended");
}

/// Trim a close reason to the wire limit without splitting a character.
fn close_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON_BYTES {
        return reason.to_string();
    }
    let mut end = MAX_CLOSE_REASON_BYTES;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}
