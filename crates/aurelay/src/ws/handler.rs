//! WebSocket handler for chat client connections.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use aurelay_protocol::{ClientCommand, ServerEvent};

use crate::api::AppState;
use crate::config::DeliveryMode;

use super::hub::{ChatHub, ConnId};

/// Connection parameters. There is no authentication handshake on the socket;
/// the claimed user id is taken at face value (known gap, out of scope).
#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub user_id: i64,
}

/// WebSocket upgrade handler.
///
/// GET /ws?user_id=<id>
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = params.user_id;
    info!(user_id, "WebSocket upgrade request");
    ws.on_upgrade(move |socket| handle_connection(socket, user_id, state))
}

/// Handle one client connection for its whole lifetime.
async fn handle_connection(socket: WebSocket, user_id: i64, state: AppState) {
    let hub = state.hub.clone();
    let (mut sender, mut receiver) = socket.split();

    let (conn_id, mut event_rx) = hub.register(user_id);

    if let Err(e) = send_json(&mut sender, &ServerEvent::Connected { user_id }).await {
        warn!(user_id, conn_id, "failed to send connected event: {e}");
        hub.unregister(user_id, conn_id);
        return;
    }

    // Pump hub events (and periodic pings) out to the socket.
    let ping_interval = state.ping_interval;
    let send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        ping.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    let Some(event) = event else { break };
                    if send_json(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if send_json(&mut sender, &ServerEvent::Ping).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Process incoming commands until the socket closes.
    while let Some(msg_result) = receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(cmd) => handle_command(&hub, &state, user_id, conn_id, cmd).await,
                Err(e) => {
                    warn!(user_id, conn_id, "unparseable command: {e}");
                    hub.send_to_connection(
                        user_id,
                        conn_id,
                        ServerEvent::Error {
                            message: format!("invalid command: {e}"),
                        },
                    )
                    .await;
                }
            },
            Ok(Message::Binary(_)) => {
                debug!(user_id, conn_id, "ignoring binary frame");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(user_id, conn_id, "client closed connection");
                break;
            }
            Err(e) => {
                warn!(user_id, conn_id, "socket error: {e}");
                break;
            }
        }
    }

    // Registry slot must be released before the task is gone, otherwise
    // fan-out keeps writing into a dead channel.
    send_task.abort();
    hub.unregister(user_id, conn_id);
    info!(user_id, conn_id, "connection closed");
}

async fn handle_command(
    hub: &Arc<ChatHub>,
    state: &AppState,
    user_id: i64,
    conn_id: ConnId,
    cmd: ClientCommand,
) {
    match cmd {
        ClientCommand::Pong => {}
        ClientCommand::Send {
            correlation_id,
            receiver_id,
            body,
        } => {
            handle_send(hub, state, user_id, conn_id, correlation_id, receiver_id, &body).await;
        }
    }
}

/// Relay a send: validate, persist, then fan out.
///
/// The persistence write strictly precedes any fan-out, so a peer observing
/// a `Deliver` can rely on the message being durable. A failed write aborts
/// delivery and is reported to the originating connection only.
async fn handle_send(
    hub: &Arc<ChatHub>,
    state: &AppState,
    user_id: i64,
    conn_id: ConnId,
    correlation_id: String,
    receiver_id: i64,
    body: &str,
) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        hub.send_to_connection(
            user_id,
            conn_id,
            ServerEvent::SendRejected {
                correlation_id,
                reason: "message body is empty".to_string(),
            },
        )
        .await;
        return;
    }
    if receiver_id == user_id {
        hub.send_to_connection(
            user_id,
            conn_id,
            ServerEvent::SendRejected {
                correlation_id,
                reason: "sender and receiver must differ".to_string(),
            },
        )
        .await;
        return;
    }

    let message = match state.messages.insert(user_id, receiver_id, trimmed).await {
        Ok(message) => message,
        Err(e) => {
            warn!(user_id, receiver_id, "failed to persist message: {e:#}");
            hub.send_to_connection(
                user_id,
                conn_id,
                ServerEvent::SendFailed {
                    correlation_id,
                    reason: "message was not stored".to_string(),
                },
            )
            .await;
            return;
        }
    };

    hub.send_to_connection(
        user_id,
        conn_id,
        ServerEvent::Ack {
            correlation_id,
            message: message.clone(),
        },
    )
    .await;

    let delivered = match state.delivery_mode {
        DeliveryMode::Targeted => {
            hub.send_to_user(receiver_id, ServerEvent::Deliver { message }).await
        }
        DeliveryMode::Broadcast => {
            hub.broadcast_except(conn_id, ServerEvent::Deliver { message }).await
        }
    };
    debug!(user_id, receiver_id, delivered, "message relayed");
}

async fn send_json(
    sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).map_err(axum::Error::new)?;
    sender.send(Message::Text(json.into())).await
}
