//! WebSocket transport: connection keepalive, event forwarding, and the
//! inbound chat protocol.
//!
//! Each connection runs one select loop combining three concerns: forwarding
//! hub broadcasts to the socket, reading client frames (`chat.message`
//! dispatch, pong bookkeeping), and a ping/pong health check. A connection
//! whose receiver lags the hub buffer is disconnected; clients are expected
//! to reconnect and re-fetch state.

use std::time::Duration;

use axum::{
    extract::{
        Query, State,
        ws::{Message as WsFrame, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::agents::detector;
use crate::api::SharedState;
use crate::db::{DbHandle, NewMessage};
use crate::events::{Event, MessageView};
use crate::hub::Hub;
use crate::models::{MessageType, SenderType};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
pub struct WsParams {
    #[serde(rename = "projectId")]
    pub project_id: i64,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    #[serde(rename = "userName")]
    pub user_name: Option<String>,
}

/// Inbound client frames: `{"type": "...", "payload": {...}}`.
#[derive(Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatPayload {
    content: String,
}

struct Connection {
    project_id: i64,
    user_id: String,
    user_name: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    let connection = Connection {
        project_id: params.project_id,
        user_id: params
            .user_id
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| "anonymous".to_string()),
        user_name: params.user_name,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, connection))
}

async fn handle_socket(socket: WebSocket, state: SharedState, connection: Connection) {
    let total = state.hub.client_connected();
    eprintln!("[ws] client registered, total: {}", total);

    let (sender, receiver) = socket.split();
    let rx = state.hub.subscribe();
    run_socket_loop(sender, receiver, rx, &state, &connection).await;

    let total = state.hub.client_disconnected();
    eprintln!("[ws] client unregistered, total: {}", total);
}

/// Core socket loop with ping/pong keepalive.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, WsFrame>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<String>,
    state: &SharedState,
    connection: &Connection,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            // ── Periodic ping ───────────────────────────────────────
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(WsFrame::Ping(Vec::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            // ── Broadcast forwarding ────────────────────────────────
            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if sender.send(WsFrame::Text(msg)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Outbound buffer overran: drop the slow client.
                        eprintln!("[ws] client lagged {} events, disconnecting", skipped);
                        break;
                    }
                }
            }

            // ── Client frames ───────────────────────────────────────
            frame = receiver.next() => {
                match frame {
                    Some(Ok(WsFrame::Text(text))) => {
                        handle_client_message(state, connection, &text).await;
                    }
                    Some(Ok(WsFrame::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(WsFrame::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(WsFrame::Close(None)).await;
}

async fn handle_client_message(state: &SharedState, connection: &Connection, raw: &str) {
    let message: ClientMessage = match serde_json::from_str(raw) {
        Ok(message) => message,
        Err(e) => {
            eprintln!("[ws] invalid message format: {}", e);
            return;
        }
    };

    match message.message_type.as_str() {
        "chat.message" => {
            let payload: ChatPayload = match serde_json::from_value(message.payload) {
                Ok(payload) => payload,
                Err(e) => {
                    eprintln!("[ws] invalid chat payload: {}", e);
                    return;
                }
            };
            handle_chat_message(state, connection, payload.content).await;
        }
        other => {
            eprintln!("[ws] unknown message type: {}", other);
        }
    }
}

/// Persist a user chat message, fan it out, and kick off an inline agent
/// reply when the detector routes the text to someone.
async fn handle_chat_message(state: &SharedState, connection: &Connection, content: String) {
    let new_message = NewMessage {
        project_id: connection.project_id,
        sender_id: connection.user_id.clone(),
        sender_type: SenderType::User,
        content: content.clone(),
        message_type: MessageType::Chat,
        metadata: None,
    };
    let message = match state.db.call(move |db| db.create_message(&new_message)).await {
        Ok(message) => message,
        Err(e) => {
            eprintln!("[db] failed to save message: {:#}", e);
            return;
        }
    };

    state.hub.broadcast(&Event::MessageReceived {
        message: MessageView::with_sender_name(message, connection.user_name.clone()),
    });

    if let Some(agent) = detector::detect(&content) {
        let runner = state.runner.clone();
        let project_id = connection.project_id;
        tokio::spawn(async move {
            runner.run(project_id, agent, None, None, content).await;
        });
    }
}

/// Persist and fan out a system message (dialog summaries and similar).
pub async fn send_system_message(db: &DbHandle, hub: &Hub, project_id: i64, content: &str) {
    if content.is_empty() {
        return;
    }

    let new_message = NewMessage {
        project_id,
        sender_id: "system".to_string(),
        sender_type: SenderType::System,
        content: content.to_string(),
        message_type: MessageType::System,
        metadata: None,
    };
    let message = match db.call(move |db| db.create_message(&new_message)).await {
        Ok(message) => message,
        Err(e) => {
            eprintln!("[system] failed to save message: {:#}", e);
            return;
        }
    };

    hub.broadcast(&Event::MessageReceived {
        message: MessageView::from_message(message),
    });
}
