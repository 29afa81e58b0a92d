//! Real-time channel endpoint.
//!
//! `/ws?token=...&workspace_id=...` authenticates the handshake, registers
//! the session with the hub, and runs the socket as a reader task plus a
//! writer task joined by cooperative close. Missed events are not replayed
//! on reconnect; clients reconcile job state over HTTP.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    auth::{session::SessionStore, Subject},
    events::{workspace_topic, EventKind},
    realtime::{SessionHandle, WsFrame},
    AppState,
};

const CLOSE_POLICY_VIOLATION: u16 = 1008;
const CLOSE_TOKEN_EXPIRED: u16 = 4401;
const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
    pub workspace_id: Option<Uuid>,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, query, socket))
}

enum Handshake {
    Accepted(Subject),
    Rejected(u16, &'static str),
}

fn authenticate(state: &AppState, query: &WsQuery) -> Handshake {
    let claims = match state.jwt_config.verify_access_token(&query.token) {
        Ok(claims) => claims,
        Err(e) => {
            let expired = e.to_string().to_lowercase().contains("expired");
            return if expired {
                Handshake::Rejected(CLOSE_TOKEN_EXPIRED, "token expired")
            } else {
                Handshake::Rejected(CLOSE_POLICY_VIOLATION, "unauthorized")
            };
        }
    };

    let Some(subject) = claims.subject() else {
        return Handshake::Rejected(CLOSE_POLICY_VIOLATION, "unauthorized");
    };

    // The target workspace in the handshake must agree with the token.
    if let Some(requested) = query.workspace_id {
        if requested != subject.workspace_id {
            return Handshake::Rejected(CLOSE_POLICY_VIOLATION, "workspace mismatch");
        }
    }

    let session_active = state
        .db_pool
        .get()
        .ok()
        .and_then(|mut conn| SessionStore::is_active(&mut conn, subject.session_id).ok())
        .unwrap_or(false);

    if !session_active {
        return Handshake::Rejected(CLOSE_POLICY_VIOLATION, "session revoked");
    }

    Handshake::Accepted(subject)
}

async fn handle_socket(state: AppState, query: WsQuery, mut socket: WebSocket) {
    let subject = match authenticate(&state, &query) {
        Handshake::Accepted(subject) => subject,
        Handshake::Rejected(code, reason) => {
            debug!(code, reason, "Rejected realtime handshake");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })))
                .await;
            return;
        }
    };

    let handle = state.hub.register(&state.bus, subject.clone()).await;

    handle.push_frame(
        &WsFrame::new(
            "connection_established",
            json!({
                "workspace_id": subject.workspace_id,
                "user_id": subject.user_id,
            }),
        ),
        false,
    );

    let (mut sender, mut receiver) = socket.split();

    let writer_handle = handle.clone();
    let heartbeat = Duration::from_secs(state.config.realtime.heartbeat_secs);
    let writer = tokio::spawn(async move {
        let mut ping_timer = tokio::time::interval(heartbeat);
        ping_timer.tick().await; // the first tick fires immediately

        loop {
            tokio::select! {
                frame = writer_handle.queue.pop() => {
                    if sender.send(Message::Text(frame.text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_timer.tick() => {
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                _ = writer_handle.wait_closed() => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code: 1000,
                            reason: "closing".into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                handle_client_frame(&state, &handle, text.as_str()).await;
            }
            Ok(Message::Pong(_)) => handle.touch_pong(),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "Socket read error");
                break;
            }
        }
    }

    // Reader finished: cancel the writer and discard undelivered frames.
    handle.close();
    let _ = writer.await;
    state.hub.unregister(&state.bus, &handle).await;
}

async fn handle_client_frame(state: &AppState, handle: &Arc<SessionHandle>, text: &str) {
    let Ok(frame) = serde_json::from_str::<serde_json::Value>(text) else {
        handle.push_frame(
            &WsFrame::new("error", json!({"message": "malformed frame"})),
            false,
        );
        return;
    };

    let frame_type = frame.get("type").and_then(|t| t.as_str()).unwrap_or("");
    let workspace_id = handle.subject.workspace_id;

    match frame_type {
        "ping" => {
            handle.touch_pong();
            handle.push_frame(&WsFrame::new("pong", json!({})), false);
        }
        "get_workspace_presence" => {
            let online = state.hub.presence.snapshot(workspace_id);
            let count = online.len();
            handle.push_frame(
                &WsFrame::new(
                    "workspace_presence",
                    json!({
                        "workspace_id": workspace_id,
                        "online_user_ids": online,
                        "count": count,
                    }),
                ),
                false,
            );
        }
        "workspace_message" => {
            let message = frame
                .get("data")
                .and_then(|d| d.get("text"))
                .and_then(|t| t.as_str())
                .unwrap_or("")
                .trim();

            if message.is_empty() || message.chars().count() > MAX_MESSAGE_CHARS {
                handle.push_frame(
                    &WsFrame::new("error", json!({"message": "invalid message text"})),
                    false,
                );
                return;
            }

            state
                .bus
                .publish(
                    workspace_topic(workspace_id),
                    EventKind::WorkspaceMessage,
                    json!({
                        "workspace_id": workspace_id,
                        "user_id": handle.subject.user_id,
                        "text": message,
                    }),
                )
                .await;
        }
        other => {
            warn!(frame_type = %other, "Unknown client frame type");
            handle.push_frame(
                &WsFrame::new("error", json!({"message": "unknown frame type"})),
                false,
            );
        }
    }
}
