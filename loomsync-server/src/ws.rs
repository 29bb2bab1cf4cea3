//! WebSocket upgrade handler: connect handshake, version negotiation, and
//! the per-device read/write loop (C7 + C8 wiring).
//!
//! Shaped after the teacher's `handle_websocket.rs`: split the socket,
//! register the connection before spawning anything, drive outbound frames
//! from an `mpsc` receiver on one task, and read inbound frames on the
//! connection's own task until it closes or errors.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::protocol::{
    close_code, ConnectPayload, ConnectedPayload, ErrorPayload, Frame, MessageType, PongPayload,
};
use crate::session::Session;
use crate::state::AppState;

const CONNECT_GRACE_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub session: Option<String>,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.session))
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: &str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame { code, reason: reason.to_string().into() })))
        .await;
}

async fn handle_socket(mut socket: WebSocket, state: AppState, session_id: Option<String>) {
    let Some(session_id) = session_id else {
        close_with(&mut socket, close_code::SESSION_ID_MISMATCH, "missing session query parameter").await;
        return;
    };

    let Some(session) = state.registry.get_session(&session_id) else {
        close_with(&mut socket, close_code::UNKNOWN_SESSION, "unknown session").await;
        return;
    };

    if session.is_expired().await {
        close_with(&mut socket, close_code::SESSION_EXPIRED, "session expired").await;
        return;
    }

    let frame = match timeout(CONNECT_GRACE_WINDOW, socket.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => Frame::from_json(&text).ok(),
        Ok(Some(Ok(Message::Binary(bin)))) => Frame::from_json(&String::from_utf8_lossy(&bin)).ok(),
        _ => None,
    };
    let Some(frame) = frame else {
        close_with(&mut socket, close_code::NOT_AUTHENTICATED, "no connect frame within grace window").await;
        return;
    };
    if frame.kind != MessageType::Connect || frame.session_id != session_id {
        close_with(&mut socket, close_code::SESSION_ID_MISMATCH, "session id mismatch").await;
        return;
    }
    let Ok(connect) = serde_json::from_value::<ConnectPayload>(frame.payload) else {
        close_with(&mut socket, close_code::POLICY_VIOLATION, "malformed connect payload").await;
        return;
    };
    if !Frame::major_is_compatible(&connect.client_version) {
        let server_major = crate::protocol::PROTOCOL_VERSION.split('.').next().unwrap_or("0").parse().unwrap_or(0);
        let error_payload = ErrorPayload::unsupported_version(&connect.client_version, server_major);
        let error_frame = Frame::new(MessageType::Error, &session_id, serde_json::to_value(&error_payload).unwrap());
        if let Ok(json) = error_frame.to_json() {
            let _ = socket.send(Message::Text(json.into())).await;
        }
        close_with(&mut socket, close_code::UNSUPPORTED_VERSION, "unsupported protocol version").await;
        return;
    }

    let admitted = state
        .registry
        .admit_device(&session_id, connect.device_id, connect.platform, connect.device_name, connect.client_version)
        .await;
    let (session, connection, rx) = match admitted {
        Ok(admitted) => admitted,
        Err(e) => {
            warn!(session_id, error = %e, "device admission failed after connect handshake");
            close_with(&mut socket, close_code::UNKNOWN_SESSION, "admission failed").await;
            return;
        }
    };
    let connection_id = connection.connection_id.clone();

    let initial_schema = session.current_ir.read().await.clone();
    let connected_payload = ConnectedPayload { connection_id: connection_id.clone(), initial_schema };
    let connected_frame = Frame::new(MessageType::Connected, &session_id, serde_json::to_value(&connected_payload).unwrap());
    if let Ok(json) = connected_frame.to_json() {
        if socket.send(Message::Text(json.into())).await.is_err() {
            state.registry.remove_device(&session_id, &connection_id);
            return;
        }
    }
    info!(session_id, connection_id, "device connected");

    // C8's `connected` carries the current snapshot for immediate render;
    // C10 additionally resends it as a proper `update` frame so a
    // reconnecting device observes it through the same sequence-numbered
    // path as any other push (spec.md §4.10's reconnection contract).
    if session.current_ir.read().await.is_some() {
        state.dispatcher.resync(&session, &connection_id).await;
    }

    let (mut sink, mut stream) = socket.split();
    let mut rx = rx;
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let Ok(json) = frame.to_json() else { continue };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => handle_inbound(&state, &session, &connection_id, &text).await,
            Ok(Message::Binary(bin)) => handle_inbound(&state, &session, &connection_id, &String::from_utf8_lossy(&bin)).await,
            Ok(Message::Ping(_)) => {
                if let Some(device) = session.devices.get(&connection_id) {
                    device.touch_ping().await;
                }
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!(session_id, connection_id, error = %e, "websocket read error");
                break;
            }
            _ => {}
        }
    }

    writer.abort();
    state.registry.remove_device(&session_id, &connection_id);
    info!(session_id, connection_id, "device disconnected");
}

async fn handle_inbound(state: &AppState, session: &Arc<Session>, connection_id: &str, text: &str) {
    let Ok(frame) = Frame::from_json(text) else {
        warn!(connection_id, "dropping malformed frame");
        return;
    };
    match frame.kind {
        MessageType::Ping => {
            if let Some(device) = session.devices.get(connection_id) {
                device.touch_ping().await;
                let pong = Frame::new(MessageType::Pong, &session.id, serde_json::to_value(PongPayload { server_time: chrono::Utc::now() }).unwrap());
                let _ = device.send(pong).await;
            }
        }
        MessageType::Ack => {
            if let Ok(payload) = serde_json::from_value::<crate::protocol::AckPayload>(frame.payload) {
                state.dispatcher.record_ack(session, connection_id, payload.sequence_number).await;
            }
        }
        other => {
            warn!(connection_id, kind = ?other, "unexpected client-originated frame type");
        }
    }
}
