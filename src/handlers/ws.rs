//! WebSocket handler: origin check, handshake identity, heartbeat, and the
//! per-connection reader/writer/presence tasks.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::handlers::http::AppState;
use crate::models::event::{ClientMessage, ServerEvent};
use crate::models::presence::ConnectionId;
use crate::services::{ConnectionHandle, DisconnectReason};

/// Handshake query, e.g. `/ws?userId=65f1...`.
#[derive(Debug, Default, Deserialize)]
pub struct HandshakeParams {
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
}

/// Upgrade HTTP to WebSocket. Browsers must come from an allowed origin.
pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HandshakeParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    if !state.origins.check(&headers) {
        return Err(AppError::Forbidden("origin not allowed".to_string()));
    }
    Ok(ws.on_upgrade(move |socket| handle_socket(state, socket, params.user_id)))
}

async fn handle_socket(state: AppState, socket: WebSocket, claimed: Option<String>) {
    let socket_id = ConnectionId::generate();
    debug!(socket_id = %socket_id, "ws connected");

    let (mut sender, mut receiver) = socket.split();

    let hello = ServerEvent::ConnectionEstablished {
        socket_id: socket_id.to_string(),
    };
    match hello.to_frame() {
        Ok(frame) => {
            if sender.send(Message::Text(frame)).await.is_err() {
                return;
            }
        }
        Err(e) => warn!(socket_id = %socket_id, error = %e, "greeting not encoded"),
    }

    let (tx, mut rx) = mpsc::channel::<String>(state.outbound_buffer);
    let handle = ConnectionHandle::new(socket_id.clone(), tx);
    let mut session = state.gateway.connect(claimed.as_deref(), handle.clone());

    let ping_every = state.heartbeat.ping_interval;
    let send_task = tokio::spawn(async move {
        let mut ping = interval(ping_every);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick fires immediately
        ping.tick().await;
        loop {
            tokio::select! {
                frame = rx.recv() => match frame {
                    Some(frame) => {
                        if sender.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping.tick() => {
                    if sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let presence_task = session.take_presence_feed().map(|mut feed| {
        let handle = handle.clone();
        tokio::spawn(async move {
            while let Some(snapshot) = feed.next().await {
                let frame = match ServerEvent::GetOnlineUsers(snapshot.ids()).to_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "presence frame not encoded");
                        continue;
                    }
                };
                if handle.send(frame).await.is_err() {
                    break;
                }
            }
        })
    });

    // Any inbound frame, pongs included, proves the client is alive.
    let idle = state.heartbeat.idle_timeout();
    let reason = loop {
        match timeout(idle, receiver.next()).await {
            Err(_) => break DisconnectReason::IdleTimeout,
            Ok(None) => break DisconnectReason::Clean,
            Ok(Some(Err(e))) => {
                debug!(socket_id = %socket_id, error = %e, "ws read error");
                break DisconnectReason::TransportError;
            }
            Ok(Some(Ok(msg))) => match msg {
                Message::Text(text) => handle_client_text(&handle, &text),
                Message::Close(_) => break DisconnectReason::Clean,
                _ => {}
            },
        }
    };

    session.close(reason);
    send_task.abort();
    if let Some(task) = presence_task {
        task.abort();
    }
    info!(socket_id = %socket_id, reason = %reason, "ws disconnected");
}

fn handle_client_text(handle: &ConnectionHandle, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Ping) => {
            let pong = match ServerEvent::Pong.to_frame() {
                Ok(frame) => frame,
                Err(_) => return,
            };
            if let Err(e) = handle.push(pong) {
                debug!(error = %e, "pong dropped");
            }
        }
        Err(_) => {
            debug!(
                socket_id = %handle.id(),
                "ignoring client frame: {}",
                text.chars().take(100).collect::<String>()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_reads_user_id() {
        let params: HandshakeParams =
            serde_json::from_value(serde_json::json!({ "userId": "u1" })).unwrap();
        assert_eq!(params.user_id.as_deref(), Some("u1"));
        let params: HandshakeParams = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(params.user_id.is_none());
    }

    #[tokio::test]
    async fn ping_gets_pong_and_junk_is_ignored() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = ConnectionHandle::new(ConnectionId::from("c1"), tx);

        handle_client_text(&handle, r#"{"event":"ping"}"#);
        assert_eq!(rx.try_recv().unwrap(), r#"{"event":"pong"}"#);

        handle_client_text(&handle, "hello?");
        assert!(rx.try_recv().is_err());
    }
}
