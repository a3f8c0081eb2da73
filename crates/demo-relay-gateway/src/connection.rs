//! WebSocket connection lifecycle: admission, read/write loops, release.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use demo_relay_core::protocol::{
    codes, ClientRole, Frame, Hello, EVENT_HELLO, EVENT_SERVER_MESSAGE, EVENT_STATE_UPDATE,
};

use crate::methods::dispatch_method;
use crate::state::{ConnectionState, GatewayState};

/// Handle a new WebSocket connection.
pub async fn handle_ws_connection(
    state: Arc<GatewayState>,
    ws: WebSocket,
    role: ClientRole,
    peer_addr: Option<SocketAddr>,
) {
    let conn_id = Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, ?role, peer = ?peer_addr, "New WebSocket connection");

    let (mut ws_tx, mut ws_rx) = ws.split();

    // Create event channel for this connection
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<String>();

    state
        .hub
        .register(ConnectionState {
            conn_id: conn_id.clone(),
            event_tx: event_tx.clone(),
            role,
            peer_addr,
            groups: HashSet::new(),
        })
        .await;

    let authoritative = match role {
        ClientRole::Controller => state.relay.admit(&conn_id, peer_addr).await.accepted(),
        ClientRole::Viewer => false,
    };

    let hello = Hello::new(&conn_id, role, authoritative);
    let hello_frame = Frame::Event {
        event: EVENT_HELLO.into(),
        payload: serde_json::to_value(&hello).ok(),
        seq: Some(0),
    };
    if let Ok(msg) = serde_json::to_string(&hello_frame) {
        if ws_tx.send(Message::Text(msg.into())).await.is_err() {
            cleanup_connection(&state, &conn_id).await;
            return;
        }
    }

    // A freshly admitted controller already got the state from the admission broadcast.
    let greeting = match (role, authoritative) {
        (ClientRole::Viewer, _) => None,
        (ClientRole::Controller, true) => Some(format!("Welcome, Controller {}...", short_id(&conn_id))),
        (ClientRole::Controller, false) => {
            Some("A controller is already active. This connection is auxiliary.".to_string())
        }
    };
    if let Some(data) = greeting {
        state
            .hub
            .send_event_to(&conn_id, EVENT_SERVER_MESSAGE, json!({ "data": data }))
            .await;
    }
    if !authoritative {
        match serde_json::to_value(state.relay.snapshot().await) {
            Ok(payload) => {
                state
                    .hub
                    .send_event_to(&conn_id, EVENT_STATE_UPDATE, payload)
                    .await;
            }
            Err(e) => error!(%e, "Failed to serialize demo state"),
        }
    }

    // Spawn event sender task
    let send_task = tokio::spawn(async move {
        while let Some(msg) = event_rx.recv().await {
            if ws_tx.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    // Main read loop
    while let Some(msg_result) = ws_rx.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let response = match serde_json::from_str::<Frame>(text.as_str()) {
                    Ok(Frame::Request { id, method, params }) => {
                        Some(dispatch_method(&state, &conn_id, &id, &method, params).await)
                    }
                    Ok(_) => {
                        debug!("Received non-request frame, ignoring");
                        None
                    }
                    Err(e) => {
                        warn!(conn_id = %conn_id, %e, "Invalid frame received");
                        Some(Frame::error(
                            "unknown",
                            codes::INVALID_FRAME,
                            format!("Invalid frame: {e}"),
                        ))
                    }
                };
                if let Some(response) = response {
                    if let Ok(response_json) = serde_json::to_string(&response) {
                        let _ = event_tx.send(response_json);
                    }
                }
            }
            Ok(Message::Ping(_)) => {
                // Axum handles ping/pong automatically
            }
            Ok(Message::Close(_)) => {
                debug!(conn_id = %conn_id, "Client requested close");
                break;
            }
            Err(e) => {
                error!(conn_id = %conn_id, %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    // Cleanup
    send_task.abort();
    cleanup_connection(&state, &conn_id).await;
    info!(conn_id = %conn_id, "WebSocket connection closed");
}

/// Drop the connection, then give up the controller role if it held it.
async fn cleanup_connection(state: &Arc<GatewayState>, conn_id: &str) {
    state.hub.unregister(conn_id).await;
    state.relay.release(conn_id).await;
}

fn short_id(conn_id: &str) -> &str {
    conn_id.get(..4).unwrap_or(conn_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("abcdef-1234"), "abcd");
        assert_eq!(short_id("ab"), "ab");
    }
}
