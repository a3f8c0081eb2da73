//! Event broadcasting to all connected WebSocket clients.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, error};

use demo_relay_core::broadcast::Broadcaster;
use demo_relay_core::demo::DemoState;
use demo_relay_core::protocol::{Frame, EVENT_COMMAND, EVENT_STATE_UPDATE};

use crate::state::ConnectionState;

/// Registry of live connections and their subscription groups.
///
/// Every send goes through an unbounded per-connection channel, so fan-out
/// never waits on a slow socket.
pub struct ConnectionHub {
    connections: RwLock<HashMap<String, ConnectionState>>,
    seq: AtomicU64,
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    pub async fn register(&self, conn: ConnectionState) {
        let mut connections = self.connections.write().await;
        connections.insert(conn.conn_id.clone(), conn);
        #[cfg(feature = "metrics")]
        crate::metrics::set_connections(connections.len());
    }

    pub async fn unregister(&self, conn_id: &str) -> Option<ConnectionState> {
        let mut connections = self.connections.write().await;
        let removed = connections.remove(conn_id);
        #[cfg(feature = "metrics")]
        crate::metrics::set_connections(connections.len());
        removed
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Connection ids currently subscribed to `group`.
    pub async fn group_members(&self, group: &str) -> Vec<String> {
        let connections = self.connections.read().await;
        let mut members: Vec<String> = connections
            .values()
            .filter(|c| c.groups.contains(group))
            .map(|c| c.conn_id.clone())
            .collect();
        members.sort();
        members
    }

    /// Send a frame to a single connection. Returns false if it is gone.
    pub async fn send_to(&self, conn_id: &str, frame: &Frame) -> bool {
        let Some(msg) = encode(frame) else {
            return false;
        };
        let connections = self.connections.read().await;
        connections
            .get(conn_id)
            .is_some_and(|c| c.event_tx.send(msg).is_ok())
    }

    /// Send an event to a single connection, stamped with the next sequence number.
    pub async fn send_event_to(&self, conn_id: &str, event: &str, payload: Value) -> bool {
        let frame = self.stamped(event, payload);
        self.send_to(conn_id, &frame).await
    }

    /// Broadcast an event to all connected clients.
    pub async fn broadcast_event(&self, event: &str, payload: Value) {
        let frame = self.stamped(event, payload);
        let Some(msg) = encode(&frame) else {
            return;
        };

        let connections = self.connections.read().await;
        let mut sent = 0;
        for conn in connections.values() {
            if conn.event_tx.send(msg.clone()).is_ok() {
                sent += 1;
            }
        }
        debug!(event, sent, "Broadcast event");
    }

    fn stamped(&self, event: &str, payload: Value) -> Frame {
        Frame::Event {
            event: event.to_string(),
            payload: Some(payload),
            seq: Some(self.seq.fetch_add(1, Ordering::SeqCst) + 1),
        }
    }
}

fn encode(frame: &Frame) -> Option<String> {
    match serde_json::to_string(frame) {
        Ok(m) => Some(m),
        Err(e) => {
            error!(%e, "Failed to serialize frame");
            None
        }
    }
}

#[async_trait]
impl Broadcaster for ConnectionHub {
    async fn publish(&self, state: &DemoState) {
        match serde_json::to_value(state) {
            Ok(payload) => self.broadcast_event(EVENT_STATE_UPDATE, payload).await,
            Err(e) => error!(%e, "Failed to serialize demo state"),
        }
    }

    async fn publish_signal(&self, name: &str, payload: Value) {
        self.broadcast_event(EVENT_COMMAND, json!({ "name": name, "payload": payload }))
            .await;
    }

    async fn join_group(&self, session_id: &str, group: &str) {
        let mut connections = self.connections.write().await;
        match connections.get_mut(session_id) {
            Some(conn) => {
                conn.groups.insert(group.to_string());
                debug!(session_id, group, "Joined group");
            }
            None => debug!(session_id, group, "Join for unknown connection ignored"),
        }
    }

    async fn leave_group(&self, session_id: &str, group: &str) {
        let mut connections = self.connections.write().await;
        if let Some(conn) = connections.get_mut(session_id) {
            if conn.groups.remove(group) {
                debug!(session_id, group, "Left group");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use demo_relay_core::protocol::ClientRole;
    use std::collections::HashSet;
    use tokio::sync::mpsc;

    async fn connect(hub: &ConnectionHub, id: &str) -> mpsc::UnboundedReceiver<String> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        hub.register(ConnectionState {
            conn_id: id.to_string(),
            event_tx,
            role: ClientRole::Viewer,
            peer_addr: None,
            groups: HashSet::new(),
        })
        .await;
        event_rx
    }

    fn decode(msg: &str) -> Value {
        serde_json::from_str(msg).unwrap()
    }

    #[tokio::test]
    async fn test_publish_reaches_every_connection() {
        let hub = ConnectionHub::new();
        let mut a = connect(&hub, "a").await;
        let mut b = connect(&hub, "b").await;

        hub.publish(&DemoState::default()).await;

        for rx in [&mut a, &mut b] {
            let frame = decode(&rx.recv().await.unwrap());
            assert_eq!(frame["type"], "event");
            assert_eq!(frame["event"], "state_update");
            assert_eq!(frame["payload"]["status"], "idle");
            assert_eq!(frame["seq"], 1);
        }
    }

    #[tokio::test]
    async fn test_signal_is_wrapped_as_command() {
        let hub = ConnectionHub::new();
        let mut a = connect(&hub, "a").await;

        hub.publish_signal("navigate_to_home", json!({})).await;
        let frame = decode(&a.recv().await.unwrap());
        assert_eq!(frame["event"], "command");
        assert_eq!(frame["payload"]["name"], "navigate_to_home");
    }

    #[tokio::test]
    async fn test_dead_receiver_does_not_block_others() {
        let hub = ConnectionHub::new();
        let dead = connect(&hub, "dead").await;
        drop(dead);
        let mut live = connect(&hub, "live").await;

        hub.publish(&DemoState::default()).await;
        assert!(live.recv().await.is_some());
        assert!(!hub.send_event_to("dead", "state_update", json!({})).await);
    }

    #[tokio::test]
    async fn test_group_membership() {
        let hub = ConnectionHub::new();
        let _a = connect(&hub, "a").await;

        hub.join_group("a", "demo_controller_logic-gates").await;
        hub.join_group("ghost", "demo_controller_logic-gates").await;
        assert_eq!(
            hub.group_members("demo_controller_logic-gates").await,
            vec!["a".to_string()]
        );

        hub.leave_group("a", "demo_controller_logic-gates").await;
        assert!(hub.group_members("demo_controller_logic-gates").await.is_empty());

        assert!(hub.unregister("a").await.is_some());
        assert!(hub.is_empty().await);
    }
}
