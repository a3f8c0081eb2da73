//! Broadcast transport boundary.

use async_trait::async_trait;

use crate::demo::DemoState;

/// Fan-out of state changes to every connected display.
///
/// Delivery is best effort: implementations must not block on slow viewers
/// and must not fail.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Send the full state snapshot to every connection.
    async fn publish(&self, state: &DemoState);

    /// Send a one-off named event to every connection.
    async fn publish_signal(&self, name: &str, payload: serde_json::Value);

    /// Add a session to a subscription group.
    async fn join_group(&self, session_id: &str, group: &str);

    /// Remove a session from a subscription group.
    async fn leave_group(&self, session_id: &str, group: &str);
}
