//! Gateway shared state.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use demo_relay_core::audit::AuditSink;
use demo_relay_core::config::Config;
use demo_relay_core::protocol::ClientRole;
use demo_relay_core::Relay;

use crate::events::ConnectionHub;

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub relay: Arc<Relay>,
    pub hub: Arc<ConnectionHub>,
    #[cfg(feature = "metrics")]
    pub metrics_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

/// Per-connection state.
pub struct ConnectionState {
    pub conn_id: String,
    pub event_tx: mpsc::UnboundedSender<String>,
    pub role: ClientRole,
    pub peer_addr: Option<SocketAddr>,
    /// Subscription groups this connection belongs to.
    pub groups: HashSet<String>,
}

impl GatewayState {
    pub fn new(config: Arc<Config>, audit: Arc<dyn AuditSink>) -> Self {
        let hub = Arc::new(ConnectionHub::new());
        let relay = Relay::new(
            config.catalog(),
            config.controller_timeout(),
            hub.clone(),
            audit,
        );

        Self {
            config,
            relay,
            hub,
            #[cfg(feature = "metrics")]
            metrics_handle: None,
        }
    }

    /// Attach a Prometheus handle so `/metrics` can render it.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}
