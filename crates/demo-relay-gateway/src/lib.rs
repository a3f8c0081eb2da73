//! WebSocket gateway for Demo Relay.
//!
//! The gateway hosts the WebSocket server, admits the single controller,
//! dispatches its commands into the relay, and fans every state change out to
//! the connected displays. A small REST surface exposes status, reset, and the
//! interaction log.

pub mod connection;
pub mod events;
pub mod methods;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod state;

pub use events::ConnectionHub;
pub use server::{build_router, start_gateway};
pub use state::GatewayState;
