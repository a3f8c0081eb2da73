//! Relay wire protocol.
//!
//! All relay traffic is JSON-over-WebSocket with three frame types:
//! Request, Response, and Event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version implemented by this relay.
pub const PROTOCOL_VERSION: u32 = 1;

/// Client methods.
pub const METHOD_CONTROLLER_INPUT: &str = "controller_input";
pub const METHOD_REQUEST_STATE: &str = "request_state";
pub const METHOD_IDENTIFY: &str = "identify";

/// Server events.
pub const EVENT_HELLO: &str = "hello";
pub const EVENT_SERVER_MESSAGE: &str = "server_message";
pub const EVENT_STATE_UPDATE: &str = "state_update";
pub const EVENT_COMMAND: &str = "command";

/// A relay wire frame, the top-level message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Client -> Server request.
    #[serde(rename = "req")]
    Request {
        id: String,
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },

    /// Server -> Client response.
    #[serde(rename = "res")]
    Response {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorShape>,
    },

    /// Server -> Client event broadcast.
    #[serde(rename = "event")]
    Event {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
}

impl Frame {
    pub fn ok(id: impl Into<String>, payload: Value) -> Self {
        Frame::Response {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn error(id: impl Into<String>, code: &str, message: impl Into<String>) -> Self {
        Frame::Response {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(ErrorShape {
                code: code.to_string(),
                message: message.into(),
                details: None,
            }),
        }
    }
}

/// Error shape returned in response frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Error codes carried in [`ErrorShape::code`].
pub mod codes {
    pub const INVALID_FRAME: &str = "invalid_frame";
    pub const INVALID_PARAMS: &str = "invalid_params";
    pub const INVALID_COMMAND: &str = "invalid_command";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const UNKNOWN_METHOD: &str = "unknown_method";
    pub const INTERNAL: &str = "internal_error";
}

/// Params of `controller_input`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerInputParams {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
    /// Client clock, milliseconds since the epoch.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// How a connection introduces itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    /// Asks to drive the demo. Admitted only if no controller is active.
    #[default]
    Controller,
    /// Display only. Never admitted.
    Viewer,
}

impl ClientRole {
    /// Parse a `?role=` query value. Anything but `viewer` asks for control.
    pub fn from_query(raw: Option<&str>) -> Self {
        match raw {
            Some(r) if r.eq_ignore_ascii_case("viewer") => ClientRole::Viewer,
            _ => ClientRole::Controller,
        }
    }
}

/// Params of `identify`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentifyParams {
    #[serde(default)]
    pub role: Option<String>,
}

/// Payload of the `hello` event sent once per connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    pub protocol: u32,
    pub conn_id: String,
    pub role: ClientRole,
    /// Whether this connection holds the controller role.
    pub authoritative: bool,
    pub server_version: String,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

impl Hello {
    pub fn new(conn_id: &str, role: ClientRole, authoritative: bool) -> Self {
        Self {
            protocol: PROTOCOL_VERSION,
            conn_id: conn_id.to_string(),
            role,
            authoritative,
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            methods: [METHOD_CONTROLLER_INPUT, METHOD_REQUEST_STATE, METHOD_IDENTIFY]
                .map(String::from)
                .to_vec(),
            events: [
                EVENT_HELLO,
                EVENT_SERVER_MESSAGE,
                EVENT_STATE_UPDATE,
                EVENT_COMMAND,
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}
