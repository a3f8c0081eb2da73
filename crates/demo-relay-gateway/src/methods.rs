//! Gateway method handlers.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use demo_relay_core::protocol::{
    codes, ControllerInputParams, Frame, IdentifyParams, EVENT_SERVER_MESSAGE,
    METHOD_CONTROLLER_INPUT, METHOD_IDENTIFY, METHOD_REQUEST_STATE,
};
use demo_relay_core::CommandOutcome;

use crate::state::GatewayState;

/// Dispatch a method request from `conn_id` and return the response frame.
pub async fn dispatch_method(
    state: &Arc<GatewayState>,
    conn_id: &str,
    request_id: &str,
    method: &str,
    params: Option<Value>,
) -> Frame {
    debug!(conn_id, method, "Dispatching method");

    #[cfg(feature = "metrics")]
    let start = std::time::Instant::now();

    let response = dispatch_method_inner(state, conn_id, request_id, method, params).await;

    #[cfg(feature = "metrics")]
    crate::metrics::record_request(method, start.elapsed().as_secs_f64());

    response
}

async fn dispatch_method_inner(
    state: &Arc<GatewayState>,
    conn_id: &str,
    request_id: &str,
    method: &str,
    params: Option<Value>,
) -> Frame {
    match method {
        METHOD_CONTROLLER_INPUT => handle_controller_input(state, conn_id, request_id, params).await,
        METHOD_REQUEST_STATE => handle_request_state(state, request_id).await,
        METHOD_IDENTIFY => handle_identify(conn_id, request_id, params),
        _ => Frame::error(
            request_id,
            codes::UNKNOWN_METHOD,
            format!("Unknown method: {method}"),
        ),
    }
}

async fn handle_controller_input(
    state: &Arc<GatewayState>,
    conn_id: &str,
    request_id: &str,
    params: Option<Value>,
) -> Frame {
    let params: ControllerInputParams = match params {
        None => ControllerInputParams::default(),
        Some(p) => match serde_json::from_value(p) {
            Ok(p) => p,
            Err(e) => return Frame::error(request_id, codes::INVALID_PARAMS, e.to_string()),
        },
    };

    let outcome = state
        .relay
        .handle_command(
            conn_id,
            params.action.as_deref(),
            params.payload,
            params.timestamp,
        )
        .await;

    match outcome {
        CommandOutcome::Unauthorized => {
            #[cfg(feature = "metrics")]
            crate::metrics::record_error("unauthorized");
            Frame::error(
                request_id,
                codes::UNAUTHORIZED,
                "This connection is not the active controller",
            )
        }
        CommandOutcome::Applied(demo) => Frame::ok(request_id, json!({ "state": demo })),
        CommandOutcome::Rejected { error, .. } => {
            #[cfg(feature = "metrics")]
            crate::metrics::record_error("invalid_command");
            Frame::error(request_id, codes::INVALID_COMMAND, error.to_string())
        }
        CommandOutcome::Failed { error, .. } => {
            #[cfg(feature = "metrics")]
            crate::metrics::record_error("command_failed");
            let message = format!("Error processing input: {error}");
            state
                .hub
                .send_event_to(conn_id, EVENT_SERVER_MESSAGE, json!({ "data": message }))
                .await;
            Frame::error(request_id, codes::INTERNAL, message)
        }
    }
}

async fn handle_request_state(state: &Arc<GatewayState>, request_id: &str) -> Frame {
    let demo = state.relay.snapshot().await;
    Frame::ok(request_id, json!({ "state": demo }))
}

fn handle_identify(conn_id: &str, request_id: &str, params: Option<Value>) -> Frame {
    let params: IdentifyParams = match params.map(serde_json::from_value::<IdentifyParams>).transpose() {
        Ok(p) => p.unwrap_or_default(),
        Err(e) => {
            warn!(conn_id, %e, "Invalid identify params");
            return Frame::error(request_id, codes::INVALID_PARAMS, e.to_string());
        }
    };
    info!(conn_id, role = ?params.role, "Client identified");
    Frame::ok(request_id, json!({ "acknowledged": true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use demo_relay_core::audit::MemoryAuditSink;
    use demo_relay_core::config::Config;
    use demo_relay_core::protocol::ClientRole;
    use tokio::sync::mpsc;

    use crate::state::ConnectionState;

    async fn gateway_with(ids: &[&str]) -> (Arc<GatewayState>, Vec<mpsc::UnboundedReceiver<String>>) {
        let state = Arc::new(GatewayState::new(
            Arc::new(Config::default()),
            Arc::new(MemoryAuditSink::new()),
        ));
        let mut receivers = Vec::new();
        for id in ids {
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            state
                .hub
                .register(ConnectionState {
                    conn_id: id.to_string(),
                    event_tx,
                    role: ClientRole::Controller,
                    peer_addr: None,
                    groups: HashSet::new(),
                })
                .await;
            receivers.push(event_rx);
        }
        (state, receivers)
    }

    fn response_parts(frame: Frame) -> (bool, Option<Value>, Option<String>) {
        match frame {
            Frame::Response {
                ok, payload, error, ..
            } => (ok, payload, error.map(|e| e.code)),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_controller_input_applies() {
        let (state, _rx) = gateway_with(&["c1"]).await;
        state.relay.admit("c1", None).await;

        let frame = dispatch_method(
            &state,
            "c1",
            "r1",
            METHOD_CONTROLLER_INPUT,
            Some(json!({"action": "set_demo", "payload": {"demo": "/logic-gates"}})),
        )
        .await;
        let (ok, payload, _) = response_parts(frame);
        assert!(ok);
        assert_eq!(payload.unwrap()["state"]["current_demo"], "logic-gates");
        assert_eq!(
            state.hub.group_members("demo_controller_logic-gates").await,
            vec!["c1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_controller_input_from_auxiliary_is_unauthorized() {
        let (state, _rx) = gateway_with(&["c1", "c2"]).await;
        state.relay.admit("c1", None).await;
        state.relay.admit("c2", None).await;

        let frame = dispatch_method(
            &state,
            "c2",
            "r1",
            METHOD_CONTROLLER_INPUT,
            Some(json!({"action": "start_sorting"})),
        )
        .await;
        let (ok, _, code) = response_parts(frame);
        assert!(!ok);
        assert_eq!(code.as_deref(), Some(codes::UNAUTHORIZED));
        assert!(state.relay.snapshot().await.is_reset());
    }

    #[tokio::test]
    async fn test_missing_action_is_invalid_command() {
        let (state, _rx) = gateway_with(&["c1"]).await;
        state.relay.admit("c1", None).await;

        let frame = dispatch_method(&state, "c1", "r1", METHOD_CONTROLLER_INPUT, None).await;
        let (ok, _, code) = response_parts(frame);
        assert!(!ok);
        assert_eq!(code.as_deref(), Some(codes::INVALID_COMMAND));
    }

    #[tokio::test]
    async fn test_bad_params_shape() {
        let (state, _rx) = gateway_with(&["c1"]).await;
        let frame = dispatch_method(
            &state,
            "c1",
            "r1",
            METHOD_CONTROLLER_INPUT,
            Some(json!({"action": 5})),
        )
        .await;
        let (_, _, code) = response_parts(frame);
        assert_eq!(code.as_deref(), Some(codes::INVALID_PARAMS));
    }

    #[tokio::test]
    async fn test_request_state_and_unknown_method() {
        let (state, _rx) = gateway_with(&["v1"]).await;

        let (ok, payload, _) =
            response_parts(dispatch_method(&state, "v1", "r1", METHOD_REQUEST_STATE, None).await);
        assert!(ok);
        assert_eq!(payload.unwrap()["state"]["status"], "idle");

        let (ok, _, code) =
            response_parts(dispatch_method(&state, "v1", "r2", "teleport", None).await);
        assert!(!ok);
        assert_eq!(code.as_deref(), Some(codes::UNKNOWN_METHOD));
    }

    #[tokio::test]
    async fn test_identify_is_acknowledged() {
        let (state, _rx) = gateway_with(&["v1"]).await;
        let (ok, _, _) = response_parts(
            dispatch_method(
                &state,
                "v1",
                "r1",
                METHOD_IDENTIFY,
                Some(json!({"role": "demo-site"})),
            )
            .await,
        );
        assert!(ok);
    }
}
