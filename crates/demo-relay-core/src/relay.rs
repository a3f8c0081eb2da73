//! The relay core: one lock around the demo state and the controller identity.
//!
//! Every operation follows the same shape: take the lock, mutate the in-memory
//! records, copy out a snapshot, drop the lock, then broadcast. Audit events
//! are spawned fire-and-forget after the lock is released.
//!
//! The publish gate is taken before the state lock is dropped, so broadcasts
//! leave in the order their mutations were committed.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::audit::{self, AuditEntry, AuditSink};
use crate::broadcast::Broadcaster;
use crate::catalog::DemoCatalog;
use crate::demo::DemoState;
use crate::machine::{self, Command, CommandError, Effect};
use crate::registry::{expiry_hook, Admission, ControllerSession, SessionRegistry};

/// Why a controller lost its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    Disconnect,
    Timeout,
}

/// Result of a controller command, reported back to the sender only.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// Sender is not the controller. Nothing changed and nothing was broadcast.
    Unauthorized,
    /// Command applied (possibly as a no-op) and the state was broadcast.
    Applied(DemoState),
    /// Command could not be decoded. State unchanged but rebroadcast.
    Rejected { error: CommandError, state: DemoState },
    /// Command failed while applying. State unchanged and not broadcast.
    Failed { error: CommandError, state: DemoState },
}

struct RelayInner {
    state: DemoState,
    registry: SessionRegistry,
}

/// Shared relay between one controller and many displays.
pub struct Relay {
    inner: Mutex<RelayInner>,
    /// Held from commit until the matching broadcast is out.
    publish_gate: Mutex<()>,
    catalog: DemoCatalog,
    broadcaster: Arc<dyn Broadcaster>,
    audit: Arc<dyn AuditSink>,
}

impl Relay {
    pub fn new(
        catalog: DemoCatalog,
        controller_timeout: Duration,
        broadcaster: Arc<dyn Broadcaster>,
        audit: Arc<dyn AuditSink>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Relay>| {
            let weak = weak.clone();
            let on_expiry = expiry_hook(move |session_id, generation| {
                let weak = weak.clone();
                async move {
                    if let Some(relay) = weak.upgrade() {
                        relay.expire(&session_id, generation).await;
                    }
                }
            });

            Self {
                inner: Mutex::new(RelayInner {
                    state: DemoState::default(),
                    registry: SessionRegistry::new(controller_timeout, on_expiry),
                }),
                publish_gate: Mutex::new(()),
                catalog,
                broadcaster,
                audit,
            }
        })
    }

    pub fn catalog(&self) -> &DemoCatalog {
        &self.catalog
    }

    /// Try to make `session_id` the controller. Publishes state on success.
    pub async fn admit(&self, session_id: &str, peer_addr: Option<SocketAddr>) -> Admission {
        let (admission, snapshot, gate) = {
            let mut inner = self.inner.lock().await;
            let admission = inner.registry.admit(session_id, peer_addr);
            let gate = if admission.accepted() {
                Some(self.publish_gate.lock().await)
            } else {
                None
            };
            (admission, inner.state.clone(), gate)
        };

        if admission.accepted() {
            self.broadcaster.publish(&snapshot).await;
            drop(gate);
            let peer = peer_addr
                .map(|a| a.ip().to_string())
                .unwrap_or_else(|| "unknown".into());
            self.record(
                "connect",
                format!("Controller connected from {peer} (session: {session_id})"),
            );
        }
        admission
    }

    /// Handle a departing session. Only the controller's departure resets state.
    pub async fn release(&self, session_id: &str) -> bool {
        self.release_with(session_id, ReleaseReason::Disconnect, None)
            .await
    }

    async fn expire(&self, session_id: &str, generation: u64) {
        if self
            .release_with(session_id, ReleaseReason::Timeout, Some(generation))
            .await
        {
            warn!(session_id, "Controller timed out after inactivity");
        }
    }

    async fn release_with(
        &self,
        session_id: &str,
        reason: ReleaseReason,
        generation: Option<u64>,
    ) -> bool {
        let (released, previous_demo, snapshot, gate) = {
            let mut inner = self.inner.lock().await;
            if let Some(generation) = generation {
                if !inner.registry.claim_expiry(session_id, generation) {
                    return false;
                }
            }
            let Some(released) = inner.registry.release(session_id) else {
                return false;
            };
            let previous_demo = inner.state.current_demo.clone();
            inner.state.reset();
            let gate = self.publish_gate.lock().await;
            (released, previous_demo, inner.state.clone(), gate)
        };

        info!(session_id, ?reason, "Controller released, demo state reset");
        if let Some(demo) = previous_demo {
            self.broadcaster
                .leave_group(&released.session_id, &machine::demo_group(&demo))
                .await;
        }
        self.broadcaster.publish(&snapshot).await;
        drop(gate);

        let details = match reason {
            ReleaseReason::Disconnect => format!("Controller disconnected (session: {session_id})"),
            ReleaseReason::Timeout => format!("Controller timed out (session: {session_id})"),
        };
        self.record("disconnect", details);
        true
    }

    pub async fn is_authoritative(&self, session_id: &str) -> bool {
        self.inner.lock().await.registry.is_authoritative(session_id)
    }

    /// Restart the controller's inactivity timer.
    pub async fn touch(&self, session_id: &str) -> bool {
        self.inner.lock().await.registry.touch(session_id)
    }

    /// Run one controller command through the state machine.
    pub async fn handle_command(
        &self,
        session_id: &str,
        action: Option<&str>,
        payload: Option<Value>,
        client_timestamp: Option<i64>,
    ) -> CommandOutcome {
        let (outcome, effects, gate) = {
            let mut inner = self.inner.lock().await;
            if !inner.registry.is_authoritative(session_id) {
                warn!(session_id, ?action, "Ignoring input from unauthorized session");
                return CommandOutcome::Unauthorized;
            }
            inner.registry.touch(session_id);

            match Command::parse(action, payload) {
                Err(error) => {
                    warn!(session_id, %error, "Malformed controller input");
                    let state = inner.state.clone();
                    (
                        CommandOutcome::Rejected { error, state },
                        Vec::new(),
                        self.publish_gate.lock().await,
                    )
                }
                Ok(command) => {
                    info!(session_id, action = command.name(), "Controller input");
                    match machine::apply(&inner.state, &self.catalog, command, client_timestamp) {
                        Ok(transition) => {
                            inner.state = transition.state;
                            (
                                CommandOutcome::Applied(inner.state.clone()),
                                transition.effects,
                                self.publish_gate.lock().await,
                            )
                        }
                        Err(error) => {
                            error!(session_id, %error, "Error processing controller input");
                            return CommandOutcome::Failed {
                                error,
                                state: inner.state.clone(),
                            };
                        }
                    }
                }
            }
        };

        match &outcome {
            CommandOutcome::Applied(state) => {
                self.run_effects(session_id, effects).await;
                self.broadcaster.publish(state).await;
            }
            CommandOutcome::Rejected { state, .. } => self.broadcaster.publish(state).await,
            CommandOutcome::Unauthorized | CommandOutcome::Failed { .. } => {}
        }
        drop(gate);
        outcome
    }

    /// Administrative full reset. Publishes the reset state.
    pub async fn reset(&self) -> DemoState {
        let (controller, effects, snapshot, gate) = {
            let mut inner = self.inner.lock().await;
            let controller = inner.registry.controller().map(|c| c.session_id.clone());
            let effects = match machine::apply(&inner.state, &self.catalog, Command::Reset, None) {
                Ok(transition) => {
                    inner.state = transition.state;
                    transition.effects
                }
                Err(_) => {
                    inner.state.reset();
                    Vec::new()
                }
            };
            (controller, effects, inner.state.clone(), self.publish_gate.lock().await)
        };

        info!("Demo state reset");
        if let Some(controller) = controller {
            self.run_effects(&controller, effects).await;
        }
        self.broadcaster.publish(&snapshot).await;
        drop(gate);
        snapshot
    }

    /// Current state snapshot.
    pub async fn snapshot(&self) -> DemoState {
        self.inner.lock().await.state.clone()
    }

    pub async fn controller(&self) -> Option<ControllerSession> {
        self.inner.lock().await.registry.controller().cloned()
    }

    /// Recent audit entries, newest first.
    pub async fn recent_events(&self, limit: usize) -> Vec<AuditEntry> {
        self.audit.recent(limit).await
    }

    /// Purge audit entries older than `days`.
    pub async fn purge_events(&self, days: u32) -> bool {
        self.audit
            .purge_older_than(audit::retention_days(days))
            .await
    }

    async fn run_effects(&self, session_id: &str, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::JoinGroup(group) => self.broadcaster.join_group(session_id, &group).await,
                Effect::LeaveGroup(group) => {
                    self.broadcaster.leave_group(session_id, &group).await
                }
                Effect::Signal { name, payload } => {
                    self.broadcaster.publish_signal(&name, payload).await
                }
            }
        }
    }

    fn record(&self, event_type: &'static str, details: String) {
        let audit = self.audit.clone();
        tokio::spawn(async move {
            if !audit.record_event(event_type, &details).await {
                warn!(event_type, "Audit event not recorded");
            }
        });
    }
}
