//! Controller session registry: single-controller admission control.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::timeout::TimeoutScheduler;

/// Invoked with `(session_id, generation)` when a controller's inactivity timer expires.
pub type ExpiryHook =
    Arc<dyn Fn(String, u64) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Box an async callback into an [`ExpiryHook`].
pub fn expiry_hook<F, Fut>(f: F) -> ExpiryHook
where
    F: Fn(String, u64) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(
        move |session_id: String, generation: u64| -> Pin<Box<dyn Future<Output = ()> + Send>> {
            Box::pin(f(session_id, generation))
        },
    )
}

/// The connection currently allowed to drive the demo.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerSession {
    pub session_id: String,
    pub peer_addr: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
    pub last_input_at: DateTime<Utc>,
    pub is_authoritative: bool,
}

/// Outcome of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// Another session already controls the demo; this one is read-only.
    Auxiliary,
}

impl Admission {
    pub fn accepted(self) -> bool {
        self == Admission::Accepted
    }
}

/// Tracks the authoritative controller and its inactivity timer.
///
/// Not synchronised on its own; the relay keeps it behind the same lock as
/// the demo state.
pub struct SessionRegistry {
    controller: Option<ControllerSession>,
    timeout: TimeoutScheduler,
    timeout_duration: Duration,
    on_expiry: ExpiryHook,
}

impl SessionRegistry {
    pub fn new(timeout_duration: Duration, on_expiry: ExpiryHook) -> Self {
        Self {
            controller: None,
            timeout: TimeoutScheduler::new(),
            timeout_duration,
            on_expiry,
        }
    }

    /// Admit `session_id` as controller if nobody holds the role.
    pub fn admit(&mut self, session_id: &str, peer_addr: Option<SocketAddr>) -> Admission {
        if let Some(active) = &self.controller {
            warn!(
                session_id,
                active = %active.session_id,
                "Secondary connection while a controller is active"
            );
            return Admission::Auxiliary;
        }

        let now = Utc::now();
        self.controller = Some(ControllerSession {
            session_id: session_id.to_string(),
            peer_addr,
            connected_at: now,
            last_input_at: now,
            is_authoritative: true,
        });
        self.arm(session_id);
        info!(session_id, peer = ?peer_addr, "Controller admitted");
        Admission::Accepted
    }

    /// Drop `session_id` if it is the controller, returning the released session.
    pub fn release(&mut self, session_id: &str) -> Option<ControllerSession> {
        if !self.is_authoritative(session_id) {
            info!(session_id, "Auxiliary session disconnected");
            return None;
        }
        self.timeout.cancel();
        let mut released = self.controller.take()?;
        released.is_authoritative = false;
        Some(released)
    }

    pub fn is_authoritative(&self, session_id: &str) -> bool {
        self.controller
            .as_ref()
            .is_some_and(|c| c.is_authoritative && c.session_id == session_id)
    }

    /// Record controller activity and restart the inactivity timer.
    pub fn touch(&mut self, session_id: &str) -> bool {
        let Some(controller) = self.controller.as_mut() else {
            return false;
        };
        if controller.session_id != session_id {
            return false;
        }
        controller.last_input_at = Utc::now();
        self.arm(session_id);
        true
    }

    /// Accept a timer expiry if it belongs to the live timer of `session_id`.
    pub fn claim_expiry(&mut self, session_id: &str, generation: u64) -> bool {
        self.is_authoritative(session_id) && self.timeout.claim_expiry(generation)
    }

    pub fn controller(&self) -> Option<&ControllerSession> {
        self.controller.as_ref()
    }

    pub fn timeout_armed(&self) -> bool {
        self.timeout.is_armed()
    }

    fn arm(&mut self, session_id: &str) {
        let hook = self.on_expiry.clone();
        let session_id = session_id.to_string();
        self.timeout
            .arm(self.timeout_duration, move |generation| hook(session_id, generation));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn noop_hook() -> ExpiryHook {
        expiry_hook(|_, _| async {})
    }

    fn recording_hook(log: Arc<Mutex<Vec<(String, u64)>>>) -> ExpiryHook {
        expiry_hook(move |session_id, generation| {
            log.lock().unwrap().push((session_id, generation));
            async {}
        })
    }

    #[tokio::test]
    async fn test_first_admit_wins() {
        let mut registry = SessionRegistry::new(Duration::from_secs(120), noop_hook());
        assert_eq!(registry.admit("s1", None), Admission::Accepted);
        assert_eq!(registry.admit("s2", None), Admission::Auxiliary);
        assert!(registry.is_authoritative("s1"));
        assert!(!registry.is_authoritative("s2"));
        assert!(registry.timeout_armed());
    }

    #[tokio::test]
    async fn test_release_only_for_controller() {
        let mut registry = SessionRegistry::new(Duration::from_secs(120), noop_hook());
        registry.admit("s1", None);

        assert!(registry.release("s2").is_none());
        assert!(registry.is_authoritative("s1"));

        let released = registry.release("s1").unwrap();
        assert_eq!(released.session_id, "s1");
        assert!(!released.is_authoritative);
        assert!(registry.controller().is_none());
        assert!(!registry.timeout_armed());

        assert_eq!(registry.admit("s2", None), Admission::Accepted);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_auxiliary_departure_logged_at_info() {
        let mut registry = SessionRegistry::new(Duration::from_secs(120), noop_hook());
        registry.admit("s1", None);

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            assert!(registry.release("s2").is_none());
        });

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("INFO"), "{output}");
        assert!(output.contains("Auxiliary session disconnected"), "{output}");
    }

    #[tokio::test]
    async fn test_touch_rejects_other_sessions() {
        let mut registry = SessionRegistry::new(Duration::from_secs(120), noop_hook());
        assert!(!registry.touch("s1"));
        registry.admit("s1", None);
        assert!(registry.touch("s1"));
        assert!(!registry.touch("s2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_rearms_timer() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SessionRegistry::new(Duration::from_secs(10), recording_hook(log.clone()));
        registry.admit("s1", None);

        tokio::time::sleep(Duration::from_secs(8)).await;
        registry.touch("s1");
        tokio::time::sleep(Duration::from_secs(8)).await;
        tokio::task::yield_now().await;
        assert!(log.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        let fired = log.lock().unwrap().clone();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, "s1");
        assert!(registry.claim_expiry("s1", fired[0].1));
    }

    #[tokio::test]
    async fn test_stale_expiry_is_not_claimed() {
        let mut registry = SessionRegistry::new(Duration::from_secs(60), noop_hook());
        registry.admit("s1", None);
        registry.touch("s1");
        // Generation 1 was superseded by the touch.
        assert!(!registry.claim_expiry("s1", 1));
        assert!(!registry.claim_expiry("s2", 2));
        assert!(registry.claim_expiry("s1", 2));
    }
}
