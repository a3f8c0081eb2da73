//! Cancellable, restartable delayed action.

use std::future::Future;
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::trace;

/// A single-slot timer: arming always cancels the previous timer first.
///
/// Each arm produces a new generation number that is handed to the expiry
/// callback. Owners compare it against [`TimeoutScheduler::claim_expiry`] so a
/// callback that was already running when the timer got re-armed cannot act.
#[derive(Debug, Default)]
pub struct TimeoutScheduler {
    generation: u64,
    handle: Option<AbortHandle>,
}

impl TimeoutScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a timer that calls `on_expiry(generation)` after `duration`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F, Fut>(&mut self, duration: Duration, on_expiry: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;

        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            on_expiry(generation).await;
        });
        self.handle = Some(task.abort_handle());
        trace!(generation, ?duration, "Timeout armed");
        generation
    }

    /// Cancel the pending timer, if any. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                trace!(generation = self.generation, "Timeout cancelled");
                true
            }
            None => false,
        }
    }

    /// Accept an expiry for `generation` if it is still the live timer.
    ///
    /// On success the slot is cleared without aborting, since the caller is
    /// running inside the expiring task.
    pub fn claim_expiry(&mut self, generation: u64) -> bool {
        if self.handle.is_some() && self.generation == generation {
            self.handle = None;
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for TimeoutScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

    fn counting(counter: &Arc<AtomicU32>) -> impl FnOnce(u64) -> std::future::Ready<()> + Send + 'static {
        let counter = counter.clone();
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    async fn advance(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
        // Let spawned timer tasks observe the new time.
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_duration() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut timer = TimeoutScheduler::new();
        timer.arm(Duration::from_secs(120), counting(&fired));

        advance(119).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        advance(2).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        advance(300).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_expiry_and_is_idempotent() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut timer = TimeoutScheduler::new();
        timer.arm(Duration::from_secs(5), counting(&fired));

        assert!(timer.cancel());
        assert!(!timer.cancel());
        assert!(!timer.is_armed());

        advance(10).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_invalidates_prior_timer() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut timer = TimeoutScheduler::new();

        let first = timer.arm(Duration::from_secs(10), counting(&fired));
        advance(8).await;
        let second = timer.arm(Duration::from_secs(10), counting(&fired));
        assert_eq!(second, first + 1);

        // The first deadline passes without firing.
        advance(4).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        advance(7).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_receives_generation() {
        let seen = Arc::new(AtomicU64::new(0));
        let mut timer = TimeoutScheduler::new();
        let sink = seen.clone();
        let generation = timer.arm(Duration::from_secs(1), move |g| {
            sink.store(g, Ordering::SeqCst);
            std::future::ready(())
        });

        advance(2).await;
        assert_eq!(seen.load(Ordering::SeqCst), generation);
    }

    #[tokio::test]
    async fn test_claim_expiry_only_for_live_generation() {
        let mut timer = TimeoutScheduler::new();
        let first = timer.arm(Duration::from_secs(60), |_| std::future::ready(()));
        let second = timer.arm(Duration::from_secs(60), |_| std::future::ready(()));

        assert!(!timer.claim_expiry(first));
        assert!(timer.claim_expiry(second));
        assert!(!timer.claim_expiry(second));
        assert!(!timer.is_armed());
    }
}
