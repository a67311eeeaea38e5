//! Status freshness tracking
//!
//! Fetched status is trusted for a fixed window. Each successful fetch
//! restarts the window; when it lapses without a new fetch the status is
//! stale. The tracker starts stale.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    deadline: Option<Instant>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
    closed: bool,
}

/// Restartable countdown over status freshness
#[derive(Clone)]
pub struct FreshnessTracker {
    timeout: Duration,
    inner: Arc<Mutex<Inner>>,
    fresh_tx: Arc<watch::Sender<bool>>,
}

impl FreshnessTracker {
    pub fn new(timeout: Duration) -> Self {
        let (fresh_tx, _) = watch::channel(false);
        Self {
            timeout,
            inner: Arc::new(Mutex::new(Inner::default())),
            fresh_tx: Arc::new(fresh_tx),
        }
    }

    /// Mark status fresh and restart the expiry timer.
    ///
    /// Only a successful status fetch may call this. Must be called from
    /// within a Tokio runtime.
    pub fn on_fetch_succeeded(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }

        let deadline = Instant::now() + self.timeout;
        inner.deadline = Some(deadline);
        inner.generation += 1;
        let generation = inner.generation;

        let state = Arc::clone(&self.inner);
        let fresh_tx = Arc::clone(&self.fresh_tx);
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let mut inner = state.lock();
            if inner.generation == generation {
                inner.timer = None;
                drop(inner);
                debug!("Status went stale");
                fresh_tx.send_replace(false);
            }
        }));
        drop(inner);

        self.fresh_tx.send_replace(true);
    }

    /// True while the last successful fetch is within the window
    pub fn is_fresh(&self) -> bool {
        self.inner
            .lock()
            .deadline
            .is_some_and(|deadline| Instant::now() < deadline)
    }

    /// Time left before status goes stale
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .lock()
            .deadline
            .and_then(|deadline| deadline.checked_duration_since(Instant::now()))
            .filter(|d| !d.is_zero())
    }

    /// Receiver notified on every fresh/stale flip
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.fresh_tx.subscribe()
    }

    /// Cancel the expiry timer and refuse further restarts
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
    }
}

impl std::fmt::Debug for FreshnessTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreshnessTracker")
            .field("timeout", &self.timeout)
            .field("fresh", &self.is_fresh())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    const MS: Duration = Duration::from_millis(1);

    #[tokio::test(start_paused = true)]
    async fn test_starts_stale() {
        let tracker = FreshnessTracker::new(Duration::from_secs(30));
        assert!(!tracker.is_fresh());
        assert!(tracker.remaining().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_boundaries() {
        for timeout in [MS, Duration::from_secs(1), Duration::from_secs(30)] {
            let tracker = FreshnessTracker::new(timeout);
            tracker.on_fetch_succeeded();
            assert!(tracker.is_fresh());

            advance(timeout - MS).await;
            assert!(tracker.is_fresh(), "fresh just before {:?}", timeout);

            advance(MS).await;
            assert!(!tracker.is_fresh(), "stale at {:?}", timeout);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_resets_window() {
        let timeout = Duration::from_secs(30);
        let tracker = FreshnessTracker::new(timeout);
        tracker.on_fetch_succeeded();

        advance(Duration::from_secs(20)).await;
        tracker.on_fetch_succeeded();

        // Not cumulative: the window is 30s from the second fetch
        advance(Duration::from_secs(29)).await;
        assert!(tracker.is_fresh());
        assert_eq!(tracker.remaining(), Some(Duration::from_secs(1)));

        advance(Duration::from_secs(1)).await;
        assert!(!tracker.is_fresh());
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifies_expiry_once() {
        let tracker = FreshnessTracker::new(Duration::from_secs(10));
        let mut rx = tracker.subscribe();

        tracker.on_fetch_succeeded();
        assert!(*rx.borrow_and_update());

        // Superseded timer must not flip the flag early
        advance(Duration::from_secs(5)).await;
        tracker.on_fetch_succeeded();
        assert!(*rx.borrow_and_update());
        advance(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert!(!rx.has_changed().unwrap());

        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
        assert!(!tracker.is_fresh());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_restarts() {
        let tracker = FreshnessTracker::new(Duration::from_secs(10));
        tracker.shutdown();
        tracker.on_fetch_succeeded();
        assert!(!tracker.is_fresh());
    }
}
