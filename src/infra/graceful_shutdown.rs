//! Graceful shutdown handling
//!
//! SIGINT/SIGTERM close the listen socket, in-flight session handlers are
//! drained, pools are closed by the caller, and the process exits 0.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Cloneable handle observing shutdown state
#[derive(Clone)]
pub struct ShutdownSignal {
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is initiated.
    pub async fn wait(&self) {
        if self.is_shutdown() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Tracks in-flight session handlers for draining
#[derive(Default)]
pub struct HandlerTracker {
    active: AtomicU64,
    total: AtomicU64,
}

impl HandlerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a handler starting; the guard decrements on drop.
    pub fn handler_start(&self) -> HandlerGuard<'_> {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
        HandlerGuard { tracker: self }
    }

    pub fn active_count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Wait until no handlers remain, bounded by `timeout`.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut poll = tokio::time::interval(Duration::from_millis(100));

        loop {
            if self.active_count() == 0 {
                info!("all in-flight handlers drained");
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(active = self.active_count(), "handler drain timed out");
                return false;
            }
            poll.tick().await;
        }
    }
}

/// Guard that decrements the active count when dropped
pub struct HandlerGuard<'a> {
    tracker: &'a HandlerTracker,
}

impl Drop for HandlerGuard<'_> {
    fn drop(&mut self) {
        self.tracker.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Coordinates shutdown across the listener and session tasks
pub struct ShutdownCoordinator {
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
    tracker: Arc<HandlerTracker>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
            tracker: Arc::new(HandlerTracker::new()),
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            shutdown: self.shutdown.clone(),
            notify: self.notify.clone(),
        }
    }

    pub fn tracker(&self) -> Arc<HandlerTracker> {
        self.tracker.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Initiate shutdown and wake every waiter.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("initiating graceful shutdown");
        self.notify.notify_waiters();
    }

    /// Initiate shutdown and wait for in-flight handlers to drain.
    pub async fn graceful_shutdown(&self, drain_timeout: Duration) {
        self.shutdown();
        info!(
            active = self.tracker.active_count(),
            "waiting for in-flight handlers"
        );
        self.tracker.wait_for_drain(drain_timeout).await;
        info!("graceful shutdown complete");
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve when SIGINT or SIGTERM arrives.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler");
        tokio::select! {
            _ = signal::ctrl_c() => info!("SIGINT received, shutting down"),
            _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.expect("Ctrl+C handler");
        info!("Ctrl+C received, shutting down");
    }
}
