//! Graceful shutdown controller with in-flight request tracking.
//!
//! Uses `ArcSwap` for lock-free phase transitions and an atomic counter
//! with RAII guards so the drain logic sees an accurate in-flight count
//! even when a handler panics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Server lifecycle phase, transitioned by the shutdown controller.
///
/// Phase machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    /// Process is initializing; not yet accepting requests.
    Starting,
    /// Fully operational.
    Ready,
    /// Draining in-flight requests; no new requests should be routed here.
    Draining,
    /// All in-flight requests completed; process is exiting.
    Stopped,
}

impl ServerPhase {
    /// Stable label used in health payloads and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Coordinates graceful shutdown across the server.
///
/// 1. The health aggregator reads [`phase`](Self::phase) for liveness and
///    readiness answers.
/// 2. The pipeline's ingress stage holds an [`InFlightGuard`] per request.
/// 3. [`trigger_shutdown`](Self::trigger_shutdown) moves to Draining and
///    signals listeners.
/// 4. [`wait_for_drain`](Self::wait_for_drain) blocks until in-flight
///    requests finish or the timeout expires.
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    phase: Arc<ArcSwap<ServerPhase>>,
}

impl ShutdownController {
    /// Creates a controller in the `Starting` phase.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            in_flight: Arc::new(AtomicU64::new(0)),
            phase: Arc::new(ArcSwap::from_pointee(ServerPhase::Starting)),
        }
    }

    /// Transitions to `Ready`; readiness probes start passing.
    pub fn set_ready(&self) {
        self.phase.store(Arc::new(ServerPhase::Ready));
    }

    /// Returns a receiver notified when shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Initiates graceful shutdown: phase moves to `Draining` and all
    /// shutdown receivers are signalled.
    pub fn trigger_shutdown(&self) {
        self.phase.store(Arc::new(ServerPhase::Draining));
        // Ignore send errors -- receivers may have been dropped.
        let _ = self.shutdown_signal.send(true);
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> ServerPhase {
        **self.phase.load()
    }

    /// Creates an RAII guard counting one in-flight request.
    ///
    /// The counter is decremented when the guard drops, including during
    /// unwinding from a handler panic.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Number of requests currently in flight.
    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits for in-flight requests to finish, up to the timeout.
    ///
    /// Returns `true` and transitions to `Stopped` on a clean drain;
    /// returns `false` (still `Draining`) when the timeout expires.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                self.phase.store(Arc::new(ServerPhase::Stopped));
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            // Poll at 10ms intervals to avoid busy-waiting.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard decrementing the in-flight counter on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_phase_is_starting() {
        let controller = ShutdownController::new();
        assert_eq!(controller.phase(), ServerPhase::Starting);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[test]
    fn phase_transitions_starting_ready_draining() {
        let controller = ShutdownController::new();

        controller.set_ready();
        assert_eq!(controller.phase(), ServerPhase::Ready);

        controller.trigger_shutdown();
        assert_eq!(controller.phase(), ServerPhase::Draining);
    }

    #[test]
    fn in_flight_guards_count_accurately() {
        let controller = ShutdownController::new();

        let guard1 = controller.in_flight_guard();
        let guard2 = controller.in_flight_guard();
        assert_eq!(controller.in_flight_count(), 2);

        drop(guard1);
        assert_eq!(controller.in_flight_count(), 1);
        drop(guard2);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_receiver_is_notified() {
        let controller = ShutdownController::new();
        let mut rx = controller.shutdown_receiver();
        assert!(!*rx.borrow());

        controller.trigger_shutdown();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn drain_completes_when_no_requests_in_flight() {
        let controller = ShutdownController::new();
        controller.set_ready();
        controller.trigger_shutdown();

        assert!(controller.wait_for_drain(Duration::from_secs(1)).await);
        assert_eq!(controller.phase(), ServerPhase::Stopped);
    }

    #[tokio::test]
    async fn drain_waits_for_guards_to_release() {
        let controller = ShutdownController::new();
        controller.set_ready();

        let guard = controller.in_flight_guard();
        controller.trigger_shutdown();

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        assert!(controller.wait_for_drain(Duration::from_secs(2)).await);
        assert_eq!(controller.phase(), ServerPhase::Stopped);
        release.await.unwrap();
    }

    #[tokio::test]
    async fn drain_timeout_leaves_phase_draining() {
        let controller = ShutdownController::new();
        controller.set_ready();

        let _guard = controller.in_flight_guard();
        controller.trigger_shutdown();

        assert!(!controller.wait_for_drain(Duration::from_millis(50)).await);
        assert_eq!(controller.phase(), ServerPhase::Draining);
    }

    #[test]
    fn phase_labels_are_stable() {
        assert_eq!(ServerPhase::Ready.as_str(), "ready");
        assert_eq!(ServerPhase::Draining.as_str(), "draining");
    }
}
