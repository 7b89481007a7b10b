//! Shutdown coordination for the proxy.
//!
//! # State Transitions
//! ```text
//! Running → Draining: request_shutdown() (first call only)
//! Draining → Stopped: await_stopped() once in-flight work is done or the
//!                     drain timeout elapses
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::net::connection::{ConnectionGuard, ConnectionTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

/// Coordinator for graceful shutdown.
///
/// Cheap to clone; all clones share one state. Listeners stop accepting when
/// the state leaves `Running`; in-flight work holds a guard from [`track`].
///
/// [`track`]: Shutdown::track
#[derive(Debug, Clone)]
pub struct Shutdown {
    state: Arc<watch::Sender<ShutdownState>>,
    tracker: ConnectionTracker,
}

impl Shutdown {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ShutdownState::Running);
        Self {
            state: Arc::new(state),
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    pub fn is_draining(&self) -> bool {
        self.state() != ShutdownState::Running
    }

    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    /// Move from `Running` to `Draining`. Returns true only for the call that
    /// made the transition.
    pub fn request_shutdown(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ShutdownState::Running {
                *state = ShutdownState::Draining;
                true
            } else {
                false
            }
        })
    }

    /// Resolve once shutdown has been requested.
    pub async fn draining(&self) {
        let mut rx = self.subscribe();
        // The sender lives in `self`, so this cannot fail.
        let _ = rx.wait_for(|s| *s != ShutdownState::Running).await;
    }

    /// Register in-flight work. Drain waits for every guard to drop.
    pub fn track(&self) -> ConnectionGuard {
        self.tracker.track()
    }

    pub fn in_flight(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Wait for shutdown to be requested, then for in-flight work to finish
    /// or `timeout` to elapse, whichever comes first. Ends in `Stopped`.
    ///
    /// Returns false if the timeout cut the drain short.
    pub async fn await_stopped(&self, timeout: Duration) -> bool {
        self.draining().await;
        let drained = tokio::time::timeout(timeout, self.tracker.wait_idle())
            .await
            .is_ok();
        self.state.send_if_modified(|state| {
            if *state == ShutdownState::Stopped {
                false
            } else {
                *state = ShutdownState::Stopped;
                true
            }
        });
        drained
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_shutdown_transitions_once() {
        let shutdown = Shutdown::new();
        assert_eq!(shutdown.state(), ShutdownState::Running);
        assert!(!shutdown.is_draining());

        assert!(shutdown.request_shutdown());
        assert!(!shutdown.request_shutdown());
        assert_eq!(shutdown.state(), ShutdownState::Draining);
        assert!(shutdown.clone().is_draining());
    }

    #[tokio::test]
    async fn await_stopped_waits_for_in_flight_work() {
        let shutdown = Shutdown::new();
        let guard = shutdown.track();
        shutdown.request_shutdown();

        let stopper = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.await_stopped(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(shutdown.state(), ShutdownState::Draining);

        drop(guard);
        assert!(stopper.await.unwrap());
        assert_eq!(shutdown.state(), ShutdownState::Stopped);
    }

    #[tokio::test]
    async fn await_stopped_gives_up_after_timeout() {
        let shutdown = Shutdown::new();
        let _stuck = shutdown.track();
        shutdown.request_shutdown();

        assert!(!shutdown.await_stopped(Duration::from_millis(50)).await);
        assert_eq!(shutdown.state(), ShutdownState::Stopped);
        assert_eq!(shutdown.in_flight(), 1);
    }

    #[tokio::test]
    async fn subscribers_observe_transitions() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        shutdown.request_shutdown();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ShutdownState::Draining);
    }
}
