//! Availability gate between the swap engine and acquirers
//!
//! Single writer (the background task), many readers. Backed by a
//! `tokio::sync::watch` channel so waiters suspend without polling.

use crate::error::ScopeError;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Whether a current service may be acquired right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateState {
    /// A current service exists; acquisition proceeds immediately
    Ready,
    /// Blocking swap in progress; acquisition waits
    Draining,
    /// Manager shut down; acquisition fails
    Closed,
}

/// Writer side of the gate
#[derive(Debug)]
pub struct Gate {
    tx: watch::Sender<GateState>,
}

impl Gate {
    /// Create gate in the `Ready` state
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(GateState::Ready);
        Self { tx }
    }

    /// Publish new state
    pub fn set(&self, state: GateState) {
        self.tx.send_replace(state);
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> GateState {
        *self.tx.borrow()
    }

    /// Fail fast unless the gate is open
    ///
    /// # Errors
    /// `Unavailable` while draining, `ShutDown` once closed.
    pub fn check(&self) -> Result<(), ScopeError> {
        match self.state() {
            GateState::Ready => Ok(()),
            GateState::Draining => Err(ScopeError::Unavailable),
            GateState::Closed => Err(ScopeError::ShutDown),
        }
    }

    /// Suspend until the gate opens
    ///
    /// # Errors
    /// `Cancelled` if `cancel` fires first, `ShutDown` if the gate closes.
    pub async fn wait_ready(&self, cancel: &CancellationToken) -> Result<(), ScopeError> {
        let mut rx = self.tx.subscribe();
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ScopeError::Cancelled),
            state = async {
                rx.wait_for(|s| *s != GateState::Draining)
                    .await
                    .map(|s| *s)
            } => state,
        };

        match opened {
            Ok(GateState::Ready) => Ok(()),
            Ok(_) | Err(_) => Err(ScopeError::ShutDown),
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}
