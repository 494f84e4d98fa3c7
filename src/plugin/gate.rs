//! One-shot readiness signal.
//!
//! A gate starts closed and opens once. Any number of tasks may wait on it,
//! before or after it opens; all of them are released.

use std::sync::Arc;

use tokio::sync::watch;

/// A one-shot, multi-waiter readiness gate.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    tx: Arc<watch::Sender<bool>>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Open the gate. Returns `false` if it was already open.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        })
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the gate is open.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // We hold the sender, so the channel cannot close under us.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

/// The handle a plugin hook uses to announce it is ready.
#[derive(Debug, Clone)]
pub struct Ready {
    gate: ReadinessGate,
}

impl Ready {
    pub(crate) fn new(gate: ReadinessGate) -> Self {
        Self { gate }
    }

    /// Release plugins waiting on this one. Later calls are no-ops.
    pub fn fire(&self) -> bool {
        self.gate.fire()
    }

    pub fn is_fired(&self) -> bool {
        self.gate.is_ready()
    }
}
