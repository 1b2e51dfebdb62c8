//! Connection state container with subscription.

use chrono::Utc;
use shepherd_core::{DataError, Timestamp};
use tokio::sync::watch;

/// Lifecycle phase of the logical backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
}

/// Current reachability of the backend, the last recorded error, and the
/// retry bookkeeping. Mutated only by [`super::ConnectionManager`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    pub error: Option<DataError>,
    pub last_attempt: Option<Timestamp>,
    pub retry_count: u32,
}

impl ConnectionState {
    pub fn initial() -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            error: None,
            last_attempt: None,
            retry_count: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.phase == ConnectionPhase::Connected
    }
}

/// Publishes state transitions to any number of watch subscribers.
pub(crate) struct StateCell {
    tx: watch::Sender<ConnectionState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::initial());
        Self { tx }
    }

    pub(crate) fn current(&self) -> ConnectionState {
        self.tx.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Apply a mutation and notify subscribers.
    ///
    /// Invariant: whenever the phase lands on `Connected`, `retry_count`
    /// resets to 0 and the recorded error clears.
    pub(crate) fn publish<F>(&self, mutate: F)
    where
        F: FnOnce(&mut ConnectionState),
    {
        self.tx.send_modify(|state| {
            mutate(state);
            if state.phase == ConnectionPhase::Connected {
                state.retry_count = 0;
                state.error = None;
            }
        });
    }

    pub(crate) fn mark_attempt(&self, retry_count: u32) {
        self.publish(|state| {
            state.last_attempt = Some(Utc::now());
            state.retry_count = retry_count;
        });
    }
}

// =============================================================================
// TESTS
// =============================================================================
