use std::sync::Arc;
use tether_common::{
    error::{Result, TetherError},
    types::ConnectionState,
};
use tokio::sync::watch;

/// The single connection state of a session.
///
/// Owned by the broker and shared by reference with the transport and the UI;
/// every change is validated against the state machine.
#[derive(Clone)]
pub struct ConnectionStateCell {
    tx: Arc<watch::Sender<ConnectionState>>,
}

impl ConnectionStateCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Idle);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Move to `next`, returning the previous state
    pub fn transition(&self, next: ConnectionState) -> Result<ConnectionState> {
        let current = self.get();
        if !current.can_transition_to(next) {
            return Err(TetherError::InvalidTransition {
                from: current,
                to: next,
            });
        }
        Ok(self.tx.send_replace(next))
    }

    /// Observe state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}

impl Default for ConnectionStateCell {
    fn default() -> Self {
        Self::new()
    }
}
