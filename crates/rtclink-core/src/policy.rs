//! Gates consulted when the app moves between foreground and background.
//!
//! Each policy reads its input from a watch channel so it can be evaluated
//! synchronously from any thread.

use tokio::sync::watch;

use crate::coordinator::CoordinatorState;
use crate::socket::{ConnectionState, DisconnectedState};

pub trait ConnectionPolicy: Send + Sync {
    /// May the socket be (re)connected right now?
    fn should_connect(&self) -> bool;
    /// May the socket be disconnected right now?
    fn should_disconnect(&self) -> bool;
}

/// Keeps the socket open while a call is in progress.
pub struct CallAwareConnectionPolicy {
    active_call: watch::Receiver<bool>,
}

impl CallAwareConnectionPolicy {
    pub fn new(active_call: watch::Receiver<bool>) -> Self {
        Self { active_call }
    }
}

impl ConnectionPolicy for CallAwareConnectionPolicy {
    fn should_connect(&self) -> bool {
        true
    }

    fn should_disconnect(&self) -> bool {
        !*self.active_call.borrow()
    }
}

/// Connect only from a disconnected state; disconnect only a live or recovering one.
pub struct SocketStateConnectionPolicy {
    state: watch::Receiver<CoordinatorState>,
}

impl SocketStateConnectionPolicy {
    pub fn new(state: watch::Receiver<CoordinatorState>) -> Self {
        Self { state }
    }
}

impl ConnectionPolicy for SocketStateConnectionPolicy {
    fn should_connect(&self) -> bool {
        self.state.borrow().is_disconnected()
    }

    fn should_disconnect(&self) -> bool {
        matches!(
            &*self.state.borrow(),
            ConnectionState::Connected(_)
                | ConnectionState::Connecting { .. }
                | ConnectionState::RestartConnection { .. }
                | ConnectionState::Disconnected(
                    DisconnectedState::HeartbeatLost | DisconnectedState::DisconnectedTemporarily(_)
                )
        )
    }
}

/// Connect only while the network is up. Disconnecting is always allowed.
pub struct NetworkConnectionPolicy {
    online: watch::Receiver<bool>,
}

impl NetworkConnectionPolicy {
    pub fn new(online: watch::Receiver<bool>) -> Self {
        Self { online }
    }
}

impl ConnectionPolicy for NetworkConnectionPolicy {
    fn should_connect(&self) -> bool {
        *self.online.borrow()
    }

    fn should_disconnect(&self) -> bool {
        true
    }
}
