use std::sync::Arc;

use crate::coordinator::CoordinatorState;
use crate::errors::SocketError;
use crate::sfu::{ReconnectStrategy, SfuState};

/// Events emitted by the core to application listeners.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    CoordinatorStateChanged(CoordinatorState),
    SfuStateChanged {
        session_id: String,
        state: SfuState,
    },
    /// Application payload received on a socket. `socket` is the socket label.
    MessageReceived {
        socket: &'static str,
        payload: Vec<u8>,
    },
    ReconnectScheduled {
        strategy: ReconnectStrategy,
        attempt: u32,
    },
    SessionReplaced {
        previous_session_id: String,
        session_id: String,
        attempt: u32,
    },
    CallFailed {
        session_id: String,
        error: SocketError,
    },
    /// The call stayed disconnected past the configured grace period and was left.
    CallLeft {
        session_id: String,
        reason: String,
    },
}

/// Trait for receiving events from the core.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait LinkEventListener: Send + Sync {
    fn on_event(&self, event: LinkEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<std::sync::RwLock<Vec<Arc<dyn LinkEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn LinkEventListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    pub fn emit(&self, event: LinkEvent) {
        let listeners = self.listeners.read().unwrap();
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}
