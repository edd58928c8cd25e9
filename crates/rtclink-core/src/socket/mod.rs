//! Socket state machines shared by the coordinator and SFU connections.
//!
//! [`transition`] holds the pure transition table, [`machine`] the actor that
//! runs it against a real transport.

pub mod backoff;
pub mod heartbeat;
pub mod machine;
pub mod state;
pub mod transition;
pub mod transport;

use std::fmt::Debug;

use crate::events::LinkEvent;

pub use machine::{SocketContext, SocketHandle, SocketStateMachine, Supervision, SupervisorSignal};
pub use state::{ConnectionEvent, ConnectionKind, ConnectionState, DisconnectedState, RestartReason};

/// Type-level description of one socket flavour.
pub trait SocketKind: Debug + Clone + Copy + PartialEq + Send + Sync + 'static {
    /// What a `Connect` carries: URL and session identity.
    type Config: Debug + Clone + PartialEq + Send + Sync + 'static;
    /// The server's handshake acknowledgement.
    type Ack: Debug + Clone + PartialEq + Send + Sync + 'static;
    /// Reconnect hint attached to recoverable errors.
    type Hint: Debug + Clone + Copy + PartialEq + Default + Send + Sync + 'static;

    /// Log tag and `MessageReceived` socket label.
    const LABEL: &'static str;

    /// Supervised sockets hand every reconnect decision to their supervisor
    /// and support the `Rejoin` state. Unsupervised ones retry on their own.
    const SUPERVISED: bool;

    /// Hint used when the connection dies without the server saying how to recover.
    fn transport_loss_hint() -> Self::Hint;

    /// Listener-facing event for a state change. `tag` identifies the socket instance.
    fn state_event(tag: &str, state: &ConnectionState<Self>) -> LinkEvent;
}
