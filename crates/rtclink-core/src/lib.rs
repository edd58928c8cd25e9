//! RtcLink connectivity core.
//!
//! Keeps the two sockets of a video-calling client alive: the coordinator
//! socket (call signaling, always on while the app runs) and the per-call SFU
//! socket (media negotiation). Transports and token sources are supplied by
//! the host; this crate owns the state machines, retries and reconnect logic.

pub mod call;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod errors;
pub mod events;
pub mod lifecycle;
pub mod logging;
pub mod network;
pub mod policy;
pub mod reconnect;
pub mod sfu;
pub mod socket;
pub mod token;

#[cfg(test)]
mod test_support;

pub use call::CallSession;
pub use client::LinkClient;
pub use config::ClientConfig;
pub use coordinator::{
    Coordinator, CoordinatorAck, CoordinatorConfig, CoordinatorSocketStateMachine,
    CoordinatorState, UserInfo,
};
pub use credentials::{CredentialsManager, CredentialsProvider};
pub use errors::{ErrorClass, LinkError, SocketError, SocketErrorKind, classify};
pub use events::{EventEmitter, LinkEvent, LinkEventListener};
pub use lifecycle::{LifecycleHandler, LifecycleSignal, LifecycleTarget, observe_lifecycle};
pub use logging::init_logging;
pub use network::{NetworkMonitor, NetworkTarget};
pub use policy::{
    CallAwareConnectionPolicy, ConnectionPolicy, NetworkConnectionPolicy,
    SocketStateConnectionPolicy,
};
pub use reconnect::{ReconnectOrchestrator, ReconnectPhase, ReconnectSnapshot};
pub use sfu::{
    ReconnectDetails, ReconnectStrategy, Sfu, SfuConfig, SfuJoinAck, SfuSocketStateMachine,
    SfuState,
};
pub use socket::transport::{Transport, TransportFactory, TransportSignal, TransportSink};
pub use socket::{
    ConnectionEvent, ConnectionKind, ConnectionState, DisconnectedState, RestartReason,
    SocketHandle, SocketKind, SocketStateMachine,
};
pub use token::{
    CacheableTokenProvider, CredentialSource, Credentials, TokenManager, TokenProvider,
};
