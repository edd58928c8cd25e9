use crate::errors::SocketError;

use super::SocketKind;

/// Why a `Connect` was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Initial,
    /// Issued by the core itself. Never leaves a terminal state.
    AutomaticReconnection,
    /// Issued explicitly to replace a live connection.
    ForceReconnection,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RestartReason {
    Error(SocketError),
    HeartbeatLost,
    NetworkAvailable,
    LifecycleResume,
}

impl RestartReason {
    pub fn describe(&self) -> String {
        match self {
            RestartReason::Error(e) => e.to_string(),
            RestartReason::HeartbeatLost => "heartbeat lost".to_string(),
            RestartReason::NetworkAvailable => "network available".to_string(),
            RestartReason::LifecycleResume => "lifecycle resume".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectedState {
    Stopped,
    NetworkDisconnected,
    HeartbeatLost,
    DisconnectedByRequest,
    DisconnectedTemporarily(SocketError),
    DisconnectedPermanently(SocketError),
    /// The session was retired in favour of a new one. SFU only.
    Rejoin,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState<K: SocketKind> {
    RestartConnection { reason: RestartReason, hint: K::Hint },
    Connecting { config: K::Config, kind: ConnectionKind },
    Connected(K::Ack),
    Disconnected(DisconnectedState),
}

impl<K: SocketKind> Default for ConnectionState<K> {
    fn default() -> Self {
        ConnectionState::Disconnected(DisconnectedState::Stopped)
    }
}

impl<K: SocketKind> ConnectionState<K> {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected(_))
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, ConnectionState::Disconnected(_))
    }

    /// Only an explicit new `Connect` leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected(
                DisconnectedState::DisconnectedByRequest
                    | DisconnectedState::DisconnectedPermanently(_)
                    | DisconnectedState::Rejoin
            )
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::RestartConnection { .. } => "RestartConnection",
            ConnectionState::Connecting { .. } => "Connecting",
            ConnectionState::Connected(_) => "Connected",
            ConnectionState::Disconnected(d) => match d {
                DisconnectedState::Stopped => "Disconnected.Stopped",
                DisconnectedState::NetworkDisconnected => "Disconnected.NetworkDisconnected",
                DisconnectedState::HeartbeatLost => "Disconnected.HeartbeatLost",
                DisconnectedState::DisconnectedByRequest => "Disconnected.ByRequest",
                DisconnectedState::DisconnectedTemporarily(_) => "Disconnected.Temporarily",
                DisconnectedState::DisconnectedPermanently(_) => "Disconnected.Permanently",
                DisconnectedState::Rejoin => "Disconnected.Rejoin",
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent<K: SocketKind> {
    Connect { config: K::Config, kind: ConnectionKind },
    ConnectionEstablished(K::Ack),
    HeartbeatLost,
    NetworkUnavailable,
    NetworkAvailable,
    UnrecoverableError(SocketError),
    RecoverableError { error: SocketError, hint: K::Hint },
    RequiredDisconnection,
    Stop,
    Resume,
    /// A scheduled retry fired.
    RetryElapsed,
    /// Retire this session; only supervised sockets accept it.
    Rejoin,
}

impl<K: SocketKind> ConnectionEvent<K> {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionEvent::Connect { .. } => "Connect",
            ConnectionEvent::ConnectionEstablished(_) => "ConnectionEstablished",
            ConnectionEvent::HeartbeatLost => "HeartbeatLost",
            ConnectionEvent::NetworkUnavailable => "NetworkUnavailable",
            ConnectionEvent::NetworkAvailable => "NetworkAvailable",
            ConnectionEvent::UnrecoverableError(_) => "UnrecoverableError",
            ConnectionEvent::RecoverableError { .. } => "RecoverableError",
            ConnectionEvent::RequiredDisconnection => "RequiredDisconnection",
            ConnectionEvent::Stop => "Stop",
            ConnectionEvent::Resume => "Resume",
            ConnectionEvent::RetryElapsed => "RetryElapsed",
            ConnectionEvent::Rejoin => "Rejoin",
        }
    }
}
