use crate::events::LinkEvent;
use crate::socket::{ConnectionState, SocketKind, SocketStateMachine};

/// The per-call media-server signaling socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sfu;

/// How the server wants a broken SFU session recovered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ReconnectStrategy {
    #[default]
    Unspecified,
    Fast,
    Rejoin,
    Migrate,
}

/// Sent with the join request after a reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectDetails {
    pub previous_session_id: String,
    pub strategy: ReconnectStrategy,
    pub attempt: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SfuConfig {
    pub url: String,
    pub call_cid: String,
    pub session_id: String,
    pub reconnect: Option<ReconnectDetails>,
}

/// The server's join response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SfuJoinAck {
    pub session_id: String,
    pub reconnected: bool,
}

impl SocketKind for Sfu {
    type Config = SfuConfig;
    type Ack = SfuJoinAck;
    type Hint = ReconnectStrategy;

    const LABEL: &'static str = "sfu";
    const SUPERVISED: bool = true;

    fn transport_loss_hint() -> Self::Hint {
        ReconnectStrategy::Fast
    }

    fn state_event(tag: &str, state: &ConnectionState<Self>) -> LinkEvent {
        LinkEvent::SfuStateChanged {
            session_id: tag.to_string(),
            state: state.clone(),
        }
    }
}

pub type SfuState = ConnectionState<Sfu>;
pub type SfuSocketStateMachine = SocketStateMachine<Sfu>;
