use std::sync::Arc;

use crate::config::ClientConfig;
use crate::credentials::CredentialsManager;
use crate::events::{EventEmitter, LinkEvent};
use crate::socket::transport::TransportFactory;
use crate::socket::{ConnectionState, SocketContext, SocketKind, SocketStateMachine};

/// The signaling socket: call metadata, membership and invitations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coordinator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: String,
    pub name: Option<String>,
    pub anonymous: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub url: String,
    pub user: UserInfo,
}

/// The server's `connection.ok`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorAck {
    pub connection_id: String,
    pub user_id: String,
}

impl SocketKind for Coordinator {
    type Config = CoordinatorConfig;
    type Ack = CoordinatorAck;
    type Hint = ();

    const LABEL: &'static str = "coordinator";
    const SUPERVISED: bool = false;

    fn transport_loss_hint() -> Self::Hint {}

    fn state_event(_tag: &str, state: &ConnectionState<Self>) -> LinkEvent {
        LinkEvent::CoordinatorStateChanged(state.clone())
    }
}

pub type CoordinatorState = ConnectionState<Coordinator>;
pub type CoordinatorSocketStateMachine = SocketStateMachine<Coordinator>;

impl SocketStateMachine<Coordinator> {
    pub fn coordinator(
        transports: Arc<dyn TransportFactory<Coordinator>>,
        credentials: Arc<CredentialsManager>,
        timing: ClientConfig,
        emitter: EventEmitter,
    ) -> Self {
        Self::spawn(SocketContext::new(
            Coordinator::LABEL,
            transports,
            credentials,
            timing,
            emitter,
        ))
    }
}
