use crate::errors::{ErrorClass, SocketError, classify};

use super::SocketKind;
use super::state::{
    ConnectionEvent, ConnectionKind, ConnectionState, DisconnectedState, RestartReason,
};

/// Side effect requested by a transition. Executed in order by the socket actor.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect<K: SocketKind> {
    /// Load credentials, then open a transport for this config.
    OpenTransport(K::Config),
    CloseTransport,
    StartHeartbeat,
    StopHeartbeat,
    ScheduleRetry { immediate: bool },
    CancelRetry,
    ResetBackoff,
    ExpireToken,
    /// Hand the reconnect decision to the supervisor.
    ForwardReconnect { hint: K::Hint, reason: RestartReason },
    SurfaceFatal(SocketError),
    NotifyRecovered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Changed,
    /// The event does not apply to the current state. State and effects are untouched.
    Ignored(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition<K: SocketKind> {
    pub outcome: Outcome,
    pub effects: Vec<Effect<K>>,
}

impl<K: SocketKind> Transition<K> {
    fn changed(effects: Vec<Effect<K>>) -> Self {
        Self {
            outcome: Outcome::Changed,
            effects,
        }
    }

    fn ignored(why: &'static str) -> Self {
        Self {
            outcome: Outcome::Ignored(why),
            effects: Vec::new(),
        }
    }

    pub fn is_changed(&self) -> bool {
        self.outcome == Outcome::Changed
    }
}

/// Coarse view of the current state used to pick a row of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Restarting,
    Connecting,
    Connected,
    Stopped,
    Offline,
    HeartbeatLost,
    Temporarily,
    Terminal,
}

/// The transition table. Pure: no I/O, no clocks, no randomness.
#[derive(Debug, Clone)]
pub struct Machine<K: SocketKind> {
    state: ConnectionState<K>,
    last_config: Option<K::Config>,
}

impl<K: SocketKind> Default for Machine<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: SocketKind> Machine<K> {
    pub fn new() -> Self {
        Self::with_state(ConnectionState::default())
    }

    pub fn with_state(state: ConnectionState<K>) -> Self {
        let last_config = match &state {
            ConnectionState::Connecting { config, .. } => Some(config.clone()),
            _ => None,
        };
        Self { state, last_config }
    }

    pub fn state(&self) -> &ConnectionState<K> {
        &self.state
    }

    /// Config of the most recent accepted `Connect`, reused by automatic reconnects.
    pub fn last_config(&self) -> Option<&K::Config> {
        self.last_config.as_ref()
    }

    pub fn apply(&mut self, event: ConnectionEvent<K>) -> Transition<K> {
        use ConnectionEvent as E;
        let phase = self.phase();
        match event {
            E::Connect { config, kind } => self.on_connect(phase, config, kind),
            E::ConnectionEstablished(ack) => match phase {
                Phase::Connecting => self.enter(
                    ConnectionState::Connected(ack),
                    vec![
                        Effect::StartHeartbeat,
                        Effect::ResetBackoff,
                        Effect::NotifyRecovered,
                    ],
                ),
                Phase::Connected => Transition::ignored("already connected"),
                _ => Transition::ignored("stale handshake ack"),
            },
            E::HeartbeatLost => match phase {
                Phase::Connected => {
                    let mut effects = vec![Effect::CloseTransport, Effect::StopHeartbeat];
                    effects.push(Self::recovery(
                        RestartReason::HeartbeatLost,
                        K::transport_loss_hint(),
                        true,
                    ));
                    self.enter_disconnected(DisconnectedState::HeartbeatLost, effects)
                }
                _ => Transition::ignored("heartbeat only tracked while connected"),
            },
            E::NetworkUnavailable => match phase {
                Phase::Connecting
                | Phase::Connected
                | Phase::Restarting
                | Phase::HeartbeatLost
                | Phase::Temporarily => {
                    self.enter_disconnected(DisconnectedState::NetworkDisconnected, teardown())
                }
                _ => Transition::ignored("no connection to lose"),
            },
            E::NetworkAvailable => match phase {
                // Supervised sockets let the supervisor rebuild the connect config.
                Phase::Offline | Phase::HeartbeatLost | Phase::Temporarily if K::SUPERVISED => {
                    let reason = RestartReason::NetworkAvailable;
                    let hint = K::transport_loss_hint();
                    let effects = vec![Effect::ForwardReconnect {
                        hint,
                        reason: reason.clone(),
                    }];
                    self.enter(ConnectionState::RestartConnection { reason, hint }, effects)
                }
                Phase::Offline | Phase::HeartbeatLost | Phase::Temporarily => {
                    self.reconnect_with_last()
                }
                _ => Transition::ignored("not waiting for network"),
            },
            E::UnrecoverableError(error) => match phase {
                Phase::Stopped => Transition::ignored("stopped"),
                Phase::Terminal => Transition::ignored("already terminal"),
                _ => {
                    let mut effects = teardown();
                    effects.push(Effect::SurfaceFatal(error.clone()));
                    self.enter_disconnected(DisconnectedState::DisconnectedPermanently(error), effects)
                }
            },
            E::RecoverableError { error, hint } => self.on_recoverable(phase, error, hint),
            E::RequiredDisconnection => match phase {
                Phase::Terminal => Transition::ignored("already terminal"),
                _ => self.enter_disconnected(DisconnectedState::DisconnectedByRequest, teardown()),
            },
            E::Stop => match phase {
                Phase::Stopped => Transition::ignored("already stopped"),
                Phase::Terminal => Transition::ignored("already terminal"),
                _ => self.enter_disconnected(DisconnectedState::Stopped, teardown()),
            },
            E::Resume => match phase {
                Phase::Stopped | Phase::HeartbeatLost | Phase::Temporarily => {
                    self.reconnect_with_last()
                }
                _ => Transition::ignored("nothing to resume"),
            },
            E::RetryElapsed => match phase {
                Phase::Restarting | Phase::HeartbeatLost | Phase::Temporarily => {
                    self.reconnect_with_last()
                }
                _ => Transition::ignored("stale retry"),
            },
            E::Rejoin => {
                if !K::SUPERVISED {
                    return Transition::ignored("rejoin needs a supervised socket");
                }
                match phase {
                    Phase::Terminal => Transition::ignored("already terminal"),
                    _ => self.enter_disconnected(DisconnectedState::Rejoin, teardown()),
                }
            }
        }
    }

    fn on_connect(
        &mut self,
        phase: Phase,
        config: K::Config,
        kind: ConnectionKind,
    ) -> Transition<K> {
        match (phase, kind) {
            (Phase::Terminal, ConnectionKind::AutomaticReconnection) => {
                Transition::ignored("terminal state needs an explicit connect")
            }
            (Phase::Connected, ConnectionKind::Initial | ConnectionKind::AutomaticReconnection) => {
                Transition::ignored("already connected")
            }
            (Phase::Connecting, ConnectionKind::AutomaticReconnection) => {
                Transition::ignored("connect already in flight")
            }
            _ => self.start_connecting(config, kind),
        }
    }

    fn on_recoverable(&mut self, phase: Phase, error: SocketError, hint: K::Hint) -> Transition<K> {
        let refresh = matches!(
            classify(&error),
            ErrorClass::Recoverable {
                refresh_token: true
            }
        );
        let reason = RestartReason::Error(error.clone());
        match phase {
            Phase::Connecting | Phase::Connected => {
                let mut effects = vec![Effect::CloseTransport, Effect::StopHeartbeat];
                if refresh {
                    effects.push(Effect::ExpireToken);
                }
                effects.push(Self::recovery(reason.clone(), hint, false));
                self.enter(ConnectionState::RestartConnection { reason, hint }, effects)
            }
            Phase::Restarting | Phase::HeartbeatLost | Phase::Temporarily => {
                let mut effects = vec![Effect::CancelRetry];
                if refresh {
                    effects.push(Effect::ExpireToken);
                }
                effects.push(Self::recovery(reason, hint, false));
                self.enter_disconnected(DisconnectedState::DisconnectedTemporarily(error), effects)
            }
            Phase::Offline => Transition::ignored("waiting for network"),
            Phase::Stopped => Transition::ignored("stopped"),
            Phase::Terminal => Transition::ignored("already terminal"),
        }
    }

    fn start_connecting(&mut self, config: K::Config, kind: ConnectionKind) -> Transition<K> {
        self.last_config = Some(config.clone());
        let mut effects = teardown();
        effects.push(Effect::OpenTransport(config.clone()));
        self.enter(ConnectionState::Connecting { config, kind }, effects)
    }

    fn reconnect_with_last(&mut self) -> Transition<K> {
        match self.last_config.clone() {
            Some(config) => self.start_connecting(config, ConnectionKind::AutomaticReconnection),
            None => Transition::ignored("no previous connection config"),
        }
    }

    fn recovery(reason: RestartReason, hint: K::Hint, immediate: bool) -> Effect<K> {
        if K::SUPERVISED {
            Effect::ForwardReconnect { hint, reason }
        } else {
            Effect::ScheduleRetry { immediate }
        }
    }

    fn enter_disconnected(
        &mut self,
        state: DisconnectedState,
        effects: Vec<Effect<K>>,
    ) -> Transition<K> {
        self.enter(ConnectionState::Disconnected(state), effects)
    }

    fn enter(&mut self, state: ConnectionState<K>, effects: Vec<Effect<K>>) -> Transition<K> {
        self.state = state;
        Transition::changed(effects)
    }

    fn phase(&self) -> Phase {
        match &self.state {
            ConnectionState::RestartConnection { .. } => Phase::Restarting,
            ConnectionState::Connecting { .. } => Phase::Connecting,
            ConnectionState::Connected(_) => Phase::Connected,
            ConnectionState::Disconnected(d) => match d {
                DisconnectedState::Stopped => Phase::Stopped,
                DisconnectedState::NetworkDisconnected => Phase::Offline,
                DisconnectedState::HeartbeatLost => Phase::HeartbeatLost,
                DisconnectedState::DisconnectedTemporarily(_) => Phase::Temporarily,
                DisconnectedState::DisconnectedByRequest
                | DisconnectedState::DisconnectedPermanently(_)
                | DisconnectedState::Rejoin => Phase::Terminal,
            },
        }
    }
}

fn teardown<K: SocketKind>() -> Vec<Effect<K>> {
    vec![
        Effect::CancelRetry,
        Effect::CloseTransport,
        Effect::StopHeartbeat,
    ]
}
