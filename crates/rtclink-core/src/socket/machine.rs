use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::errors::{ErrorClass, LinkError, SocketError, classify};
use crate::events::{EventEmitter, LinkEvent};
use crate::token::CredentialSource;

use super::SocketKind;
use super::backoff::Backoff;
use super::heartbeat::HealthMonitor;
use super::state::{ConnectionEvent, ConnectionKind, ConnectionState, DisconnectedState, RestartReason};
use super::transition::{Effect, Machine, Outcome};
use super::transport::{NORMAL_CLOSURE, Transport, TransportFactory, TransportSignal, TransportSink};

/// What a supervised socket reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum Supervision<K: SocketKind> {
    /// The connection broke; the owner decides how to recover.
    Reconnect { hint: K::Hint, reason: RestartReason },
    Recovered,
    Fatal(SocketError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorSignal<K: SocketKind> {
    /// Tag of the socket instance that raised the signal.
    pub source: String,
    pub signal: Supervision<K>,
}

/// Collaborators of one socket instance.
pub struct SocketContext<K: SocketKind> {
    pub tag: String,
    pub transports: Arc<dyn TransportFactory<K>>,
    pub credentials: Arc<dyn CredentialSource>,
    pub timing: ClientConfig,
    pub emitter: EventEmitter,
    pub supervisor: Option<mpsc::UnboundedSender<SupervisorSignal<K>>>,
}

impl<K: SocketKind> SocketContext<K> {
    pub fn new(
        tag: impl Into<String>,
        transports: Arc<dyn TransportFactory<K>>,
        credentials: Arc<dyn CredentialSource>,
        timing: ClientConfig,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            tag: tag.into(),
            transports,
            credentials,
            timing,
            emitter,
            supervisor: None,
        }
    }

    pub fn with_supervisor(mut self, supervisor: mpsc::UnboundedSender<SupervisorSignal<K>>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }
}

pub(crate) enum Command<K: SocketKind> {
    Event(ConnectionEvent<K>),
    Transport {
        generation: u64,
        signal: TransportSignal<K>,
    },
    Opened {
        generation: u64,
        result: Result<Arc<dyn Transport>, SocketError>,
    },
    RetryElapsed {
        ticket: u64,
    },
    HeartbeatTick {
        generation: u64,
    },
    HeartbeatLost {
        generation: u64,
    },
    Send {
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<(), LinkError>>,
    },
}

/// Cheap, cloneable access to a running socket: event sink plus state stream.
pub struct SocketHandle<K: SocketKind> {
    tx: mpsc::UnboundedSender<Command<K>>,
    state: watch::Receiver<ConnectionState<K>>,
}

impl<K: SocketKind> Clone for SocketHandle<K> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            state: self.state.clone(),
        }
    }
}

impl<K: SocketKind> SocketHandle<K> {
    /// Queue an event. Returns false once the socket is gone.
    pub fn send_event(&self, event: ConnectionEvent<K>) -> bool {
        self.tx.send(Command::Event(event)).is_ok()
    }

    pub fn connect(&self, config: K::Config, kind: ConnectionKind) -> bool {
        self.send_event(ConnectionEvent::Connect { config, kind })
    }

    pub fn state(&self) -> ConnectionState<K> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState<K>> {
        self.state.clone()
    }

    /// Send an application payload on the live transport.
    pub async fn send(&self, payload: Vec<u8>) -> Result<(), LinkError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Send { payload, reply })
            .map_err(|_| LinkError::NotConnected)?;
        rx.await.map_err(|_| LinkError::NotConnected)?
    }

    /// Wait until the socket is connected and return the server's ack.
    ///
    /// Fails on timeout, or when a later state change lands in a terminal state.
    pub async fn await_connected(&self, timeout: Duration) -> Result<K::Ack, LinkError> {
        let mut rx = self.state.clone();
        let wait = async move {
            let mut settled_failures = false;
            loop {
                {
                    let state = rx.borrow_and_update();
                    match &*state {
                        ConnectionState::Connected(ack) => return Ok(ack.clone()),
                        ConnectionState::Disconnected(
                            DisconnectedState::DisconnectedPermanently(e),
                        ) if settled_failures => return Err(LinkError::Socket(e.clone())),
                        ConnectionState::Disconnected(
                            DisconnectedState::DisconnectedByRequest | DisconnectedState::Rejoin,
                        ) if settled_failures => return Err(LinkError::NotConnected),
                        _ => {}
                    }
                }
                // A terminal state seen before any change may predate a queued connect.
                settled_failures = true;
                rx.changed().await.map_err(|_| LinkError::NotConnected)?;
            }
        };
        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            LinkError::Socket(SocketError::timeout(format!(
                "not connected after {}ms",
                timeout.as_millis()
            )))
        })?
    }
}

/// A running socket state machine.
///
/// Events from any number of producers are queued and applied one at a
/// time by a single worker task. Dropping the machine stops the worker and
/// closes its transport.
pub struct SocketStateMachine<K: SocketKind> {
    handle: SocketHandle<K>,
    worker: JoinHandle<()>,
}

impl<K: SocketKind> SocketStateMachine<K> {
    pub fn spawn(context: SocketContext<K>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());
        let worker = Worker::new(context, tx.clone(), state_tx);
        let worker = tokio::spawn(worker.run(rx));
        Self {
            handle: SocketHandle {
                tx,
                state: state_rx,
            },
            worker,
        }
    }

    pub fn handle(&self) -> SocketHandle<K> {
        self.handle.clone()
    }

    pub fn state(&self) -> ConnectionState<K> {
        self.handle.state()
    }

    pub fn send_event(&self, event: ConnectionEvent<K>) -> bool {
        self.handle.send_event(event)
    }
}

impl<K: SocketKind> Drop for SocketStateMachine<K> {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

struct Worker<K: SocketKind> {
    ctx: SocketContext<K>,
    prefix: String,
    machine: Machine<K>,
    tx: mpsc::UnboundedSender<Command<K>>,
    state_tx: watch::Sender<ConnectionState<K>>,
    /// Bumped on every open and close; stale transport signals carry an older value.
    generation: u64,
    transport: Option<Arc<dyn Transport>>,
    connect_task: Option<JoinHandle<()>>,
    heartbeat: Option<HealthMonitor>,
    retry_ticket: u64,
    retry_task: Option<JoinHandle<()>>,
    backoff: Backoff,
}

impl<K: SocketKind> Worker<K> {
    fn new(
        ctx: SocketContext<K>,
        tx: mpsc::UnboundedSender<Command<K>>,
        state_tx: watch::Sender<ConnectionState<K>>,
    ) -> Self {
        let prefix = if ctx.tag == K::LABEL {
            format!("[{}]", K::LABEL)
        } else {
            format!("[{}:{}]", K::LABEL, ctx.tag)
        };
        let backoff = Backoff::new(
            ctx.timing.retry_base_delay(),
            ctx.timing.retry_max_delay(),
            ctx.timing.retry_jitter,
        );
        Self {
            ctx,
            prefix,
            machine: Machine::new(),
            tx,
            state_tx,
            generation: 0,
            transport: None,
            connect_task: None,
            heartbeat: None,
            retry_ticket: 0,
            retry_task: None,
            backoff,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command<K>>) {
        tracing::debug!("{} socket worker started", self.prefix);
        while let Some(command) = rx.recv().await {
            self.handle(command);
        }
    }

    fn handle(&mut self, command: Command<K>) {
        match command {
            Command::Event(event) => self.dispatch(event),
            Command::Transport { generation, signal } => {
                if generation != self.generation {
                    tracing::debug!("{} dropping signal from stale transport {generation}", self.prefix);
                    return;
                }
                self.on_signal(signal);
            }
            Command::Opened { generation, result } => self.on_opened(generation, result),
            Command::RetryElapsed { ticket } => {
                if ticket == self.retry_ticket {
                    self.retry_task = None;
                    self.dispatch(ConnectionEvent::RetryElapsed);
                }
            }
            Command::HeartbeatTick { generation } => {
                if generation != self.generation {
                    return;
                }
                if let Some(transport) = &self.transport {
                    if let Err(e) = transport.send_health_check() {
                        tracing::warn!("{} health check send failed: {e}", self.prefix);
                    }
                }
            }
            Command::HeartbeatLost { generation } => {
                if generation == self.generation && self.heartbeat.take().is_some() {
                    self.dispatch(ConnectionEvent::HeartbeatLost);
                }
            }
            Command::Send { payload, reply } => {
                let result = match &self.transport {
                    Some(transport) if self.machine.state().is_connected() => {
                        transport.send(payload).map_err(LinkError::from)
                    }
                    _ => Err(LinkError::NotConnected),
                };
                let _ = reply.send(result);
            }
        }
    }

    fn dispatch(&mut self, event: ConnectionEvent<K>) {
        let name = event.name();
        let from = self.machine.state().name();
        let transition = self.machine.apply(event);
        if let Outcome::Ignored(why) = transition.outcome {
            tracing::debug!("{} {name} ignored in {from}: {why}", self.prefix);
            return;
        }
        let state = self.machine.state().clone();
        tracing::info!("{} {from} -> {} on {name}", self.prefix, state.name());
        self.ctx.emitter.emit(K::state_event(&self.ctx.tag, &state));
        self.state_tx.send_replace(state);

        for effect in transition.effects {
            self.run_effect(effect);
        }
    }

    fn on_opened(&mut self, generation: u64, result: Result<Arc<dyn Transport>, SocketError>) {
        if generation != self.generation {
            if let Ok(transport) = result {
                transport.close(NORMAL_CLOSURE, "superseded");
            }
            return;
        }
        self.connect_task = None;
        match result {
            Ok(transport) => {
                tracing::debug!("{} transport {generation} open", self.prefix);
                self.transport = Some(transport);
            }
            Err(error) => {
                let event = self.classified(error, K::transport_loss_hint());
                self.dispatch(event);
            }
        }
    }

    fn on_signal(&mut self, signal: TransportSignal<K>) {
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.ack();
        }
        match signal {
            TransportSignal::Ack(ack) => self.dispatch(ConnectionEvent::ConnectionEstablished(ack)),
            TransportSignal::HealthCheck => {}
            TransportSignal::Message(payload) => {
                self.ctx.emitter.emit(LinkEvent::MessageReceived {
                    socket: K::LABEL,
                    payload,
                });
            }
            TransportSignal::ServerError { error, hint } => {
                let event = self.classified(error, hint);
                self.dispatch(event);
            }
            TransportSignal::Closed { code, reason } => {
                let error = SocketError::closed(format!("closed by peer ({code}): {reason}"));
                let event = self.classified(error, K::transport_loss_hint());
                self.dispatch(event);
            }
            TransportSignal::Failure(error) => {
                let event = self.classified(error, K::transport_loss_hint());
                self.dispatch(event);
            }
        }
    }

    fn classified(&self, error: SocketError, hint: K::Hint) -> ConnectionEvent<K> {
        match classify(&error) {
            ErrorClass::Unrecoverable => {
                tracing::warn!("{} unrecoverable error: {error}", self.prefix);
                ConnectionEvent::UnrecoverableError(error)
            }
            ErrorClass::Recoverable { refresh_token } => {
                tracing::warn!(
                    "{} recoverable error (token refresh: {refresh_token}): {error}",
                    self.prefix
                );
                ConnectionEvent::RecoverableError { error, hint }
            }
        }
    }

    fn run_effect(&mut self, effect: Effect<K>) {
        match effect {
            Effect::OpenTransport(config) => self.open_transport(config),
            Effect::CloseTransport => self.close_transport(),
            Effect::StartHeartbeat => self.start_heartbeat(),
            Effect::StopHeartbeat => self.heartbeat = None,
            Effect::ScheduleRetry { immediate } => self.schedule_retry(immediate),
            Effect::CancelRetry => self.cancel_retry(),
            Effect::ResetBackoff => self.backoff.reset(),
            Effect::ExpireToken => {
                tracing::info!("{} expiring token before reconnect", self.prefix);
                self.ctx.credentials.expire();
            }
            Effect::ForwardReconnect { hint, reason } => {
                tracing::info!("{} reconnect requested ({hint:?}): {}", self.prefix, reason.describe());
                self.notify(Supervision::Reconnect { hint, reason });
            }
            Effect::SurfaceFatal(error) => {
                tracing::error!("{} connection failed permanently: {error}", self.prefix);
                self.notify(Supervision::Fatal(error));
            }
            Effect::NotifyRecovered => self.notify(Supervision::Recovered),
        }
    }

    fn open_transport(&mut self, config: K::Config) {
        self.generation += 1;
        let generation = self.generation;
        let sink = TransportSink::new(generation, self.tx.clone());
        let credentials = self.ctx.credentials.clone();
        let transports = self.ctx.transports.clone();
        let tx = self.tx.clone();
        let prefix = self.prefix.clone();
        self.connect_task = Some(tokio::spawn(async move {
            let result = match credentials.ensure_credentials().await {
                Ok(creds) => transports.open(&config, &creds, sink).await,
                Err(e) => {
                    tracing::warn!("{prefix} credentials unavailable: {e}");
                    Err(SocketError::token_load(&e))
                }
            };
            let _ = tx.send(Command::Opened { generation, result });
        }));
    }

    fn close_transport(&mut self) {
        self.generation += 1;
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(transport) = self.transport.take() {
            transport.close(NORMAL_CLOSURE, "closed by client");
        }
    }

    fn start_heartbeat(&mut self) {
        let generation = self.generation;
        let tick_tx = self.tx.clone();
        let lost_tx = self.tx.clone();
        self.heartbeat = Some(HealthMonitor::start(
            self.ctx.timing.heartbeat_interval(),
            self.ctx.timing.heartbeat_timeout(),
            move || {
                let _ = tick_tx.send(Command::HeartbeatTick { generation });
            },
            move || {
                let _ = lost_tx.send(Command::HeartbeatLost { generation });
            },
        ));
    }

    fn schedule_retry(&mut self, immediate: bool) {
        self.cancel_retry();
        let delay = if immediate {
            Duration::ZERO
        } else {
            self.backoff.next_delay()
        };
        tracing::info!(
            "{} retrying in {}ms (backoff attempt {})",
            self.prefix,
            delay.as_millis(),
            self.backoff.attempt()
        );
        let ticket = self.retry_ticket;
        let tx = self.tx.clone();
        self.retry_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Command::RetryElapsed { ticket });
        }));
    }

    fn cancel_retry(&mut self) {
        self.retry_ticket += 1;
        if let Some(task) = self.retry_task.take() {
            task.abort();
        }
    }

    fn notify(&self, signal: Supervision<K>) {
        match &self.ctx.supervisor {
            Some(supervisor) => {
                let _ = supervisor.send(SupervisorSignal {
                    source: self.ctx.tag.clone(),
                    signal,
                });
            }
            None if matches!(signal, Supervision::Reconnect { .. }) => {
                tracing::warn!("{} no supervisor to handle reconnect", self.prefix);
            }
            None => {}
        }
    }
}

impl<K: SocketKind> Drop for Worker<K> {
    fn drop(&mut self) {
        if let Some(task) = self.retry_task.take() {
            task.abort();
        }
        self.close_transport();
    }
}
