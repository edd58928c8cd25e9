use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use crate::call::CallClaim;
use crate::config::ClientConfig;
use crate::errors::LinkError;
use crate::events::{EventEmitter, LinkEvent};
use crate::network::NetworkTarget;
use crate::sfu::{ReconnectDetails, ReconnectStrategy, Sfu, SfuConfig, SfuState};
use crate::socket::backoff::Backoff;
use crate::socket::transport::TransportFactory;
use crate::socket::{
    ConnectionEvent, ConnectionKind, RestartReason, SocketContext, SocketHandle,
    SocketStateMachine, Supervision, SupervisorSignal,
};
use crate::token::TokenManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPhase {
    Idle,
    Joining,
    FastReconnecting,
    Rejoining,
    /// The session hit an unrecoverable error. Nothing is retried.
    Failed,
    /// The call was left.
    Ended,
}

/// Diagnostics view of the reconnect session.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectSnapshot {
    pub session_id: String,
    pub attempt_count: u32,
    pub fast_attempts: u32,
    pub phase: ReconnectPhase,
    pub last_reconnect_at: Option<DateTime<Utc>>,
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

struct Session {
    base: SfuConfig,
    session_id: String,
    attempt_count: u32,
    fast_attempts: u32,
    fast_backoff: Backoff,
    phase: ReconnectPhase,
    last_reconnect_at: Option<DateTime<Utc>>,
    machine: Option<SocketStateMachine<Sfu>>,
    /// Previous session's machine, kept so it can settle into `Rejoin`.
    retired: Option<SocketStateMachine<Sfu>>,
    /// Only the fast reconnect carrying this ticket may still run.
    fast_ticket: u64,
    leave_timer: Option<JoinHandle<()>>,
    leave_ticket: u64,
}

impl Session {
    fn snapshot(&self) -> ReconnectSnapshot {
        ReconnectSnapshot {
            session_id: self.session_id.clone(),
            attempt_count: self.attempt_count,
            fast_attempts: self.fast_attempts,
            phase: self.phase,
            last_reconnect_at: self.last_reconnect_at,
        }
    }

    fn ensure_active(&self) -> Result<(), LinkError> {
        match self.phase {
            ReconnectPhase::Ended => Err(LinkError::CallEnded),
            _ => Ok(()),
        }
    }

    fn config(&self, reconnect: Option<ReconnectDetails>) -> SfuConfig {
        SfuConfig {
            session_id: self.session_id.clone(),
            reconnect,
            ..self.base.clone()
        }
    }

    fn cancel_fast(&mut self) {
        self.fast_ticket += 1;
    }

    fn cancel_leave_timer(&mut self) {
        if let Some(timer) = self.leave_timer.take() {
            timer.abort();
        }
        self.leave_ticket += 1;
    }
}

/// Timer and watcher wakeups, handled on the supervisor task.
enum Wake {
    /// A delayed fast reconnect of `source` is due.
    FastReconnect {
        source: String,
        ticket: u64,
        reason: String,
    },
    /// The socket of `source` left `Connected`.
    Disconnected { source: String },
    /// The disconnect grace period ran out.
    LeaveTimeout { ticket: u64 },
}

struct Shared {
    session: Mutex<Session>,
    current: RwLock<Option<SocketHandle<Sfu>>>,
    snapshot: watch::Sender<ReconnectSnapshot>,
    transports: Arc<dyn TransportFactory<Sfu>>,
    tokens: Arc<TokenManager>,
    timing: ClientConfig,
    emitter: EventEmitter,
    signals: mpsc::UnboundedSender<SupervisorSignal<Sfu>>,
    wakes: mpsc::UnboundedSender<Wake>,
    claim: std::sync::Mutex<Option<Arc<CallClaim>>>,
}

/// Owns the SFU socket of one call and decides how it recovers.
///
/// The SFU socket never picks a strategy itself; it forwards the server's hint
/// here. `fast` reuses the session, `rejoin`/`migrate`/`unspecified` replace
/// it with a new session id. Operations are serialized on the session lock.
///
/// A call that stays disconnected longer than `leave_after_disconnect_ms` is
/// left automatically and reported as [`LinkEvent::CallLeft`].
pub struct ReconnectOrchestrator {
    shared: Arc<Shared>,
    supervisor: JoinHandle<()>,
}

impl ReconnectOrchestrator {
    /// `config.session_id` seeds the first session; an empty one gets a fresh id.
    pub fn new(
        config: SfuConfig,
        transports: Arc<dyn TransportFactory<Sfu>>,
        tokens: Arc<TokenManager>,
        timing: ClientConfig,
        emitter: EventEmitter,
    ) -> Self {
        let session_id = if config.session_id.is_empty() {
            new_session_id()
        } else {
            config.session_id.clone()
        };
        let fast_backoff = Backoff::new(
            timing.fast_reconnect_base_delay(),
            timing.retry_max_delay(),
            timing.retry_jitter,
        )
        .immediate_first();
        let session = Session {
            base: config,
            session_id,
            attempt_count: 0,
            fast_attempts: 0,
            fast_backoff,
            phase: ReconnectPhase::Idle,
            last_reconnect_at: None,
            machine: None,
            retired: None,
            fast_ticket: 0,
            leave_timer: None,
            leave_ticket: 0,
        };
        let (snapshot, _) = watch::channel(session.snapshot());
        let (signals, mut signal_rx) = mpsc::unbounded_channel();
        let (wakes, mut wake_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            session: Mutex::new(session),
            current: RwLock::new(None),
            snapshot,
            transports,
            tokens,
            timing,
            emitter,
            signals,
            wakes,
            claim: std::sync::Mutex::new(None),
        });

        let worker = shared.clone();
        let supervisor = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(signal) = signal_rx.recv() => worker.on_signal(signal).await,
                    Some(wake) = wake_rx.recv() => worker.on_wake(wake).await,
                    else => break,
                }
            }
        });
        Self { shared, supervisor }
    }

    /// Open the first session. A no-op once a session socket exists.
    pub async fn join(&self) -> Result<(), LinkError> {
        self.shared.join().await
    }

    /// Reconnect the signaling socket of the current session.
    pub async fn fast_reconnect(&self, reason: &str) -> Result<(), LinkError> {
        let mut session = self.shared.session.lock().await;
        self.shared.fast_reconnect_locked(&mut session, reason)
    }

    /// Replace the session with a new id and join again from scratch.
    pub async fn rejoin(&self, reason: &str) -> Result<(), LinkError> {
        let mut session = self.shared.session.lock().await;
        self.shared
            .replace_session_locked(&mut session, ReconnectStrategy::Rejoin, reason)
    }

    /// Same as [`rejoin`](Self::rejoin), reported to the server as a migration.
    pub async fn migrate(&self, reason: &str) -> Result<(), LinkError> {
        let mut session = self.shared.session.lock().await;
        self.shared
            .replace_session_locked(&mut session, ReconnectStrategy::Migrate, reason)
    }

    /// Disconnect the session socket and end the reconnect session.
    pub async fn leave(&self) {
        self.shared.leave().await;
    }

    pub fn snapshot(&self) -> ReconnectSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReconnectSnapshot> {
        self.shared.snapshot.subscribe()
    }

    pub fn session_id(&self) -> String {
        self.shared.snapshot.borrow().session_id.clone()
    }

    pub fn attempt_count(&self) -> u32 {
        self.shared.snapshot.borrow().attempt_count
    }

    /// Handle to the current session's socket.
    pub fn sfu(&self) -> Option<SocketHandle<Sfu>> {
        self.shared.current.read().unwrap().clone()
    }

    pub fn state(&self) -> Option<SfuState> {
        self.sfu().map(|handle| handle.state())
    }

    /// The call slot is released whenever this session ends.
    pub(crate) fn hold_claim(&self, claim: Arc<CallClaim>) {
        *self.shared.claim.lock().unwrap() = Some(claim);
    }
}

impl Drop for ReconnectOrchestrator {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

impl NetworkTarget for ReconnectOrchestrator {
    fn on_network_changed(&self, available: bool) {
        if let Some(handle) = self.sfu() {
            handle.on_network_changed(available);
        }
    }
}

impl Shared {
    fn publish(&self, session: &Session) {
        self.snapshot.send_replace(session.snapshot());
    }

    fn spawn_machine(&self, session_id: &str) -> SocketStateMachine<Sfu> {
        SocketStateMachine::spawn(
            SocketContext::new(
                session_id,
                self.transports.clone(),
                self.tokens.clone(),
                self.timing.clone(),
                self.emitter.clone(),
            )
            .with_supervisor(self.signals.clone()),
        )
    }

    fn install(&self, session: &mut Session, machine: SocketStateMachine<Sfu>) {
        let handle = machine.handle();
        self.watch_disconnects(&session.session_id, &handle);
        *self.current.write().unwrap() = Some(handle);
        session.retired = session.machine.replace(machine);
    }

    /// Reports every drop out of `Connected`. Ends with the machine.
    fn watch_disconnects(&self, session_id: &str, handle: &SocketHandle<Sfu>) {
        let mut states = handle.subscribe();
        let wakes = self.wakes.clone();
        let source = session_id.to_string();
        tokio::spawn(async move {
            let mut connected = states.borrow_and_update().is_connected();
            while states.changed().await.is_ok() {
                let now = states.borrow_and_update().is_connected();
                if connected && !now {
                    let wake = Wake::Disconnected {
                        source: source.clone(),
                    };
                    if wakes.send(wake).is_err() {
                        break;
                    }
                }
                connected = now;
            }
        });
    }

    fn current_connected(&self) -> bool {
        self.current
            .read()
            .unwrap()
            .as_ref()
            .is_some_and(|handle| handle.state().is_connected())
    }

    async fn join(&self) -> Result<(), LinkError> {
        let mut session = self.session.lock().await;
        session.ensure_active()?;
        if session.machine.is_some() {
            return Ok(());
        }
        tracing::info!("[reconnect] joining session {}", session.session_id);
        let machine = self.spawn_machine(&session.session_id);
        machine
            .handle()
            .connect(session.config(None), ConnectionKind::Initial);
        self.install(&mut session, machine);
        session.phase = ReconnectPhase::Joining;
        self.publish(&session);
        Ok(())
    }

    fn fast_reconnect_locked(&self, session: &mut Session, reason: &str) -> Result<(), LinkError> {
        session.ensure_active()?;
        let handle = session
            .machine
            .as_ref()
            .map(|machine| machine.handle())
            .ok_or(LinkError::NotConnected)?;
        let details = ReconnectDetails {
            previous_session_id: session.session_id.clone(),
            strategy: ReconnectStrategy::Fast,
            attempt: session.attempt_count,
            reason: reason.to_string(),
        };
        // A live socket only yields to a forced connect.
        let kind = if handle.state().is_connected() {
            ConnectionKind::ForceReconnection
        } else {
            ConnectionKind::AutomaticReconnection
        };
        tracing::info!(
            "[reconnect] fast reconnect of session {} ({reason})",
            session.session_id
        );
        handle.connect(session.config(Some(details)), kind);
        session.phase = ReconnectPhase::FastReconnecting;
        session.last_reconnect_at = Some(Utc::now());
        self.emitter.emit(LinkEvent::ReconnectScheduled {
            strategy: ReconnectStrategy::Fast,
            attempt: session.attempt_count,
        });
        self.publish(session);
        Ok(())
    }

    fn replace_session_locked(
        &self,
        session: &mut Session,
        strategy: ReconnectStrategy,
        reason: &str,
    ) -> Result<(), LinkError> {
        session.ensure_active()?;
        let previous = std::mem::replace(&mut session.session_id, new_session_id());
        session.attempt_count += 1;
        session.fast_attempts = 0;
        session.fast_backoff.reset();
        session.cancel_fast();
        if let Some(old) = &session.machine {
            old.send_event(ConnectionEvent::Rejoin);
        }

        let details = ReconnectDetails {
            previous_session_id: previous.clone(),
            strategy,
            attempt: session.attempt_count,
            reason: reason.to_string(),
        };
        let machine = self.spawn_machine(&session.session_id);
        machine
            .handle()
            .connect(session.config(Some(details)), ConnectionKind::Initial);
        self.install(session, machine);
        session.phase = ReconnectPhase::Rejoining;
        session.last_reconnect_at = Some(Utc::now());

        tracing::info!(
            "[reconnect] {strategy:?} attempt {}: session {previous} -> {} ({reason})",
            session.attempt_count,
            session.session_id
        );
        self.emitter.emit(LinkEvent::SessionReplaced {
            previous_session_id: previous,
            session_id: session.session_id.clone(),
            attempt: session.attempt_count,
        });
        self.emitter.emit(LinkEvent::ReconnectScheduled {
            strategy,
            attempt: session.attempt_count,
        });
        self.publish(session);
        Ok(())
    }

    async fn on_signal(&self, signal: SupervisorSignal<Sfu>) {
        let source = signal.source;
        match signal.signal {
            Supervision::Reconnect { hint, reason } => {
                if let Err(e) = self.on_reconnect(&source, hint, &reason.describe()).await {
                    tracing::debug!("[reconnect] {hint:?} from {source} skipped: {e}");
                }
            }
            Supervision::Recovered => {
                let mut session = self.session.lock().await;
                if session.session_id != source {
                    return;
                }
                session.fast_attempts = 0;
                session.fast_backoff.reset();
                session.cancel_fast();
                session.cancel_leave_timer();
                if session.phase != ReconnectPhase::Ended {
                    session.phase = ReconnectPhase::Idle;
                }
                self.publish(&session);
            }
            Supervision::Fatal(error) => {
                let mut session = self.session.lock().await;
                if session.session_id != source {
                    return;
                }
                tracing::error!("[reconnect] session {source} failed: {error}");
                session.cancel_fast();
                if session.phase != ReconnectPhase::Ended {
                    session.phase = ReconnectPhase::Failed;
                }
                self.publish(&session);
                self.emitter.emit(LinkEvent::CallFailed {
                    session_id: source,
                    error,
                });
            }
        }
    }

    async fn on_reconnect(
        &self,
        source: &str,
        hint: ReconnectStrategy,
        reason: &str,
    ) -> Result<(), LinkError> {
        let strategy = match hint {
            ReconnectStrategy::Fast => return self.fast_with_budget(source, reason).await,
            ReconnectStrategy::Migrate => ReconnectStrategy::Migrate,
            ReconnectStrategy::Rejoin | ReconnectStrategy::Unspecified => ReconnectStrategy::Rejoin,
        };
        let mut session = self.session.lock().await;
        if session.session_id != source {
            tracing::debug!("[reconnect] ignoring {hint:?} from retired session {source}");
            return Ok(());
        }
        self.replace_session_locked(&mut session, strategy, reason)
    }

    async fn fast_with_budget(&self, source: &str, reason: &str) -> Result<(), LinkError> {
        let mut session = self.session.lock().await;
        if session.session_id != source {
            tracing::debug!("[reconnect] ignoring fast hint from retired session {source}");
            return Ok(());
        }
        if session.fast_attempts >= self.timing.fast_reconnect_max_attempts {
            tracing::info!(
                "[reconnect] {} fast reconnects failed, escalating to rejoin",
                session.fast_attempts
            );
            return self.replace_session_locked(&mut session, ReconnectStrategy::Rejoin, reason);
        }
        session.fast_attempts += 1;
        session.cancel_fast();
        let delay = session.fast_backoff.next_delay();
        self.publish(&session);
        if delay.is_zero() {
            return self.fast_reconnect_locked(&mut session, reason);
        }

        tracing::debug!("[reconnect] fast reconnect in {}ms", delay.as_millis());
        let wake = Wake::FastReconnect {
            source: source.to_string(),
            ticket: session.fast_ticket,
            reason: reason.to_string(),
        };
        self.wake_after(delay, wake);
        Ok(())
    }

    fn wake_after(&self, delay: Duration, wake: Wake) -> JoinHandle<()> {
        let wakes = self.wakes.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = wakes.send(wake);
        })
    }

    async fn on_wake(&self, wake: Wake) {
        match wake {
            Wake::FastReconnect {
                source,
                ticket,
                reason,
            } => {
                let mut session = self.session.lock().await;
                if session.session_id != source
                    || session.fast_ticket != ticket
                    || session.phase == ReconnectPhase::Failed
                {
                    return;
                }
                if let Err(e) = self.fast_reconnect_locked(&mut session, &reason) {
                    tracing::debug!("[reconnect] delayed fast reconnect skipped: {e}");
                }
            }
            Wake::Disconnected { source } => {
                let mut session = self.session.lock().await;
                if session.phase == ReconnectPhase::Ended || session.leave_timer.is_some() {
                    return;
                }
                let Some(grace) = self.timing.leave_after_disconnect() else {
                    return;
                };
                // Stale report: the current socket is already back.
                if self.current_connected() {
                    return;
                }
                tracing::info!(
                    "[reconnect] {source} disconnected, leaving in {}ms unless it recovers",
                    grace.as_millis()
                );
                session.leave_ticket += 1;
                let wake = Wake::LeaveTimeout {
                    ticket: session.leave_ticket,
                };
                session.leave_timer = Some(self.wake_after(grace, wake));
            }
            Wake::LeaveTimeout { ticket } => {
                let mut session = self.session.lock().await;
                if session.leave_ticket != ticket || session.phase == ReconnectPhase::Ended {
                    return;
                }
                session.leave_timer = None;
                if self.current_connected() {
                    return;
                }
                let reason = format!(
                    "disconnected for more than {}ms",
                    self.timing.leave_after_disconnect_ms
                );
                tracing::warn!("[reconnect] leaving session {}: {reason}", session.session_id);
                let session_id = session.session_id.clone();
                self.leave_locked(&mut session);
                self.emitter.emit(LinkEvent::CallLeft { session_id, reason });
            }
        }
    }

    async fn leave(&self) {
        let mut session = self.session.lock().await;
        self.leave_locked(&mut session);
    }

    fn leave_locked(&self, session: &mut Session) {
        if session.phase == ReconnectPhase::Ended {
            return;
        }
        tracing::info!("[reconnect] leaving session {}", session.session_id);
        if let Some(machine) = &session.machine {
            machine.send_event(ConnectionEvent::RequiredDisconnection);
        }
        session.cancel_fast();
        session.cancel_leave_timer();
        session.phase = ReconnectPhase::Ended;
        self.publish(session);
        if let Some(claim) = self.claim.lock().unwrap().take() {
            claim.release();
        }
    }
}
