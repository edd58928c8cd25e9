//! Fakes and helpers shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};

use crate::config::ClientConfig;
use crate::coordinator::{CoordinatorAck, CoordinatorConfig, CoordinatorState, UserInfo};
use crate::errors::{LinkError, SocketError};
use crate::events::{EventEmitter, LinkEvent, LinkEventListener};
use crate::sfu::{SfuConfig, SfuJoinAck, SfuState};
use crate::socket::transport::{Transport, TransportFactory, TransportSink};
use crate::socket::{ConnectionState, SocketHandle, SocketKind};
use crate::token::{Credentials, TokenProvider};

const WAIT: Duration = Duration::from_secs(30);

pub(crate) fn test_timing() -> ClientConfig {
    ClientConfig {
        retry_jitter: 0.0,
        ..ClientConfig::default()
    }
}

pub(crate) fn coordinator_config() -> CoordinatorConfig {
    CoordinatorConfig {
        url: "wss://coordinator.test/connect".to_string(),
        user: UserInfo {
            id: "alice".to_string(),
            name: Some("Alice".to_string()),
            anonymous: false,
        },
    }
}

pub(crate) fn coordinator_ack() -> CoordinatorAck {
    CoordinatorAck {
        connection_id: "conn-1".to_string(),
        user_id: "alice".to_string(),
    }
}

pub(crate) fn sfu_config(session_id: &str) -> SfuConfig {
    SfuConfig {
        url: "wss://sfu.test/ws".to_string(),
        call_cid: "default:call-1".to_string(),
        session_id: session_id.to_string(),
        reconnect: None,
    }
}

pub(crate) fn sfu_ack(session_id: &str) -> SfuJoinAck {
    SfuJoinAck {
        session_id: session_id.to_string(),
        reconnected: false,
    }
}

/// Token provider returning `<prefix>-<n>` on its n-th load.
pub(crate) struct CountingTokenProvider {
    prefix: String,
    cached: Option<String>,
    delay: Option<Duration>,
    failure: Option<String>,
    loads: AtomicUsize,
}

impl CountingTokenProvider {
    pub(crate) fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            cached: None,
            delay: None,
            failure: None,
            loads: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::new("unused")
        }
    }

    pub(crate) fn with_cached(mut self, token: &str) -> Self {
        self.cached = Some(token.to_string());
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for CountingTokenProvider {
    async fn load_token(&self) -> Result<String, LinkError> {
        let n = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(message) => Err(LinkError::TokenLoad(message.clone())),
            None => Ok(format!("{}-{n}", self.prefix)),
        }
    }

    fn cached_token(&self) -> Option<String> {
        self.cached.clone()
    }
}

#[derive(Default)]
pub(crate) struct FakeTransport {
    sent: Mutex<Vec<Vec<u8>>>,
    health_checks: AtomicUsize,
    closed: Mutex<Option<(u16, String)>>,
}

impl FakeTransport {
    pub(crate) fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.lock().unwrap().is_some()
    }
}

impl Transport for FakeTransport {
    fn send(&self, payload: Vec<u8>) -> Result<(), SocketError> {
        self.sent.lock().unwrap().push(payload);
        Ok(())
    }

    fn send_health_check(&self) -> Result<(), SocketError> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self, code: u16, reason: &str) {
        *self.closed.lock().unwrap() = Some((code, reason.to_string()));
    }
}

/// One recorded `open` call.
pub(crate) struct Opened<K: SocketKind> {
    pub config: K::Config,
    pub credentials: Credentials,
    pub sink: TransportSink<K>,
    pub transport: Arc<FakeTransport>,
}

impl<K: SocketKind> Clone for Opened<K> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            credentials: self.credentials.clone(),
            sink: self.sink.clone(),
            transport: self.transport.clone(),
        }
    }
}

/// Records every open. Optionally acks each handshake or fails queued opens.
pub(crate) struct FakeTransportFactory<K: SocketKind> {
    opened: Mutex<Vec<Opened<K>>>,
    auto_ack: Mutex<Option<K::Ack>>,
    failures: Mutex<VecDeque<SocketError>>,
    notify: Notify,
}

impl<K: SocketKind> FakeTransportFactory<K> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            opened: Mutex::new(Vec::new()),
            auto_ack: Mutex::new(None),
            failures: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        })
    }

    pub(crate) fn auto_ack(&self, ack: K::Ack) {
        *self.auto_ack.lock().unwrap() = Some(ack);
    }

    pub(crate) fn fail_next(&self, error: SocketError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub(crate) fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub(crate) fn opened(&self, index: usize) -> Option<Opened<K>> {
        self.opened.lock().unwrap().get(index).cloned()
    }

    pub(crate) fn last(&self) -> Option<Opened<K>> {
        self.opened.lock().unwrap().last().cloned()
    }

    pub(crate) async fn wait_for_opens(&self, count: usize) {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.open_count() >= count {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(WAIT, wait).await.is_err() {
            panic!("expected {count} opens, saw {}", self.open_count());
        }
    }
}

#[async_trait]
impl<K: SocketKind> TransportFactory<K> for FakeTransportFactory<K> {
    async fn open(
        &self,
        config: &K::Config,
        credentials: &Credentials,
        sink: TransportSink<K>,
    ) -> Result<Arc<dyn Transport>, SocketError> {
        let transport = Arc::new(FakeTransport::default());
        self.opened.lock().unwrap().push(Opened {
            config: config.clone(),
            credentials: credentials.clone(),
            sink: sink.clone(),
            transport: transport.clone(),
        });
        let failure = self.failures.lock().unwrap().pop_front();
        let ack = self.auto_ack.lock().unwrap().clone();
        self.notify.notify_waiters();
        if let Some(error) = failure {
            return Err(error);
        }
        if let Some(ack) = ack {
            sink.ack(ack);
        }
        Ok(transport)
    }
}

struct ChannelListener(mpsc::UnboundedSender<LinkEvent>);

impl LinkEventListener for ChannelListener {
    fn on_event(&self, event: LinkEvent) {
        let _ = self.0.send(event);
    }
}

/// Every event the emitter produces from now on, in order.
pub(crate) fn event_channel(emitter: &EventEmitter) -> mpsc::UnboundedReceiver<LinkEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    emitter.add_listener(Arc::new(ChannelListener(tx)));
    rx
}

async fn next_matching<T>(
    events: &mut mpsc::UnboundedReceiver<LinkEvent>,
    mut pick: impl FnMut(LinkEvent) -> Option<T>,
) -> T {
    let wait = async {
        loop {
            match events.recv().await {
                Some(event) => {
                    if let Some(found) = pick(event) {
                        return found;
                    }
                }
                None => panic!("event emitter dropped"),
            }
        }
    };
    match tokio::time::timeout(WAIT, wait).await {
        Ok(found) => found,
        Err(_) => panic!("timed out waiting for event"),
    }
}

/// Skip ahead to the next coordinator state matching `pred`.
pub(crate) async fn next_coordinator_state(
    events: &mut mpsc::UnboundedReceiver<LinkEvent>,
    pred: impl Fn(&CoordinatorState) -> bool,
) -> CoordinatorState {
    next_matching(events, |event| match event {
        LinkEvent::CoordinatorStateChanged(state) if pred(&state) => Some(state),
        _ => None,
    })
    .await
}

/// Skip ahead to the next state of SFU session `session_id` matching `pred`.
pub(crate) async fn next_sfu_state(
    events: &mut mpsc::UnboundedReceiver<LinkEvent>,
    session_id: &str,
    pred: impl Fn(&SfuState) -> bool,
) -> SfuState {
    next_matching(events, |event| match event {
        LinkEvent::SfuStateChanged {
            session_id: id,
            state,
        } if id == session_id && pred(&state) => Some(state),
        _ => None,
    })
    .await
}

/// Wait until the socket's current state matches `pred`.
pub(crate) async fn wait_until<K: SocketKind>(
    handle: &SocketHandle<K>,
    pred: impl Fn(&ConnectionState<K>) -> bool,
) -> ConnectionState<K> {
    let mut rx = handle.subscribe();
    let state = match tokio::time::timeout(WAIT, rx.wait_for(|s| pred(s))).await {
        Ok(Ok(state)) => state.clone(),
        Ok(Err(_)) => panic!("socket worker stopped"),
        Err(_) => panic!("timed out waiting for state, last: {:?}", handle.state()),
    };
    state
}
