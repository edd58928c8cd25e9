use std::sync::Arc;

use futures_util::Stream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::call::{CallClaim, CallSession};
use crate::config::ClientConfig;
use crate::coordinator::{Coordinator, CoordinatorAck, CoordinatorConfig, CoordinatorState};
use crate::credentials::{CredentialsManager, CredentialsProvider};
use crate::errors::LinkError;
use crate::events::{EventEmitter, LinkEventListener};
use crate::lifecycle::{self, LifecycleHandler, LifecycleSignal, LifecycleTarget};
use crate::network::{NetworkMonitor, NetworkTarget};
use crate::policy::{
    CallAwareConnectionPolicy, ConnectionPolicy, NetworkConnectionPolicy,
    SocketStateConnectionPolicy,
};
use crate::reconnect::ReconnectOrchestrator;
use crate::sfu::{Sfu, SfuConfig};
use crate::socket::transport::TransportFactory;
use crate::socket::{ConnectionEvent, ConnectionKind, SocketHandle, SocketStateMachine};
use crate::token::{TokenManager, TokenProvider};

/// Entry point owning the coordinator connection and everything that steers it.
///
/// Must be created inside a tokio runtime; socket workers are spawned on it.
pub struct LinkClient {
    config: ClientConfig,
    emitter: EventEmitter,
    credentials: Arc<CredentialsManager>,
    coordinator: SocketStateMachine<Coordinator>,
    // Strong ref for the monitor's weak registration.
    _coordinator_target: Arc<dyn NetworkTarget>,
    network: Arc<NetworkMonitor>,
    lifecycle: Arc<LifecycleHandler>,
    active_call: Arc<watch::Sender<bool>>,
    sfu_transports: Arc<dyn TransportFactory<Sfu>>,
}

impl LinkClient {
    pub fn new(
        config: ClientConfig,
        coordinator_transports: Arc<dyn TransportFactory<Coordinator>>,
        sfu_transports: Arc<dyn TransportFactory<Sfu>>,
    ) -> Self {
        let emitter = EventEmitter::new();
        let credentials = Arc::new(CredentialsManager::new());
        let coordinator = SocketStateMachine::coordinator(
            coordinator_transports,
            credentials.clone(),
            config.clone(),
            emitter.clone(),
        );

        let network = Arc::new(NetworkMonitor::new(true));
        let coordinator_target: Arc<dyn NetworkTarget> = Arc::new(coordinator.handle());
        network.register(&coordinator_target);

        let (active_call, _) = watch::channel(false);
        let active_call = Arc::new(active_call);
        let policies: Vec<Arc<dyn ConnectionPolicy>> = vec![
            Arc::new(CallAwareConnectionPolicy::new(active_call.subscribe())),
            Arc::new(SocketStateConnectionPolicy::new(
                coordinator.handle().subscribe(),
            )),
            Arc::new(NetworkConnectionPolicy::new(network.subscribe())),
        ];
        let target: Arc<dyn LifecycleTarget> = Arc::new(coordinator.handle());
        let lifecycle = Arc::new(LifecycleHandler::new(policies, target));

        tracing::info!("[client] created");
        Self {
            config,
            emitter,
            credentials,
            coordinator,
            _coordinator_target: coordinator_target,
            network,
            lifecycle,
            active_call,
            sfu_transports,
        }
    }

    /// Build a client with timing read from `<data_dir>/rtclink.json`.
    pub fn with_data_dir(
        data_dir: &str,
        coordinator_transports: Arc<dyn TransportFactory<Coordinator>>,
        sfu_transports: Arc<dyn TransportFactory<Sfu>>,
    ) -> Self {
        Self::new(
            ClientConfig::load_or_default(data_dir),
            coordinator_transports,
            sfu_transports,
        )
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn add_listener(&self, listener: Arc<dyn LinkEventListener>) {
        self.emitter.add_listener(listener);
    }

    pub fn set_credentials_provider(&self, provider: Arc<dyn CredentialsProvider>) {
        self.credentials.set_provider(provider);
    }

    pub fn credentials(&self) -> &CredentialsManager {
        &self.credentials
    }

    pub fn update_token(&self, token: impl Into<String>) {
        self.credentials.update_token(token);
    }

    pub fn coordinator(&self) -> SocketHandle<Coordinator> {
        self.coordinator.handle()
    }

    pub fn coordinator_state(&self) -> CoordinatorState {
        self.coordinator.state()
    }

    /// Connect the coordinator socket and wait for the server's ack.
    pub async fn connect(&self, config: CoordinatorConfig) -> Result<CoordinatorAck, LinkError> {
        tracing::info!("[client] connecting to {} as {}", config.url, config.user.id);
        let handle = self.coordinator.handle();
        handle.connect(config, ConnectionKind::Initial);
        handle.await_connected(self.config.connection_timeout()).await
    }

    pub fn disconnect(&self) {
        tracing::info!("[client] disconnecting");
        self.coordinator
            .send_event(ConnectionEvent::RequiredDisconnection);
    }

    /// App came to the foreground. Returns whether the coordinator was resumed.
    pub fn on_app_resumed(&self) -> bool {
        self.lifecycle.resume()
    }

    /// App went to the background. Returns whether the coordinator was stopped.
    pub fn on_app_stopped(&self) -> bool {
        self.lifecycle.stopped()
    }

    pub fn observe_lifecycle<S>(&self, signals: S) -> JoinHandle<()>
    where
        S: Stream<Item = LifecycleSignal> + Send + 'static,
    {
        lifecycle::observe_lifecycle(signals, self.lifecycle.clone())
    }

    pub fn set_network_available(&self, available: bool) {
        self.network.set_available(available);
    }

    pub fn is_network_available(&self) -> bool {
        self.network.is_available()
    }

    pub fn observe_network<S>(&self, updates: S) -> JoinHandle<()>
    where
        S: Stream<Item = bool> + Send + 'static,
    {
        self.network.clone().spawn(updates)
    }

    /// Join a call's SFU. One call at a time.
    ///
    /// The returned session owns the SFU socket; drop it or call
    /// [`CallSession::leave`] to hang up.
    pub async fn join_call(
        &self,
        call_cid: &str,
        sfu_url: &str,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<CallSession, LinkError> {
        let claim = CallClaim::acquire(&self.active_call).ok_or(LinkError::CallInProgress)?;
        let token_manager = Arc::new(TokenManager::new());
        token_manager.set_provider(tokens);

        let orchestrator = Arc::new(ReconnectOrchestrator::new(
            SfuConfig {
                url: sfu_url.to_string(),
                call_cid: call_cid.to_string(),
                session_id: String::new(),
                reconnect: None,
            },
            self.sfu_transports.clone(),
            token_manager.clone(),
            self.config.clone(),
            self.emitter.clone(),
        ));
        let target: Arc<dyn NetworkTarget> = orchestrator.clone();
        self.network.register(&target);

        tracing::info!("[client] joining call {call_cid}");
        let session = CallSession::new(
            call_cid.to_string(),
            token_manager,
            orchestrator.clone(),
            claim,
        );
        orchestrator.join().await?;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SocketErrorKind;
    use crate::socket::{ConnectionState, DisconnectedState, SocketKind};
    use crate::test_support::{
        CountingTokenProvider, FakeTransportFactory, coordinator_ack, coordinator_config,
        sfu_ack, test_timing, wait_until,
    };
    use async_trait::async_trait;
    use std::time::Duration;

    struct StaticCredentials;

    #[async_trait]
    impl CredentialsProvider for StaticCredentials {
        async fn load_token(&self) -> Result<String, LinkError> {
            Ok("coord-token".to_string())
        }

        fn cached_api_key(&self) -> String {
            "key-1".to_string()
        }

        fn user_id(&self) -> Option<String> {
            Some("alice".to_string())
        }
    }

    struct Rig {
        client: LinkClient,
        coordinators: Arc<FakeTransportFactory<Coordinator>>,
        sfus: Arc<FakeTransportFactory<Sfu>>,
    }

    fn rig() -> Rig {
        let coordinators = FakeTransportFactory::new();
        coordinators.auto_ack(coordinator_ack());
        let sfus = FakeTransportFactory::new();
        sfus.auto_ack(sfu_ack("any"));
        let client = LinkClient::new(test_timing(), coordinators.clone(), sfus.clone());
        Rig {
            client,
            coordinators,
            sfus,
        }
    }

    async fn connected() -> Rig {
        let rig = rig();
        rig.client.set_credentials_provider(Arc::new(StaticCredentials));
        let ack = rig.client.connect(coordinator_config()).await.unwrap();
        assert_eq!(ack, coordinator_ack());
        rig
    }

    fn offline<K: SocketKind>(state: &ConnectionState<K>) -> bool {
        matches!(
            state,
            ConnectionState::Disconnected(DisconnectedState::NetworkDisconnected)
        )
    }

    fn is_stopped(state: &CoordinatorState) -> bool {
        matches!(state, ConnectionState::Disconnected(DisconnectedState::Stopped))
    }

    #[tokio::test]
    async fn connect_uses_the_installed_credentials() {
        let rig = connected().await;
        let creds = rig.coordinators.last().unwrap().credentials;
        assert_eq!(creds.token, "coord-token");
        assert_eq!(creds.api_key.as_deref(), Some("key-1"));
        assert_eq!(creds.user_id.as_deref(), Some("alice"));
        assert!(rig.client.credentials().has_token());
    }

    #[tokio::test]
    async fn connect_without_credentials_fails_permanently() {
        let rig = rig();
        let err = rig.client.connect(coordinator_config()).await.unwrap_err();
        assert!(matches!(err, LinkError::Socket(e) if e.kind == SocketErrorKind::TokenLoad));
        assert!(rig.client.coordinator_state().is_terminal());
        assert_eq!(rig.coordinators.open_count(), 0);
    }

    #[tokio::test]
    async fn background_stop_and_foreground_resume() {
        let rig = connected().await;
        let handle = rig.client.coordinator();

        assert!(!rig.client.on_app_resumed());
        assert!(rig.client.on_app_stopped());
        wait_until(&handle, is_stopped).await;

        assert!(rig.client.on_app_resumed());
        wait_until(&handle, |s| s.is_connected()).await;
        assert_eq!(rig.coordinators.open_count(), 2);
    }

    #[tokio::test]
    async fn active_call_keeps_the_coordinator_up() {
        let rig = connected().await;
        let call = rig
            .client
            .join_call("default:call-1", "wss://sfu.test/ws", Arc::new(CountingTokenProvider::new("sfu")))
            .await
            .unwrap();
        call.await_joined(Duration::from_secs(5)).await.unwrap();

        assert!(!rig.client.on_app_stopped());
        assert!(rig.client.coordinator_state().is_connected());

        call.leave().await;
        assert!(rig.client.on_app_stopped());
        wait_until(&rig.client.coordinator(), is_stopped).await;
    }

    #[tokio::test]
    async fn one_call_at_a_time() {
        let rig = connected().await;
        let provider = || Arc::new(CountingTokenProvider::new("sfu"));
        let first = rig
            .client
            .join_call("default:call-1", "wss://sfu.test/ws", provider())
            .await
            .unwrap();
        first.await_joined(Duration::from_secs(5)).await.unwrap();
        assert!(matches!(
            rig.client
                .join_call("default:call-2", "wss://sfu.test/ws", provider())
                .await,
            Err(LinkError::CallInProgress)
        ));

        drop(first);
        let second = rig
            .client
            .join_call("default:call-2", "wss://sfu.test/ws", provider())
            .await
            .unwrap();
        rig.sfus.wait_for_opens(2).await;
        let config = rig.sfus.last().unwrap().config;
        assert_eq!(config.call_cid, "default:call-2");
        assert_eq!(config.session_id, second.session_id());
        assert!(!config.session_id.is_empty());
    }

    #[tokio::test]
    async fn finished_call_cannot_release_the_next_one() {
        let rig = connected().await;
        let provider = || Arc::new(CountingTokenProvider::new("sfu"));
        let first = rig
            .client
            .join_call("default:call-1", "wss://sfu.test/ws", provider())
            .await
            .unwrap();
        first.leave().await;

        let second = rig
            .client
            .join_call("default:call-2", "wss://sfu.test/ws", provider())
            .await
            .unwrap();
        second.await_joined(Duration::from_secs(5)).await.unwrap();
        drop(first);

        assert!(matches!(
            rig.client
                .join_call("default:call-3", "wss://sfu.test/ws", provider())
                .await,
            Err(LinkError::CallInProgress)
        ));
        assert!(!rig.client.on_app_stopped());
        assert!(rig.client.coordinator_state().is_connected());
    }

    #[tokio::test]
    async fn network_loss_reaches_both_sockets() {
        let rig = connected().await;
        let call = rig
            .client
            .join_call("default:call-1", "wss://sfu.test/ws", Arc::new(CountingTokenProvider::new("sfu")))
            .await
            .unwrap();
        call.await_joined(Duration::from_secs(5)).await.unwrap();
        let sfu = call.reconnect().sfu().unwrap();

        rig.client.set_network_available(false);
        wait_until(&rig.client.coordinator(), offline::<Coordinator>).await;
        wait_until(&sfu, offline::<Sfu>).await;
        assert!(!rig.client.on_app_resumed());

        rig.client.set_network_available(true);
        wait_until(&rig.client.coordinator(), |s| s.is_connected()).await;
        wait_until(&sfu, |s| s.is_connected()).await;
        assert_eq!(call.attempt_count(), 0);
    }

    #[tokio::test]
    async fn lifecycle_stream_drives_the_coordinator() {
        let rig = connected().await;
        let signals = futures_util::stream::iter(vec![LifecycleSignal::Stopped]);
        rig.client.observe_lifecycle(signals).await.unwrap();
        wait_until(&rig.client.coordinator(), is_stopped).await;
    }

    #[tokio::test]
    async fn update_token_replaces_the_coordinator_token() {
        let rig = connected().await;
        rig.client.update_token("fresh");
        assert_eq!(rig.client.credentials().token(), "fresh");
    }
}
