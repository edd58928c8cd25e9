use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::task::JoinHandle;

use crate::policy::ConnectionPolicy;
use crate::socket::{ConnectionEvent, SocketHandle, SocketKind};

/// Something that can be resumed and stopped with the app.
pub trait LifecycleTarget: Send + Sync {
    fn on_resume(&self);
    fn on_stop(&self);
}

impl<K: SocketKind> LifecycleTarget for SocketHandle<K> {
    fn on_resume(&self) {
        self.send_event(ConnectionEvent::Resume);
    }

    fn on_stop(&self) {
        self.send_event(ConnectionEvent::Stop);
    }
}

/// App lifecycle transitions fed in by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    Resumed,
    Stopped,
}

/// Forwards resume/stop to the target only when every policy agrees.
pub struct LifecycleHandler {
    policies: Vec<Arc<dyn ConnectionPolicy>>,
    target: Arc<dyn LifecycleTarget>,
}

impl LifecycleHandler {
    pub fn new(policies: Vec<Arc<dyn ConnectionPolicy>>, target: Arc<dyn LifecycleTarget>) -> Self {
        Self { policies, target }
    }

    /// Returns whether the target was resumed.
    pub fn resume(&self) -> bool {
        if !self.policies.iter().all(|p| p.should_connect()) {
            tracing::debug!("[lifecycle] resume vetoed by policy");
            return false;
        }
        tracing::info!("[lifecycle] resuming");
        self.target.on_resume();
        true
    }

    /// Returns whether the target was stopped.
    pub fn stopped(&self) -> bool {
        if !self.policies.iter().all(|p| p.should_disconnect()) {
            tracing::debug!("[lifecycle] stop vetoed by policy");
            return false;
        }
        tracing::info!("[lifecycle] stopping");
        self.target.on_stop();
        true
    }
}

/// Drive `handler` from a stream of lifecycle signals until the stream ends.
pub fn observe_lifecycle<S>(signals: S, handler: Arc<LifecycleHandler>) -> JoinHandle<()>
where
    S: Stream<Item = LifecycleSignal> + Send + 'static,
{
    tokio::spawn(async move {
        let mut signals = Box::pin(signals);
        while let Some(signal) = signals.next().await {
            match signal {
                LifecycleSignal::Resumed => handler.resume(),
                LifecycleSignal::Stopped => handler.stopped(),
            };
        }
        tracing::debug!("[lifecycle] signal stream ended");
    })
}
