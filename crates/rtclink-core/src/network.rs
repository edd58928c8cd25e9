use std::sync::{Arc, Mutex, Weak};

use futures_util::{Stream, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::socket::{ConnectionEvent, SocketHandle, SocketKind};

/// Receives reachability changes.
pub trait NetworkTarget: Send + Sync {
    fn on_network_changed(&self, available: bool);
}

impl<K: SocketKind> NetworkTarget for SocketHandle<K> {
    fn on_network_changed(&self, available: bool) {
        let event = if available {
            ConnectionEvent::NetworkAvailable
        } else {
            ConnectionEvent::NetworkUnavailable
        };
        self.send_event(event);
    }
}

/// Current network reachability, fanned out to registered targets.
///
/// Targets are held weakly; a dropped socket or call simply stops receiving.
pub struct NetworkMonitor {
    state: watch::Sender<bool>,
    targets: Mutex<Vec<Weak<dyn NetworkTarget>>>,
}

impl NetworkMonitor {
    pub fn new(available: bool) -> Self {
        let (state, _) = watch::channel(available);
        Self {
            state,
            targets: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    pub fn is_available(&self) -> bool {
        *self.state.borrow()
    }

    pub fn register(&self, target: &Arc<dyn NetworkTarget>) {
        self.targets.lock().unwrap().push(Arc::downgrade(target));
    }

    /// Record a reachability change. Repeats of the current value are dropped.
    pub fn set_available(&self, available: bool) {
        let changed = self.state.send_if_modified(|current| {
            if *current == available {
                return false;
            }
            *current = available;
            true
        });
        if !changed {
            return;
        }
        tracing::info!(
            "[network] {}",
            if available { "available" } else { "unavailable" }
        );

        let live: Vec<Arc<dyn NetworkTarget>> = {
            let mut targets = self.targets.lock().unwrap();
            targets.retain(|t| t.strong_count() > 0);
            targets.iter().filter_map(Weak::upgrade).collect()
        };
        for target in live {
            target.on_network_changed(available);
        }
    }

    /// Pump a reachability stream into the monitor until it ends.
    pub fn spawn<S>(self: Arc<Self>, updates: S) -> JoinHandle<()>
    where
        S: Stream<Item = bool> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut updates = Box::pin(updates);
            while let Some(available) = updates.next().await {
                self.set_available(available);
            }
        })
    }
}
