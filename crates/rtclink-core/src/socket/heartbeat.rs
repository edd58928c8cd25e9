use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Liveness timer for a connected socket.
///
/// Calls `on_tick` every `interval` so the owner can send a health check.
/// Any [`ack`](Self::ack) pushes the deadline back. Once `timeout` passes in
/// silence, `on_lost` runs exactly once and the monitor stops.
pub struct HealthMonitor {
    last_seen: Arc<Mutex<Instant>>,
    task: JoinHandle<()>,
}

impl HealthMonitor {
    pub fn start<T, L>(interval: Duration, timeout: Duration, on_tick: T, on_lost: L) -> Self
    where
        T: Fn() + Send + 'static,
        L: FnOnce() + Send + 'static,
    {
        let last_seen = Arc::new(Mutex::new(Instant::now()));
        let seen = last_seen.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let silent_for = seen.lock().unwrap().elapsed();
                if silent_for >= timeout {
                    tracing::warn!("[heartbeat] no traffic for {}ms", silent_for.as_millis());
                    on_lost();
                    return;
                }
                on_tick();
            }
        });
        Self { last_seen, task }
    }

    /// Record inbound traffic.
    pub fn ack(&self) {
        *self.last_seen.lock().unwrap() = Instant::now();
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
