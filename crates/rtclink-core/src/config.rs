use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::LinkError;

const CONFIG_FILE: &str = "rtclink.json";

/// Timing knobs for sockets and reconnection. Every field has a default.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Fraction of each delay randomly added or removed, 0.0 to 1.0.
    pub retry_jitter: f64,
    pub fast_reconnect_max_attempts: u32,
    pub fast_reconnect_base_delay_ms: u64,
    pub connection_timeout_ms: u64,
    /// How long a call may stay disconnected before it is left. 0 disables.
    pub leave_after_disconnect_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5_000,
            heartbeat_timeout_ms: 15_000,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
            retry_jitter: 0.1,
            fast_reconnect_max_attempts: 5,
            fast_reconnect_base_delay_ms: 500,
            connection_timeout_ms: 60_000,
            leave_after_disconnect_ms: 30_000,
        }
    }
}

impl ClientConfig {
    /// Read a config file. Fields missing from the file keep their defaults.
    pub fn load(path: &Path) -> Result<Self, LinkError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| LinkError::Config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&contents)
            .map_err(|e| LinkError::Config(format!("{}: {e}", path.display())))
    }

    /// Read `<data_dir>/rtclink.json`, falling back to defaults if it is missing or corrupt.
    pub fn load_or_default(data_dir: &str) -> Self {
        let path = Path::new(data_dir).join(CONFIG_FILE);
        if !path.exists() {
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("[config] using defaults: {e}");
            Self::default()
        })
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn fast_reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.fast_reconnect_base_delay_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn leave_after_disconnect(&self) -> Option<Duration> {
        (self.leave_after_disconnect_ms > 0)
            .then(|| Duration::from_millis(self.leave_after_disconnect_ms))
    }
}
