use std::sync::Once;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "rtclink_core=debug";

/// Install a fmt subscriber filtered by `RUST_LOG`. Safe to call more than once.
///
/// Hosts that install their own subscriber should not call this; the core only
/// emits `tracing` events and never requires a subscriber.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        // A host may already own the global subscriber.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .try_init();
    });
}
