use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;

use crate::errors::LinkError;
use crate::reconnect::{ReconnectOrchestrator, ReconnectSnapshot};
use crate::sfu::{SfuJoinAck, SfuState};
use crate::token::TokenManager;

/// Ownership of the client's single call slot.
///
/// Acquired atomically and released at most once, so a finished call can
/// never clear the slot of the call that came after it.
pub(crate) struct CallClaim {
    slot: Arc<watch::Sender<bool>>,
    released: AtomicBool,
}

impl CallClaim {
    /// Take the slot, or `None` if another call holds it.
    pub(crate) fn acquire(slot: &Arc<watch::Sender<bool>>) -> Option<Arc<Self>> {
        let claimed = slot.send_if_modified(|active| {
            if *active {
                false
            } else {
                *active = true;
                true
            }
        });
        claimed.then(|| {
            Arc::new(Self {
                slot: slot.clone(),
                released: AtomicBool::new(false),
            })
        })
    }

    pub(crate) fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.slot.send_replace(false);
        }
    }
}

impl Drop for CallClaim {
    fn drop(&mut self) {
        self.release();
    }
}

/// One joined call: the SFU token manager plus the reconnect session that owns
/// the SFU socket.
///
/// While the session lives the client's call-aware policy keeps the
/// coordinator connected. Leaving or dropping the session releases it, and so
/// does the reconnect session leaving on its own after a long disconnect.
pub struct CallSession {
    call_cid: String,
    tokens: Arc<TokenManager>,
    orchestrator: Arc<ReconnectOrchestrator>,
    claim: Arc<CallClaim>,
}

impl CallSession {
    pub(crate) fn new(
        call_cid: String,
        tokens: Arc<TokenManager>,
        orchestrator: Arc<ReconnectOrchestrator>,
        claim: Arc<CallClaim>,
    ) -> Self {
        orchestrator.hold_claim(claim.clone());
        Self {
            call_cid,
            tokens,
            orchestrator,
            claim,
        }
    }

    pub fn call_cid(&self) -> &str {
        &self.call_cid
    }

    pub fn session_id(&self) -> String {
        self.orchestrator.session_id()
    }

    pub fn attempt_count(&self) -> u32 {
        self.orchestrator.attempt_count()
    }

    pub fn snapshot(&self) -> ReconnectSnapshot {
        self.orchestrator.snapshot()
    }

    pub fn state(&self) -> Option<SfuState> {
        self.orchestrator.state()
    }

    pub fn reconnect(&self) -> &ReconnectOrchestrator {
        &self.orchestrator
    }

    /// Replace the SFU token, e.g. after the host refreshed it out of band.
    pub fn update_token(&self, token: impl Into<String>) {
        self.tokens.update_token(token);
    }

    /// Wait until the current session's socket has joined.
    pub async fn await_joined(&self, timeout: Duration) -> Result<SfuJoinAck, LinkError> {
        let handle = self.orchestrator.sfu().ok_or(LinkError::NotConnected)?;
        handle.await_connected(timeout).await
    }

    pub async fn send(&self, payload: Vec<u8>) -> Result<(), LinkError> {
        let handle = self.orchestrator.sfu().ok_or(LinkError::NotConnected)?;
        handle.send(payload).await
    }

    /// Disconnect the SFU socket and end the reconnect session.
    pub async fn leave(&self) {
        tracing::info!("[call] leaving {}", self.call_cid);
        self.orchestrator.leave().await;
        self.claim.release();
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        self.claim.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_claim_at_a_time() {
        let (slot, _) = watch::channel(false);
        let slot = Arc::new(slot);

        let first = CallClaim::acquire(&slot).unwrap();
        assert!(*slot.borrow());
        assert!(CallClaim::acquire(&slot).is_none());

        first.release();
        assert!(!*slot.borrow());
        let second = CallClaim::acquire(&slot).unwrap();

        // A released claim never touches the slot again.
        first.release();
        drop(first);
        assert!(*slot.borrow());
        drop(second);
        assert!(!*slot.borrow());
    }

    #[tokio::test]
    async fn concurrent_acquires_have_one_winner() {
        let (slot, _) = watch::channel(false);
        let slot = Arc::new(slot);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let slot = slot.clone();
            handles.push(tokio::spawn(async move { CallClaim::acquire(&slot) }));
        }
        let mut winners = Vec::new();
        for handle in handles {
            if let Some(claim) = handle.await.unwrap() {
                winners.push(claim);
            }
        }
        assert_eq!(winners.len(), 1);
    }
}
