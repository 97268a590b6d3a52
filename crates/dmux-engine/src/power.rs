//! Link power handshake
//!
//! Power is negotiated over two one-bit lines: a level-triggered request the
//! engine drives through [`PowerVote`], and two edge-triggered lines from the
//! remote (power state, vote acknowledge) that the engine observes. Resume
//! waits out the full three-step sequence; each step has the same timeout
//! budget and a timeout retracts the vote so the remote is not left powered
//! on our account.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::error::EngineError;

/// Outgoing side of the power handshake.
pub trait PowerVote: Send + Sync {
    /// Drive the power-request line high or low.
    fn set_request(&self, enable: bool);

    /// Toggle the acknowledge line, confirming an observed remote power edge.
    fn toggle_ack(&self);
}

/// A watchable boolean with async level-waiting. Edge order does not matter:
/// waiting on a flag that is already set returns immediately.
#[derive(Debug, Clone)]
pub(crate) struct Flag {
    tx: watch::Sender<bool>,
}

impl Flag {
    pub fn new(set: bool) -> Self {
        let (tx, _) = watch::channel(set);
        Flag { tx }
    }

    // send_replace, not send: edges arrive while nobody is subscribed yet,
    // and send drops the update when there is no receiver.
    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the flag is set, up to `timeout`.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<(), EngineError> {
        let mut rx = self.tx.subscribe();
        // The value ref borrows `rx`; drop it before returning.
        let result = tokio::time::timeout(timeout, rx.wait_for(|set| *set)).await;
        match result {
            Ok(Ok(_)) => Ok(()),
            // The sender lives as long as the Flag, so the channel cannot
            // close while we hold &self.
            Ok(Err(_)) | Err(_) => Err(EngineError::Timeout),
        }
    }
}

/// Tracks the handshake state and drives the outgoing vote.
pub(crate) struct LinkPower {
    signal: Arc<dyn PowerVote>,
    /// Remote power line level, toggled by observed edges
    powered: Flag,
    /// Set when the remote acknowledged our last vote
    acked: Flag,
    timeout: Duration,
}

impl LinkPower {
    /// The remote owes no acknowledgement before our first vote, so `acked`
    /// starts set.
    pub fn new(signal: Arc<dyn PowerVote>, timeout: Duration) -> Self {
        LinkPower {
            signal,
            powered: Flag::new(false),
            acked: Flag::new(true),
            timeout,
        }
    }

    /// Cast a vote. Clears `acked` first so a stale acknowledgement cannot
    /// satisfy the wait for this vote.
    pub fn vote(&self, enable: bool) {
        self.acked.clear();
        self.signal.set_request(enable);
    }

    /// Bring the link up: wait out any previous vote, vote for power, wait
    /// for the acknowledgement, then wait for the remote to power on.
    pub async fn resume(&self) -> Result<(), EngineError> {
        debug!("runtime resume");
        self.acked.wait_timeout(self.timeout).await?;

        self.vote(true);
        if let Err(e) = self.acked.wait_timeout(self.timeout).await {
            self.vote(false);
            return Err(e);
        }
        if let Err(e) = self.powered.wait_timeout(self.timeout).await {
            self.vote(false);
            return Err(e);
        }
        Ok(())
    }

    /// Retract the power vote.
    pub fn suspend(&self) {
        debug!("runtime suspend");
        self.vote(false);
    }

    /// Confirm an observed remote power edge back to the remote.
    pub fn ack_remote(&self) {
        self.signal.toggle_ack();
    }

    pub fn mark_powered(&self) {
        self.powered.set();
    }

    pub fn reset_powered(&self) {
        self.powered.clear();
    }

    pub fn mark_acked(&self) {
        self.acked.set();
    }

    pub fn is_powered(&self) -> bool {
        self.powered.is_set()
    }
}
