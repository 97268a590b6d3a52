//! Transport abstraction
//!
//! The engine drives two unidirectional transfer channels over a shared
//! transport. A transfer is prepared per slot (`map`), queued on the channel
//! (`submit`), and kicked with a doorbell (`issue_pending`); the transport
//! reports finished transfers asynchronously as [`Completion`]s. Submissions
//! queued between doorbells may be coalesced into one kick.

use thiserror::Error;
use tokio::sync::mpsc;

/// Direction of a transfer channel, from the engine's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Engine to remote
    Tx,
    /// Remote to engine
    Rx,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Tx => write!(f, "tx"),
            Direction::Rx => write!(f, "rx"),
        }
    }
}

/// One finished transfer, reported by the transport.
#[derive(Debug)]
pub struct Completion {
    /// Which transfer channel finished the work
    pub direction: Direction,
    /// Ring slot the transfer was submitted under
    pub slot: usize,
    /// The buffer handed over at submit time. For Rx this holds the
    /// received frame.
    pub buf: Vec<u8>,
}

/// Sender half the transport uses to report completions.
pub type CompletionSender = mpsc::UnboundedSender<Completion>;

/// Errors reported by the transport layer
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transfer channel could not be acquired
    #[error("failed to acquire {0} transfer channel")]
    Acquire(Direction),

    /// A buffer could not be prepared for transfer
    #[error("failed to map slot {0} for transfer")]
    Map(usize),

    /// A prepared buffer could not be queued
    #[error("failed to submit slot {0}")]
    Submit(usize),
}

/// The shared transport underneath the multiplexer.
///
/// `map`/`unmap` bracket a buffer's visibility to the remote side and must
/// pair up per slot; `acquire` hands out at most one live channel per
/// direction.
pub trait Transport: Send + Sync {
    /// Acquire the transfer channel for one direction. Completions for
    /// transfers submitted on the returned channel go to `completions`.
    fn acquire(
        &self,
        direction: Direction,
        completions: CompletionSender,
    ) -> Result<Box<dyn TransferChannel>, TransportError>;

    /// Prepare a buffer for transfer in the given slot.
    fn map(&self, direction: Direction, slot: usize, buf: &[u8]) -> Result<(), TransportError>;

    /// Release a previously mapped slot.
    fn unmap(&self, direction: Direction, slot: usize);
}

/// One live unidirectional transfer channel.
pub trait TransferChannel: Send {
    /// Queue a mapped buffer for transfer. Ownership of the buffer passes
    /// to the transport until the matching [`Completion`] arrives.
    fn submit(&mut self, slot: usize, buf: Vec<u8>) -> Result<(), TransportError>;

    /// Ring the doorbell for everything submitted since the last kick.
    fn issue_pending(&mut self);

    /// Abort all outstanding transfers. No completions are delivered for
    /// aborted work.
    fn terminate(&mut self);
}
