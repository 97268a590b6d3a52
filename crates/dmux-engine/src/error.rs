//! Engine error types

use dmux_protocol::{ChannelId, FrameError};
use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by the multiplexer engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// The transmit ring has no free slot; retry after a completion
    #[error("transfer ring full, try again")]
    Busy,

    /// The remote side did not answer the power handshake in time
    #[error("power handshake timed out")]
    Timeout,

    /// Local side has not opened the channel for transmit
    #[error("channel {0} is not active")]
    ChannelInactive(ChannelId),

    /// A channel handle could not be created on remote OPEN
    #[error("channel setup failed: {0}")]
    ChannelSetup(String),

    /// The underlying transport rejected an operation
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame could not be encoded or decoded
    #[error(transparent)]
    Frame(#[from] FrameError),
}
