//! Error types for frame encoding and decoding

use thiserror::Error;

/// Errors that can occur while framing or unframing a buffer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Header magic did not match
    #[error("invalid magic in header: {0:#x}")]
    BadMagic(u16),

    /// Command byte outside the known set
    #[error("unsupported command: {0}")]
    UnknownCommand(u8),

    /// Channel id outside the channel table
    #[error("unsupported channel: {0}")]
    UnknownChannel(u8),

    /// Buffer shorter than the fixed header
    #[error("truncated frame: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    /// Payload does not fit in one transfer buffer
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
}
