//! DMUX Wire Protocol Library
//!
//! This crate provides encoding and decoding for the frame format used by the
//! shared-memory channel multiplexer. Every logical packet travels inside a
//! fixed-header frame:
//!
//! ```text
//! offset 0: u16 magic      (0x33fc, validates framing)
//! offset 2: u8  signal     (reserved, 0 on send)
//! offset 3: u8  command    (0 = DATA, 1 = OPEN, 2 = CLOSE)
//! offset 4: u8  pad        (trailing zero-byte count, 0..3)
//! offset 5: u8  channel    (0..NUM_CHANNELS)
//! offset 6: u16 length     (payload bytes, excludes header and padding)
//! offset 8: payload, then pad zero bytes
//! ```
//!
//! Framed length is always a multiple of four. All multi-byte fields are
//! little-endian.
//!
//! # Example
//!
//! ```rust
//! use dmux_protocol::{decode, encode, ChannelId, Command};
//!
//! let wire = encode(ChannelId(0), Command::Data, b"abc").unwrap();
//! assert_eq!(wire.len() % 4, 0);
//!
//! let frame = decode(&wire).unwrap();
//! assert_eq!(frame.header.command, Command::Data);
//! assert_eq!(frame.payload, b"abc");
//! ```

pub mod classify;
pub mod error;
pub mod frame;

pub use classify::{classify, PayloadKind};
pub use error::FrameError;
pub use frame::{decode, encode, Frame, FrameHeader};

use std::fmt;

/// Magic marker at the start of every frame header.
pub const MAGIC: u16 = 0x33fc;

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Size of one transfer buffer; every frame fits in one buffer.
pub const BUFFER_SIZE: usize = 2048;

/// Largest payload that fits in a buffer alongside the header.
pub const MAX_PAYLOAD: usize = BUFFER_SIZE - HEADER_LEN;

/// Number of logical channels: eight data channels plus one auxiliary
/// data channel.
pub const NUM_CHANNELS: u8 = 9;

/// Frame-level command carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Command {
    /// Payload-bearing frame for an open channel
    Data,
    /// Remote announces a channel is available
    Open,
    /// Remote withdraws a channel
    Close,
}

impl Command {
    /// Parse the wire command byte.
    pub fn from_wire(raw: u8) -> Result<Self, FrameError> {
        match raw {
            0 => Ok(Command::Data),
            1 => Ok(Command::Open),
            2 => Ok(Command::Close),
            other => Err(FrameError::UnknownCommand(other)),
        }
    }

    /// Wire encoding of this command.
    pub fn to_wire(self) -> u8 {
        match self {
            Command::Data => 0,
            Command::Open => 1,
            Command::Close => 2,
        }
    }
}

/// Identifier of one logical multiplexed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelId(pub u8);

impl ChannelId {
    /// Parse and validate the wire channel byte.
    pub fn from_wire(raw: u8) -> Result<Self, FrameError> {
        if raw >= NUM_CHANNELS {
            return Err(FrameError::UnknownChannel(raw));
        }
        Ok(ChannelId(raw))
    }

    /// Get the raw channel index.
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Iterate over every valid channel id.
    pub fn all() -> impl Iterator<Item = ChannelId> {
        (0..NUM_CHANNELS).map(ChannelId)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_wire_round_trip() {
        for cmd in [Command::Data, Command::Open, Command::Close] {
            assert_eq!(Command::from_wire(cmd.to_wire()).unwrap(), cmd);
        }
    }

    #[test]
    fn unknown_command_rejected() {
        assert!(matches!(
            Command::from_wire(3),
            Err(FrameError::UnknownCommand(3))
        ));
    }

    #[test]
    fn channel_range_enforced() {
        assert!(ChannelId::from_wire(NUM_CHANNELS - 1).is_ok());
        assert!(matches!(
            ChannelId::from_wire(NUM_CHANNELS),
            Err(FrameError::UnknownChannel(_))
        ));
    }

    #[test]
    fn all_channels_iterates_table() {
        assert_eq!(ChannelId::all().count(), NUM_CHANNELS as usize);
    }
}
