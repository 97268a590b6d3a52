//! DMUX Channel Multiplexer Engine
//!
//! Multiplexes up to nine logical packet channels over one shared-memory
//! transport with a single transmit/receive ring pair. The engine handles
//! frame encode/decode (via `dmux-protocol`), transfer-ring slot
//! accounting with producer throttling, the remote power handshake with
//! idle autosuspend, and channel lifecycle driven by OPEN/CLOSE frames.
//!
//! The transport is abstracted behind [`Transport`] and [`TransferChannel`];
//! the outgoing power line behind [`PowerVote`]. Consumers receive packets
//! through [`PacketSink`]s created by a [`ChannelFactory`], and observe
//! engine state through [`EngineEvent`]s.

pub mod channel;
pub mod engine;
pub mod error;
pub mod events;
pub mod power;
pub mod ring;
pub mod transport;

pub use channel::{ChannelFactory, Packet, PacketSink};
pub use engine::{Dmux, EngineConfig};
pub use error::EngineError;
pub use events::EngineEvent;
pub use power::PowerVote;
pub use ring::NUM_SLOTS;
pub use transport::{
    Completion, CompletionSender, Direction, TransferChannel, Transport, TransportError,
};

pub use dmux_protocol::{ChannelId, Command, PayloadKind, BUFFER_SIZE, NUM_CHANNELS};
