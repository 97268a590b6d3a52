//! Channel table and packet delivery
//!
//! Each logical channel tracks two independent sides: `remote_open`, driven
//! by OPEN/CLOSE frames from the remote, and `tx_active`, driven by the local
//! [`open_channel`](crate::Dmux::open_channel) /
//! [`close_channel`](crate::Dmux::close_channel) calls. Inbound data is only
//! delivered while both a sink is attached and the local side is active.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dmux_protocol::{ChannelId, PayloadKind, NUM_CHANNELS};

use crate::error::EngineError;

/// One inbound packet, ready for a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Channel the packet arrived on
    pub channel: ChannelId,
    /// Downstream framing detected from the payload
    pub kind: PayloadKind,
    /// Payload bytes with framing stripped
    pub payload: Vec<u8>,
}

/// Consumer-side handle for one channel's inbound packets.
pub trait PacketSink: Send + Sync {
    /// Deliver one packet. Called from the engine's completion task; must
    /// not block.
    fn deliver(&self, packet: Packet);
}

/// Creates a [`PacketSink`] when the remote opens a channel that has none.
///
/// Called from a dedicated task, so creation is allowed to block.
pub trait ChannelFactory: Send + Sync {
    fn create(&self, channel: ChannelId) -> Result<Arc<dyn PacketSink>, EngineError>;
}

pub(crate) struct ChannelState {
    remote_open: AtomicBool,
    tx_active: AtomicBool,
    sink: Mutex<Option<Arc<dyn PacketSink>>>,
}

impl ChannelState {
    fn new() -> Self {
        ChannelState {
            remote_open: AtomicBool::new(false),
            tx_active: AtomicBool::new(false),
            sink: Mutex::new(None),
        }
    }

    pub fn is_remote_open(&self) -> bool {
        self.remote_open.load(Ordering::Acquire)
    }

    pub fn set_remote_open(&self, open: bool) {
        self.remote_open.store(open, Ordering::Release);
    }

    pub fn is_tx_active(&self) -> bool {
        self.tx_active.load(Ordering::Acquire)
    }

    pub fn set_tx_active(&self, active: bool) {
        self.tx_active.store(active, Ordering::Release);
    }

    pub fn sink(&self) -> Option<Arc<dyn PacketSink>> {
        self.sink.lock().unwrap().clone()
    }

    pub fn has_sink(&self) -> bool {
        self.sink.lock().unwrap().is_some()
    }

    pub fn attach(&self, sink: Arc<dyn PacketSink>) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    pub fn detach(&self) -> Option<Arc<dyn PacketSink>> {
        self.sink.lock().unwrap().take()
    }
}

/// Fixed table of all channel states.
pub(crate) struct ChannelTable {
    channels: [ChannelState; NUM_CHANNELS as usize],
}

impl ChannelTable {
    pub fn new() -> Self {
        ChannelTable {
            channels: std::array::from_fn(|_| ChannelState::new()),
        }
    }

    pub fn get(&self, channel: ChannelId) -> &ChannelState {
        &self.channels[channel.as_u8() as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSink;
    impl PacketSink for NullSink {
        fn deliver(&self, _packet: Packet) {}
    }

    #[test]
    fn fresh_channels_are_closed_and_inactive() {
        let table = ChannelTable::new();
        for channel in ChannelId::all() {
            let state = table.get(channel);
            assert!(!state.is_remote_open());
            assert!(!state.is_tx_active());
            assert!(!state.has_sink());
        }
    }

    #[test]
    fn channel_states_are_independent() {
        let table = ChannelTable::new();
        table.get(ChannelId(2)).set_remote_open(true);
        table.get(ChannelId(2)).attach(Arc::new(NullSink));

        assert!(table.get(ChannelId(2)).is_remote_open());
        assert!(!table.get(ChannelId(3)).is_remote_open());
        assert!(!table.get(ChannelId(3)).has_sink());
    }

    #[test]
    fn detach_removes_the_sink() {
        let table = ChannelTable::new();
        let state = table.get(ChannelId(0));
        state.attach(Arc::new(NullSink));
        assert!(state.detach().is_some());
        assert!(!state.has_sink());
        assert!(state.detach().is_none());
    }
}
