//! Simulated transport and remote peer
//!
//! [`SimNet`] stands in for the shared-memory transport and the remote
//! processor at the same time: it implements [`Transport`] and [`PowerVote`]
//! for the engine side, and exposes a peer API for tests and demos to power
//! the link, announce channels, and inject frames. Remote line edges are
//! reported on an edge channel; [`drive`] forwards them into the engine the
//! way an interrupt handler would.
//!
//! By default the simulated remote is cooperative: it acknowledges every
//! vote and powers the link up and down to follow it. Each of those
//! behaviors can be switched off to exercise timeout and failure paths, and
//! transmit completions can be withheld to fill the ring.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use dmux_engine::{
    ChannelFactory, ChannelId, Command, Completion, CompletionSender, Direction, Dmux,
    EngineError, Packet, PacketSink, PowerVote, TransferChannel, Transport, TransportError,
};
use dmux_protocol::encode;

/// One observed edge on a remote line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeNotice {
    /// The remote power line toggled
    Power,
    /// The remote acknowledge line toggled
    Ack,
}

#[derive(Default)]
struct SimState {
    // Engine-facing line levels
    request: bool,
    powered: bool,

    // Remote behavior knobs
    manual_ack: bool,
    manual_power: bool,
    power_before_ack: bool,

    // Failure injection
    fail_acquire: Option<Direction>,
    fail_maps: Vec<(Direction, usize)>,

    // Transfer state
    tx_completions: Option<CompletionSender>,
    rx_completions: Option<CompletionSender>,
    tx_pending: Vec<(usize, Vec<u8>)>,
    armed: VecDeque<(usize, Vec<u8>)>,
    mapped: Vec<(Direction, usize)>,

    hold_tx_completions: bool,
    held_tx: VecDeque<(usize, Vec<u8>)>,

    // Record for assertions
    sent: Vec<Vec<u8>>,
}

/// The simulated transport plus remote peer.
pub struct SimNet {
    state: Arc<Mutex<SimState>>,
    edges_tx: mpsc::UnboundedSender<EdgeNotice>,
    edges_rx: Mutex<Option<mpsc::UnboundedReceiver<EdgeNotice>>>,
}

impl SimNet {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Arc<SimNet> {
        let (edges_tx, edges_rx) = mpsc::unbounded_channel();
        Arc::new(SimNet {
            state: Arc::new(Mutex::new(SimState::default())),
            edges_tx,
            edges_rx: Mutex::new(Some(edges_rx)),
        })
    }

    /// Take the edge stream. Panics if taken twice.
    pub fn take_edges(&self) -> mpsc::UnboundedReceiver<EdgeNotice> {
        self.edges_rx
            .lock()
            .unwrap()
            .take()
            .expect("edge stream already taken")
    }

    // ---- remote behavior knobs ----

    /// Stop acknowledging votes; [`pulse_ack`](SimNet::pulse_ack) becomes the
    /// only source of ack edges.
    pub fn set_manual_ack(&self, manual: bool) {
        self.state.lock().unwrap().manual_ack = manual;
    }

    /// Stop following the vote with the power line;
    /// [`pulse_power`](SimNet::pulse_power) becomes the only source of power
    /// edges.
    pub fn set_manual_power(&self, manual: bool) {
        self.state.lock().unwrap().manual_power = manual;
    }

    /// Emit the power edge before the ack edge when answering a vote.
    pub fn set_power_before_ack(&self, first: bool) {
        self.state.lock().unwrap().power_before_ack = first;
    }

    /// Make the next `acquire` for this direction fail.
    pub fn fail_next_acquire(&self, direction: Direction) {
        self.state.lock().unwrap().fail_acquire = Some(direction);
    }

    /// Make the next `count` maps for this direction fail.
    pub fn fail_next_maps(&self, direction: Direction, count: usize) {
        self.state
            .lock()
            .unwrap()
            .fail_maps
            .push((direction, count));
    }

    /// Withhold transmit completions, keeping submitted slots busy.
    pub fn hold_tx_completions(&self, hold: bool) {
        self.state.lock().unwrap().hold_tx_completions = hold;
    }

    /// Deliver the oldest withheld transmit completion.
    pub fn release_one_tx(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some((slot, buf)) = state.held_tx.pop_front() {
            if let Some(completions) = &state.tx_completions {
                let _ = completions.send(Completion {
                    direction: Direction::Tx,
                    slot,
                    buf,
                });
            }
        }
    }

    // ---- manual line control ----

    /// Toggle the remote power line.
    pub fn pulse_power(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.powered = !state.powered;
        }
        let _ = self.edges_tx.send(EdgeNotice::Power);
    }

    /// Toggle the remote acknowledge line.
    pub fn pulse_ack(&self) {
        let _ = self.edges_tx.send(EdgeNotice::Ack);
    }

    // ---- peer traffic ----

    /// Announce a channel from the remote side.
    pub fn inject_open(&self, channel: ChannelId) {
        let wire = encode(channel, Command::Open, &[]).expect("control frame encodes");
        self.inject_frame(&wire);
    }

    /// Withdraw a channel from the remote side.
    pub fn inject_close(&self, channel: ChannelId) {
        let wire = encode(channel, Command::Close, &[]).expect("control frame encodes");
        self.inject_frame(&wire);
    }

    /// Send a data frame from the remote side.
    pub fn inject_data(&self, channel: ChannelId, payload: &[u8]) {
        let wire = encode(channel, Command::Data, payload).expect("payload fits a buffer");
        self.inject_frame(&wire);
    }

    /// Deliver raw bytes into the oldest armed receive slot. Panics if the
    /// receive ring is not armed.
    pub fn inject_frame(&self, wire: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let (slot, mut buf) = state
            .armed
            .pop_front()
            .expect("no armed receive slot; is the link powered?");
        buf[..wire.len()].copy_from_slice(wire);
        trace!("peer: {} bytes into RX slot {}", wire.len(), slot);
        if let Some(completions) = &state.rx_completions {
            let _ = completions.send(Completion {
                direction: Direction::Rx,
                slot,
                buf,
            });
        }
    }

    // ---- assertions ----

    /// Every frame the engine has transmitted, oldest first.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Current level of the engine's power-request line.
    pub fn request_level(&self) -> bool {
        self.state.lock().unwrap().request
    }

    /// Current level of the remote power line.
    pub fn is_powered(&self) -> bool {
        self.state.lock().unwrap().powered
    }

    /// Number of armed receive slots.
    pub fn armed_slots(&self) -> usize {
        self.state.lock().unwrap().armed.len()
    }

    /// Number of slots currently mapped for a direction.
    pub fn mapped_slots(&self, direction: Direction) -> usize {
        self.state
            .lock()
            .unwrap()
            .mapped
            .iter()
            .filter(|(d, _)| *d == direction)
            .count()
    }
}

impl PowerVote for SimNet {
    fn set_request(&self, enable: bool) {
        // Every vote signal is acknowledged, even at an unchanged level;
        // the power line only moves on level changes.
        let (ack, power, power_first) = {
            let mut state = self.state.lock().unwrap();
            state.request = enable;
            debug!("peer: power request {}", enable as u8);
            let power = !state.manual_power && state.powered != enable;
            if power {
                state.powered = enable;
            }
            (!state.manual_ack, power, state.power_before_ack)
        };
        if power_first {
            if power {
                let _ = self.edges_tx.send(EdgeNotice::Power);
            }
            if ack {
                let _ = self.edges_tx.send(EdgeNotice::Ack);
            }
        } else {
            if ack {
                let _ = self.edges_tx.send(EdgeNotice::Ack);
            }
            if power {
                let _ = self.edges_tx.send(EdgeNotice::Power);
            }
        }
    }

    fn toggle_ack(&self) {
        debug!("peer: engine confirmed power edge");
    }
}

impl Transport for SimNet {
    fn acquire(
        &self,
        direction: Direction,
        completions: CompletionSender,
    ) -> Result<Box<dyn TransferChannel>, TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_acquire == Some(direction) {
            state.fail_acquire = None;
            return Err(TransportError::Acquire(direction));
        }
        match direction {
            Direction::Tx => state.tx_completions = Some(completions),
            Direction::Rx => state.rx_completions = Some(completions),
        }
        debug!("peer: {} channel acquired", direction);
        Ok(Box::new(SimChannel {
            direction,
            state: self.state.clone(),
        }))
    }

    fn map(&self, direction: Direction, slot: usize, _buf: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state
            .fail_maps
            .iter_mut()
            .find(|(d, count)| *d == direction && *count > 0)
        {
            entry.1 -= 1;
            return Err(TransportError::Map(slot));
        }
        state.mapped.push((direction, slot));
        Ok(())
    }

    fn unmap(&self, direction: Direction, slot: usize) {
        let mut state = self.state.lock().unwrap();
        if let Some(pos) = state
            .mapped
            .iter()
            .position(|entry| *entry == (direction, slot))
        {
            state.mapped.swap_remove(pos);
        }
    }
}

struct SimChannel {
    direction: Direction,
    state: Arc<Mutex<SimState>>,
}

impl TransferChannel for SimChannel {
    fn submit(&mut self, slot: usize, buf: Vec<u8>) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        match self.direction {
            Direction::Tx => state.tx_pending.push((slot, buf)),
            Direction::Rx => state.armed.push_back((slot, buf)),
        }
        Ok(())
    }

    /// The doorbell "transfers" everything pending: transmit frames are
    /// recorded and completed (or withheld), receive slots just sit armed.
    fn issue_pending(&mut self) {
        if self.direction == Direction::Rx {
            return;
        }
        let mut state = self.state.lock().unwrap();
        let pending = std::mem::take(&mut state.tx_pending);
        for (slot, buf) in pending {
            trace!("peer: TX slot {} transferred, {} bytes", slot, buf.len());
            state.sent.push(buf.clone());
            if state.hold_tx_completions {
                state.held_tx.push_back((slot, buf));
            } else if let Some(completions) = &state.tx_completions {
                let _ = completions.send(Completion {
                    direction: Direction::Tx,
                    slot,
                    buf,
                });
            }
        }
    }

    fn terminate(&mut self) {
        let mut state = self.state.lock().unwrap();
        match self.direction {
            Direction::Tx => {
                state.tx_pending.clear();
                state.held_tx.clear();
                state.tx_completions = None;
            }
            Direction::Rx => {
                state.armed.clear();
                state.rx_completions = None;
            }
        }
        debug!("peer: {} channel terminated", self.direction);
    }
}

/// Forward remote line edges into the engine, the way an interrupt handler
/// would. Runs until the simulator is dropped.
pub fn drive(dmux: &Arc<Dmux>, sim: &Arc<SimNet>) -> JoinHandle<()> {
    let mut edges = sim.take_edges();
    let dmux = dmux.clone();
    tokio::spawn(async move {
        while let Some(edge) = edges.recv().await {
            match edge {
                EdgeNotice::Power => dmux.remote_power_edge(),
                EdgeNotice::Ack => dmux.remote_ack_edge(),
            }
        }
    })
}

/// Shared record of every packet delivered to any channel sink.
#[derive(Default)]
pub struct PacketLog {
    packets: Mutex<Vec<Packet>>,
    notify: Notify,
}

impl PacketLog {
    pub fn new() -> Arc<PacketLog> {
        Arc::new(PacketLog::default())
    }

    /// Snapshot of everything delivered so far.
    pub fn received(&self) -> Vec<Packet> {
        self.packets.lock().unwrap().clone()
    }

    /// Wait until at least `count` packets have been delivered. Callers
    /// wrap this in a timeout.
    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.notify.notified();
            if self.packets.lock().unwrap().len() >= count {
                return;
            }
            notified.await;
        }
    }

    fn push(&self, packet: Packet) {
        self.packets.lock().unwrap().push(packet);
        self.notify.notify_waiters();
    }
}

struct LogSink {
    log: Arc<PacketLog>,
}

impl PacketSink for LogSink {
    fn deliver(&self, packet: Packet) {
        self.log.push(packet);
    }
}

/// Factory handing every channel a sink into one shared [`PacketLog`].
pub struct LogFactory {
    log: Arc<PacketLog>,
    fail: std::sync::atomic::AtomicBool,
}

impl LogFactory {
    pub fn new(log: Arc<PacketLog>) -> Arc<LogFactory> {
        Arc::new(LogFactory {
            log,
            fail: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Make `create` fail until cleared, to exercise deferred registration.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

impl ChannelFactory for LogFactory {
    fn create(&self, channel: ChannelId) -> Result<Arc<dyn PacketSink>, EngineError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(EngineError::ChannelSetup(format!(
                "simulated handle failure for channel {channel}"
            )));
        }
        Ok(Arc::new(LogSink {
            log: self.log.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooperative_remote_follows_the_vote() {
        let sim = SimNet::new();
        let mut edges = sim.take_edges();

        sim.set_request(true);
        assert!(sim.is_powered());
        assert!(matches!(edges.try_recv(), Ok(EdgeNotice::Ack)));
        assert!(matches!(edges.try_recv(), Ok(EdgeNotice::Power)));

        sim.set_request(false);
        assert!(!sim.is_powered());
    }

    #[test]
    fn repeated_vote_is_acked_without_power_edge() {
        let sim = SimNet::new();
        let mut edges = sim.take_edges();

        sim.set_request(true);
        while edges.try_recv().is_ok() {}
        sim.set_request(true);
        assert!(matches!(edges.try_recv(), Ok(EdgeNotice::Ack)));
        assert!(edges.try_recv().is_err());
    }

    #[test]
    fn manual_remote_stays_silent() {
        let sim = SimNet::new();
        let mut edges = sim.take_edges();
        sim.set_manual_ack(true);
        sim.set_manual_power(true);

        sim.set_request(true);
        assert!(!sim.is_powered());
        assert!(edges.try_recv().is_err());

        sim.pulse_ack();
        sim.pulse_power();
        assert!(matches!(edges.try_recv(), Ok(EdgeNotice::Ack)));
        assert!(matches!(edges.try_recv(), Ok(EdgeNotice::Power)));
        assert!(sim.is_powered());
    }
}
