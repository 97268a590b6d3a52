//! The multiplexer engine
//!
//! [`Dmux`] owns both transfer rings, the channel table, and the link power
//! state, and spawns four background tasks:
//!
//! - the completion loop, draining transport completions for both directions
//! - the transmit wakeup task, resuming the link and flushing frames that
//!   were queued while it was down
//! - the registration task, creating channel handles for remote OPENs off
//!   the completion path
//! - the autosuspend task, retracting the power vote after an idle period
//!
//! Send paths are synchronous and lock-light: a send claims a ring slot
//! under the transmit lock and either submits immediately or parks the frame
//! for the wakeup task. Every queued frame holds one activity reference;
//! the link is only allowed to idle off once all references drop.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, error, info, warn};

use dmux_protocol::{frame, ChannelId, Command, Frame, BUFFER_SIZE};

use crate::channel::{ChannelFactory, ChannelTable, Packet};
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::power::{LinkPower, PowerVote};
use crate::ring::{ClaimOutcome, RxSlot, TxRing, NUM_SLOTS};
use crate::transport::{
    Completion, CompletionSender, Direction, TransferChannel, Transport,
};

/// Tunable engine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Budget for each step of the power handshake, in milliseconds
    pub wakeup_timeout_ms: u64,
    /// Idle time before the power vote is retracted, in milliseconds
    pub autosuspend_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            wakeup_timeout_ms: 2000,
            autosuspend_delay_ms: 1000,
        }
    }
}

struct TxState {
    chan: Option<Box<dyn TransferChannel>>,
    ring: TxRing,
}

struct RxState {
    chan: Option<Box<dyn TransferChannel>>,
    slots: [RxSlot; NUM_SLOTS],
}

/// The channel multiplexer engine.
pub struct Dmux {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    power: LinkPower,
    channels: ChannelTable,
    factory: Arc<dyn ChannelFactory>,

    tx: Mutex<TxState>,
    rx: Mutex<RxState>,
    /// Bitmap of claimed-and-mapped slots waiting for the link to come up
    tx_deferred: AtomicU32,
    /// False while the transmit path refuses new frames
    tx_ready: watch::Sender<bool>,

    /// Observed level of the remote power line, toggled per edge
    remote_powered: AtomicBool,
    /// Local runtime state: link resumed and transmit channel held
    link_active: AtomicBool,
    /// Serializes resume against autosuspend
    resume_lock: tokio::sync::Mutex<()>,

    /// Outstanding activity references; the link may idle off at zero
    active_refs: AtomicUsize,
    idle: Notify,
    wakeup: Notify,
    register: Notify,

    completions: CompletionSender,
    events: mpsc::UnboundedSender<EngineEvent>,
    shutdown: watch::Sender<bool>,
}

impl Dmux {
    /// Build the engine and spawn its background tasks.
    ///
    /// `signal` drives the outgoing half of the power handshake; the caller
    /// feeds observed remote edges back in through
    /// [`remote_power_edge`](Dmux::remote_power_edge) and
    /// [`remote_ack_edge`](Dmux::remote_ack_edge). `factory` is consulted
    /// whenever the remote opens a channel that has no sink yet.
    pub fn spawn(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        signal: Arc<dyn PowerVote>,
        factory: Arc<dyn ChannelFactory>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Arc<Dmux> {
        let (completions, completion_rx) = mpsc::unbounded_channel();
        let (tx_ready, _) = watch::channel(true);
        let (shutdown, _) = watch::channel(false);
        let timeout = Duration::from_millis(config.wakeup_timeout_ms);

        let dmux = Arc::new(Dmux {
            config,
            transport,
            power: LinkPower::new(signal, timeout),
            channels: ChannelTable::new(),
            factory,
            tx: Mutex::new(TxState {
                chan: None,
                ring: TxRing::new(),
            }),
            rx: Mutex::new(RxState {
                chan: None,
                slots: Default::default(),
            }),
            tx_deferred: AtomicU32::new(0),
            tx_ready,
            remote_powered: AtomicBool::new(false),
            link_active: AtomicBool::new(false),
            resume_lock: tokio::sync::Mutex::new(()),
            active_refs: AtomicUsize::new(0),
            idle: Notify::new(),
            wakeup: Notify::new(),
            register: Notify::new(),
            completions,
            events,
            shutdown,
        });

        tokio::spawn(run_completion_loop(dmux.clone(), completion_rx));
        tokio::spawn(run_tx_wakeup(dmux.clone()));
        tokio::spawn(run_registration(dmux.clone()));
        tokio::spawn(run_autosuspend(dmux.clone()));
        dmux
    }

    /// Stop the background tasks. In-flight transfers are not cancelled.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Observe the transmit-ready state. `false` means the ring is at
    /// capacity and sends will return [`EngineError::Busy`].
    pub fn writable(&self) -> watch::Receiver<bool> {
        self.tx_ready.subscribe()
    }

    /// Whether the link is currently resumed.
    pub fn is_link_active(&self) -> bool {
        self.link_active.load(Ordering::Acquire)
    }

    /// Whether the remote currently reports the link powered.
    pub fn is_remote_powered(&self) -> bool {
        self.power.is_powered()
    }

    /// Whether the remote has announced this channel.
    pub fn is_channel_open(&self, channel: ChannelId) -> bool {
        self.channels.get(channel).is_remote_open()
    }

    /// Whether a sink is attached for inbound data on this channel.
    pub fn is_channel_registered(&self, channel: ChannelId) -> bool {
        self.channels.get(channel).has_sink()
    }

    // ---- local channel lifecycle ----

    /// Announce a channel to the remote and enable transmit on it.
    pub async fn open_channel(&self, channel: ChannelId) -> Result<(), EngineError> {
        self.send_cmd(channel, Command::Open).await?;
        self.channels.get(channel).set_tx_active(true);
        info!("channel {} opened for transmit", channel);
        Ok(())
    }

    /// Disable transmit on a channel and tell the remote. The withdrawal is
    /// best-effort; local transmit stops regardless.
    pub async fn close_channel(&self, channel: ChannelId) {
        self.channels.get(channel).set_tx_active(false);
        if let Err(e) = self.send_cmd(channel, Command::Close).await {
            warn!("failed to send CLOSE for channel {}: {}", channel, e);
        }
    }

    // ---- transmit ----

    /// Queue one payload for transmit on an open channel.
    ///
    /// Never blocks. If the link is suspended the frame is parked and the
    /// wakeup task resumes the link and flushes it. A full ring returns
    /// [`EngineError::Busy`]; watch [`writable`](Dmux::writable) for the
    /// retry signal.
    pub fn send_data(&self, channel: ChannelId, payload: &[u8]) -> Result<(), EngineError> {
        if !self.channels.get(channel).is_tx_active() {
            return Err(EngineError::ChannelInactive(channel));
        }
        let buf = frame::encode(channel, Command::Data, payload)?;

        // The frame holds one activity reference until its completion.
        self.activity_get();
        let active = self.link_active.load(Ordering::Acquire);
        if !active {
            self.wakeup.notify_one();
        }

        let mut tx = self.tx.lock().unwrap();
        let slot = match tx.ring.claim(buf) {
            ClaimOutcome::Claimed { slot, next_busy } => {
                if next_busy {
                    self.stop_queues();
                }
                slot
            }
            ClaimOutcome::Busy(_) => {
                drop(tx);
                self.stop_queues();
                self.activity_put();
                return Err(EngineError::Busy);
            }
        };
        debug!("TX({}): {} byte payload on channel {}", slot, payload.len(), channel);

        if let Err(e) = self.transport.map(Direction::Tx, slot, tx.ring.buf(slot)) {
            tx.ring.release(slot);
            drop(tx);
            self.activity_put();
            return Err(e.into());
        }
        tx.ring.set_mapped(slot, true);

        if !active {
            drop(tx);
            self.defer_slot(slot);
            return Ok(());
        }

        self.submit_tx_locked(&mut tx, slot)?;
        if let Some(chan) = tx.chan.as_mut() {
            chan.issue_pending();
        }
        Ok(())
    }

    /// Send a zero-payload control frame, resuming the link first.
    async fn send_cmd(&self, channel: ChannelId, command: Command) -> Result<(), EngineError> {
        let buf = frame::encode(channel, command, &[])?;

        self.activity_get();
        if let Err(e) = self.wake().await {
            self.activity_put();
            return Err(e);
        }

        let mut tx = self.tx.lock().unwrap();
        let slot = match tx.ring.claim(buf) {
            ClaimOutcome::Claimed { slot, next_busy } => {
                if next_busy {
                    self.stop_queues();
                }
                slot
            }
            ClaimOutcome::Busy(_) => {
                drop(tx);
                self.stop_queues();
                self.activity_put();
                return Err(EngineError::Busy);
            }
        };
        debug!("TX({}): {:?} on channel {}", slot, command, channel);

        if let Err(e) = self.transport.map(Direction::Tx, slot, tx.ring.buf(slot)) {
            tx.ring.release(slot);
            drop(tx);
            self.activity_put();
            return Err(e.into());
        }
        tx.ring.set_mapped(slot, true);

        self.submit_tx_locked(&mut tx, slot)?;
        if let Some(chan) = tx.chan.as_mut() {
            chan.issue_pending();
        }
        Ok(())
    }

    /// Hand a claimed, mapped slot to the transport. On submit failure the
    /// slot is unwound and the activity reference dropped. If the transmit
    /// channel vanished underneath us the slot is parked instead.
    fn submit_tx_locked(&self, tx: &mut TxState, slot: usize) -> Result<(), EngineError> {
        let TxState { chan, ring } = tx;
        let Some(chan) = chan.as_mut() else {
            self.defer_slot(slot);
            return Ok(());
        };
        let Some(buf) = ring.take_buf(slot) else {
            return Ok(());
        };
        if let Err(e) = chan.submit(slot, buf) {
            self.transport.unmap(Direction::Tx, slot);
            ring.release(slot);
            self.activity_put();
            return Err(e.into());
        }
        Ok(())
    }

    /// Park a slot for the wakeup task. The first parked slot kicks the
    /// task.
    fn defer_slot(&self, slot: usize) {
        debug!("deferring TX({}) until the link is up", slot);
        if self.tx_deferred.fetch_or(1 << slot, Ordering::SeqCst) == 0 {
            self.wakeup.notify_one();
        }
    }

    fn tx_complete(&self, slot: usize) {
        let mut tx = self.tx.lock().unwrap();
        if !tx.ring.in_flight(slot) {
            // Already swept by a forced power-down.
            debug!("stale TX completion for slot {}", slot);
            return;
        }
        self.transport.unmap(Direction::Tx, slot);
        tx.ring.release(slot);
        // Were we the slot blocking the queue?
        let unblocks = tx.ring.is_next(slot);
        drop(tx);
        if unblocks {
            self.wake_queues();
        }
        self.activity_put();
    }

    /// Flush slots parked while the link was down. Runs on the wakeup task
    /// after a successful resume.
    fn flush_deferred(&self) {
        let mut tx = self.tx.lock().unwrap();
        let pending = self.tx_deferred.swap(0, Ordering::SeqCst);
        if pending == 0 {
            return;
        }
        debug!("pending TX slots after wakeup: {:#010x}", pending);

        let TxState { chan, ring } = &mut *tx;
        let Some(chan) = chan.as_mut() else {
            // The link dropped again; the power-off sweep owns cleanup.
            return;
        };
        for slot in 0..NUM_SLOTS {
            if pending & (1 << slot) == 0 {
                continue;
            }
            let Some(buf) = ring.take_buf(slot) else {
                continue;
            };
            if let Err(e) = chan.submit(slot, buf) {
                warn!("failed to submit deferred slot {}: {}", slot, e);
                self.transport.unmap(Direction::Tx, slot);
                ring.release(slot);
                self.activity_put();
                self.emit(EngineEvent::Error {
                    source: "tx",
                    message: format!("dropped deferred frame in slot {slot}: {e}"),
                });
            }
        }
        chan.issue_pending();
    }

    /// Drop every parked slot after a failed resume, releasing their
    /// references so producers and autosuspend are not wedged forever.
    fn fail_deferred(&self, err: &EngineError) {
        let mut tx = self.tx.lock().unwrap();
        let pending = self.tx_deferred.swap(0, Ordering::SeqCst);
        if pending == 0 {
            return;
        }
        let mut dropped = 0;
        for slot in 0..NUM_SLOTS {
            if pending & (1 << slot) == 0 {
                continue;
            }
            if tx.ring.take_buf(slot).is_none() {
                continue;
            }
            self.transport.unmap(Direction::Tx, slot);
            tx.ring.release(slot);
            self.activity_put();
            dropped += 1;
        }
        drop(tx);
        if dropped > 0 {
            self.emit(EngineEvent::Error {
                source: "tx",
                message: format!("dropped {dropped} pending frames: {err}"),
            });
            self.wake_queues();
        }
    }

    // ---- receive ----

    fn rx_complete(&self, slot: usize, buf: Vec<u8>) {
        {
            let mut rx = self.rx.lock().unwrap();
            if !rx.slots[slot].in_flight {
                debug!("stale RX completion for slot {}", slot);
                return;
            }
            rx.slots[slot].in_flight = false;
        }

        match frame::decode(&buf) {
            Ok(frame) => {
                debug!(
                    "RX({}): {:?} on channel {}, {} bytes",
                    slot, frame.header.command, frame.header.channel, frame.header.len
                );
                let is_data = frame.header.command == Command::Data;
                match frame.header.command {
                    Command::Data => self.dispatch_data(frame),
                    Command::Open => self.handle_open(frame.header.channel),
                    Command::Close => self.handle_close(frame.header.channel),
                }
                if is_data {
                    // The payload went downstream; arm a fresh buffer.
                    self.rx_rearm_fresh(slot);
                } else {
                    self.rx_resubmit(slot, buf);
                }
            }
            Err(e) => {
                error!("dropping bad frame: {}", e);
                self.emit(EngineEvent::FrameDropped {
                    reason: e.to_string(),
                });
                self.rx_resubmit(slot, buf);
            }
        }
    }

    fn dispatch_data(&self, frame: Frame) {
        let channel = frame.header.channel;
        let state = self.channels.get(channel);
        let sink = state.sink();
        if sink.is_none() || !state.is_tx_active() {
            warn!("data frame for inactive channel {}", channel);
            self.emit(EngineEvent::FrameDropped {
                reason: format!("inactive channel {channel}"),
            });
            return;
        }
        let kind = dmux_protocol::classify(&frame.payload);
        sink.unwrap().deliver(Packet {
            channel,
            kind,
            payload: frame.payload,
        });
    }

    fn handle_open(&self, channel: ChannelId) {
        debug!("remote opened channel {}", channel);
        let state = self.channels.get(channel);
        if state.is_remote_open() {
            error!("channel already open: {}", channel);
            return;
        }
        state.set_remote_open(true);
        if !state.has_sink() {
            // Handle creation may block; leave it to the registration task.
            self.register.notify_one();
        }
        self.emit(EngineEvent::ChannelOpened { channel });
    }

    fn handle_close(&self, channel: ChannelId) {
        debug!("remote closed channel {}", channel);
        let state = self.channels.get(channel);
        if !state.is_remote_open() {
            error!("channel not open: {}", channel);
            return;
        }
        state.set_remote_open(false);
        if state.detach().is_some() {
            debug!("detached handle for channel {}", channel);
        }
        self.emit(EngineEvent::ChannelClosed { channel });
    }

    /// Arm a receive slot with a fresh buffer.
    fn rx_rearm_fresh(&self, slot: usize) {
        let mut rx = self.rx.lock().unwrap();
        if rx.slots[slot].mapped {
            self.transport.unmap(Direction::Rx, slot);
            rx.slots[slot].mapped = false;
        }
        let buf = vec![0u8; BUFFER_SIZE];
        if let Err(e) = self.transport.map(Direction::Rx, slot, &buf) {
            warn!("failed to re-arm RX slot {}: {}", slot, e);
            return;
        }
        rx.slots[slot].mapped = true;
        let RxState { chan, slots } = &mut *rx;
        let Some(chan) = chan.as_mut() else {
            slots[slot].mapped = false;
            return;
        };
        if let Err(e) = chan.submit(slot, buf) {
            warn!("failed to re-arm RX slot {}: {}", slot, e);
            self.transport.unmap(Direction::Rx, slot);
            slots[slot].mapped = false;
            return;
        }
        slots[slot].in_flight = true;
        chan.issue_pending();
    }

    /// Give a still-mapped buffer straight back to the transport.
    fn rx_resubmit(&self, slot: usize, buf: Vec<u8>) {
        let mut rx = self.rx.lock().unwrap();
        let RxState { chan, slots } = &mut *rx;
        let Some(chan) = chan.as_mut() else {
            return;
        };
        if let Err(e) = chan.submit(slot, buf) {
            warn!("failed to re-arm RX slot {}: {}", slot, e);
            self.transport.unmap(Direction::Rx, slot);
            slots[slot].mapped = false;
            return;
        }
        slots[slot].in_flight = true;
        chan.issue_pending();
    }

    // ---- power ----

    /// Feed one observed edge of the remote power line into the engine.
    ///
    /// An edge toggles the tracked level. A rising level arms receive,
    /// acknowledges the remote, and completes any waiting resume; a falling
    /// level tears everything down first and acknowledges after.
    pub fn remote_power_edge(&self) {
        let up = !self.remote_powered.fetch_xor(true, Ordering::SeqCst);
        debug!("remote power: {}", up as u8);
        if up {
            if self.power_on() {
                self.power.ack_remote();
                self.power.mark_powered();
                self.emit(EngineEvent::LinkUp);
            } else {
                self.power_off();
            }
        } else {
            self.power.reset_powered();
            if self.link_active.swap(false, Ordering::SeqCst) {
                warn!("remote power-down while link active");
            }
            self.power_off();
            self.power.ack_remote();
            self.emit(EngineEvent::LinkDown);
        }
    }

    /// Feed one observed edge of the remote acknowledge line.
    pub fn remote_ack_edge(&self) {
        debug!("remote acked power vote");
        self.power.mark_acked();
    }

    /// Resume the link, acquiring the transmit channel on first use.
    /// Serialized against autosuspend.
    async fn wake(&self) -> Result<(), EngineError> {
        let _guard = self.resume_lock.lock().await;
        if self.link_active.load(Ordering::Acquire) {
            return Ok(());
        }
        self.power.resume().await?;
        {
            let mut tx = self.tx.lock().unwrap();
            if tx.chan.is_none() {
                match self.transport.acquire(Direction::Tx, self.completions.clone()) {
                    Ok(chan) => tx.chan = Some(chan),
                    Err(e) => {
                        drop(tx);
                        self.power.suspend();
                        return Err(e.into());
                    }
                }
            }
        }
        self.link_active.store(true, Ordering::Release);
        Ok(())
    }

    /// Arm the receive side: acquire the channel and queue every slot.
    fn power_on(&self) -> bool {
        let mut rx = self.rx.lock().unwrap();
        match self.transport.acquire(Direction::Rx, self.completions.clone()) {
            Ok(chan) => rx.chan = Some(chan),
            Err(e) => {
                error!("failed to acquire RX transfer channel: {}", e);
                return false;
            }
        }
        for slot in 0..NUM_SLOTS {
            if !self.rx_arm_locked(&mut rx, slot) {
                return false;
            }
        }
        if let Some(chan) = rx.chan.as_mut() {
            chan.issue_pending();
        }
        true
    }

    fn rx_arm_locked(&self, rx: &mut RxState, slot: usize) -> bool {
        let buf = vec![0u8; BUFFER_SIZE];
        if let Err(e) = self.transport.map(Direction::Rx, slot, &buf) {
            error!("failed to map RX slot {}: {}", slot, e);
            return false;
        }
        rx.slots[slot].mapped = true;
        let RxState { chan, slots } = rx;
        let Some(chan) = chan.as_mut() else {
            return false;
        };
        if let Err(e) = chan.submit(slot, buf) {
            error!("failed to queue RX slot {}: {}", slot, e);
            self.transport.unmap(Direction::Rx, slot);
            slots[slot].mapped = false;
            return false;
        }
        slots[slot].in_flight = true;
        true
    }

    /// Tear down both directions and forcibly release every busy transmit
    /// slot. No completions arrive for cancelled work, so their activity
    /// references are dropped here.
    fn power_off(&self) {
        let released = {
            let mut tx = self.tx.lock().unwrap();
            if let Some(mut chan) = tx.chan.take() {
                chan.terminate();
            }
            self.tx_deferred.store(0, Ordering::SeqCst);
            tx.ring.sweep(|slot| self.transport.unmap(Direction::Tx, slot))
        };
        for _ in 0..released {
            self.activity_put();
        }
        if released > 0 {
            info!("cancelled {} queued transmits on power-down", released);
            self.emit(EngineEvent::Error {
                source: "power",
                message: format!("cancelled {released} queued transmits"),
            });
        }

        {
            let mut rx = self.rx.lock().unwrap();
            if let Some(mut chan) = rx.chan.take() {
                chan.terminate();
            }
            for slot in 0..NUM_SLOTS {
                if rx.slots[slot].mapped {
                    self.transport.unmap(Direction::Rx, slot);
                }
                rx.slots[slot] = RxSlot::default();
            }
        }
        self.wake_queues();
    }

    // ---- internals ----

    fn activity_get(&self) {
        self.active_refs.fetch_add(1, Ordering::SeqCst);
    }

    fn activity_put(&self) {
        if self.active_refs.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_one();
        }
    }

    fn stop_queues(&self) {
        let changed = self.tx_ready.send_if_modified(|ready| {
            let was = *ready;
            *ready = false;
            was
        });
        if changed {
            debug!("transmit throttled");
            self.emit(EngineEvent::Backpressure { stopped: true });
        }
    }

    fn wake_queues(&self) {
        let changed = self.tx_ready.send_if_modified(|ready| {
            let was = *ready;
            *ready = true;
            !was
        });
        if changed {
            debug!("transmit resumed");
            self.emit(EngineEvent::Backpressure { stopped: false });
        }
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}

async fn run_completion_loop(dmux: Arc<Dmux>, mut completions: mpsc::UnboundedReceiver<Completion>) {
    let mut shutdown = dmux.shutdown.subscribe();
    loop {
        tokio::select! {
            completion = completions.recv() => {
                let Some(Completion { direction, slot, buf }) = completion else {
                    return;
                };
                match direction {
                    Direction::Tx => dmux.tx_complete(slot),
                    Direction::Rx => dmux.rx_complete(slot, buf),
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}

async fn run_tx_wakeup(dmux: Arc<Dmux>) {
    let mut shutdown = dmux.shutdown.subscribe();
    loop {
        tokio::select! {
            _ = dmux.wakeup.notified() => {}
            _ = shutdown.changed() => return,
        }
        dmux.activity_get();
        match dmux.wake().await {
            Ok(()) => dmux.flush_deferred(),
            Err(e) => {
                error!("failed to resume link for transmit: {}", e);
                dmux.fail_deferred(&e);
            }
        }
        dmux.activity_put();
    }
}

async fn run_registration(dmux: Arc<Dmux>) {
    let mut shutdown = dmux.shutdown.subscribe();
    loop {
        tokio::select! {
            _ = dmux.register.notified() => {}
            _ = shutdown.changed() => return,
        }
        for channel in ChannelId::all() {
            let state = dmux.channels.get(channel);
            if !state.is_remote_open() || state.has_sink() {
                continue;
            }
            match dmux.factory.create(channel) {
                Ok(sink) => {
                    state.attach(sink);
                    debug!("registered handle for channel {}", channel);
                }
                Err(e) => {
                    // Retried on the next OPEN.
                    error!("failed to create handle for channel {}: {}", channel, e);
                    break;
                }
            }
        }
    }
}

async fn run_autosuspend(dmux: Arc<Dmux>) {
    let mut shutdown = dmux.shutdown.subscribe();
    let delay = Duration::from_millis(dmux.config.autosuspend_delay_ms);
    loop {
        tokio::select! {
            _ = dmux.idle.notified() => {}
            _ = shutdown.changed() => return,
        }
        tokio::time::sleep(delay).await;
        if dmux.active_refs.load(Ordering::SeqCst) != 0 {
            continue;
        }
        let _guard = dmux.resume_lock.lock().await;
        if dmux.active_refs.load(Ordering::SeqCst) == 0
            && dmux.link_active.load(Ordering::Acquire)
        {
            dmux.link_active.store(false, Ordering::Release);
            dmux.power.suspend();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_protocol_timing() {
        let config = EngineConfig::default();
        assert_eq!(config.wakeup_timeout_ms, 2000);
        assert_eq!(config.autosuspend_delay_ms, 1000);
    }

    #[test]
    fn config_fills_missing_fields_from_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "autosuspend_delay_ms": 50 }"#).unwrap();
        assert_eq!(config.autosuspend_delay_ms, 50);
        assert_eq!(config.wakeup_timeout_ms, 2000);
    }
}
