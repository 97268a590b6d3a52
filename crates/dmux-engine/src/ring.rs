//! Transfer ring bookkeeping
//!
//! Both directions use a fixed ring of [`NUM_SLOTS`] slots. Transmit slots
//! are claimed round-robin; a slot stays busy from claim until its completion
//! (or a forced sweep on power loss). The claim also reports whether the
//! *following* slot is still busy, which is the producer-throttle signal:
//! stopping one claim early leaves room to observe the ring filling up
//! instead of discovering it on the next send.

/// Slots per transfer ring, in each direction.
pub const NUM_SLOTS: usize = 32;

/// One transmit slot.
#[derive(Debug, Default)]
pub(crate) struct TxSlot {
    /// Frame waiting to be submitted. Taken when the transfer is handed to
    /// the transport.
    pub buf: Option<Vec<u8>>,
    /// Submitted and awaiting completion
    pub in_flight: bool,
    /// Slot is mapped for transfer
    pub mapped: bool,
}

impl TxSlot {
    pub fn is_busy(&self) -> bool {
        self.buf.is_some() || self.in_flight
    }
}

/// One receive slot. Receive buffers are owned by the transport while armed.
#[derive(Debug, Default)]
pub(crate) struct RxSlot {
    pub in_flight: bool,
    pub mapped: bool,
}

/// Outcome of a transmit-slot claim.
#[derive(Debug)]
pub(crate) enum ClaimOutcome {
    /// A slot was claimed; `next_busy` is the throttle signal.
    Claimed { slot: usize, next_busy: bool },
    /// The ring is full; the frame is handed back.
    Busy(Vec<u8>),
}

/// Round-robin transmit ring.
#[derive(Debug)]
pub(crate) struct TxRing {
    slots: [TxSlot; NUM_SLOTS],
    next: u64,
}

impl TxRing {
    pub fn new() -> Self {
        TxRing {
            slots: Default::default(),
            next: 0,
        }
    }

    fn index(&self) -> usize {
        (self.next % NUM_SLOTS as u64) as usize
    }

    /// Claim the next slot for `buf`.
    pub fn claim(&mut self, buf: Vec<u8>) -> ClaimOutcome {
        let slot = self.index();
        if self.slots[slot].is_busy() {
            return ClaimOutcome::Busy(buf);
        }
        self.slots[slot].buf = Some(buf);
        self.next = self.next.wrapping_add(1);
        ClaimOutcome::Claimed {
            slot,
            next_busy: self.slots[self.index()].is_busy(),
        }
    }

    /// Borrow the frame parked in a claimed slot.
    pub fn buf(&self, slot: usize) -> &[u8] {
        self.slots[slot].buf.as_deref().unwrap_or(&[])
    }

    /// Hand the slot's frame to the transport, marking it in flight.
    pub fn take_buf(&mut self, slot: usize) -> Option<Vec<u8>> {
        let buf = self.slots[slot].buf.take()?;
        self.slots[slot].in_flight = true;
        Some(buf)
    }

    pub fn set_mapped(&mut self, slot: usize, mapped: bool) {
        self.slots[slot].mapped = mapped;
    }

    pub fn in_flight(&self, slot: usize) -> bool {
        self.slots[slot].in_flight
    }

    /// Whether freeing this slot unblocks the next claim.
    pub fn is_next(&self, slot: usize) -> bool {
        slot == self.index()
    }

    /// Free a slot entirely.
    pub fn release(&mut self, slot: usize) {
        self.slots[slot] = TxSlot::default();
    }

    /// Forcibly free every busy slot, calling `unmap` for mapped ones.
    /// Returns how many slots were released.
    pub fn sweep(&mut self, mut unmap: impl FnMut(usize)) -> usize {
        let mut released = 0;
        for slot in 0..NUM_SLOTS {
            if !self.slots[slot].is_busy() {
                continue;
            }
            if self.slots[slot].mapped {
                unmap(slot);
            }
            self.slots[slot] = TxSlot::default();
            released += 1;
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_proceed_round_robin() {
        let mut ring = TxRing::new();
        for expect in 0..NUM_SLOTS {
            match ring.claim(vec![expect as u8]) {
                ClaimOutcome::Claimed { slot, .. } => assert_eq!(slot, expect),
                ClaimOutcome::Busy(_) => panic!("ring full at {expect}"),
            }
        }
    }

    #[test]
    fn full_ring_hands_frame_back() {
        let mut ring = TxRing::new();
        for _ in 0..NUM_SLOTS {
            ring.claim(vec![1]);
        }
        match ring.claim(vec![0xaa]) {
            ClaimOutcome::Busy(buf) => assert_eq!(buf, vec![0xaa]),
            ClaimOutcome::Claimed { .. } => panic!("claimed a busy slot"),
        }
    }

    #[test]
    fn throttle_fires_one_claim_early() {
        let mut ring = TxRing::new();
        for i in 0..NUM_SLOTS - 1 {
            match ring.claim(vec![0]) {
                ClaimOutcome::Claimed { next_busy, .. } => {
                    assert!(!next_busy, "claim {i} should not throttle")
                }
                ClaimOutcome::Busy(_) => panic!("unexpected full ring"),
            }
        }
        // The last free slot: claiming it makes the following slot busy.
        match ring.claim(vec![0]) {
            ClaimOutcome::Claimed { next_busy, .. } => assert!(next_busy),
            ClaimOutcome::Busy(_) => panic!("unexpected full ring"),
        }
    }

    #[test]
    fn release_unblocks_the_next_claim() {
        let mut ring = TxRing::new();
        for _ in 0..NUM_SLOTS {
            ring.claim(vec![0]);
        }
        assert!(ring.is_next(0));
        ring.release(0);
        match ring.claim(vec![7]) {
            ClaimOutcome::Claimed { slot, .. } => assert_eq!(slot, 0),
            ClaimOutcome::Busy(_) => panic!("release did not free the slot"),
        }
    }

    #[test]
    fn take_buf_keeps_slot_busy_until_release() {
        let mut ring = TxRing::new();
        ring.claim(vec![1, 2, 3]);
        assert_eq!(ring.take_buf(0), Some(vec![1, 2, 3]));
        assert!(ring.in_flight(0));
        assert_eq!(ring.take_buf(0), None);

        // Still busy: a full wrap must skip it.
        for _ in 1..NUM_SLOTS {
            ring.claim(vec![0]);
        }
        assert!(matches!(ring.claim(vec![0]), ClaimOutcome::Busy(_)));

        ring.release(0);
        assert!(matches!(
            ring.claim(vec![9]),
            ClaimOutcome::Claimed { slot: 0, .. }
        ));
    }

    #[test]
    fn sweep_releases_busy_slots_and_unmaps() {
        let mut ring = TxRing::new();
        ring.claim(vec![0]);
        ring.claim(vec![0]);
        ring.set_mapped(0, true);
        ring.take_buf(0);

        let mut unmapped = Vec::new();
        let released = ring.sweep(|slot| unmapped.push(slot));
        assert_eq!(released, 2);
        assert_eq!(unmapped, vec![0]);
        assert!(!ring.slots[0].is_busy());
        assert!(!ring.slots[1].is_busy());
    }
}
