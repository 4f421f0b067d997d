//! Fixed-capacity packet ring indexed by sequence number
//!
//! Both the sender history and the receiver reorder buffer map a sequence
//! number to slot `seq % capacity`. Insertion overwrites whatever occupies
//! the slot; reads check that the occupant carries the requested sequence
//! number, so an occupant left over from a previous lap reads as empty.
//!
//! The slot count is always a power of two dividing 65536, otherwise two
//! sequence numbers less than `capacity` apart across the wrap would share
//! a slot.

use crate::packet::{RtpPacket, PACKET_BUFFER_SIZE};
use crate::sequence::SeqNumber;

/// Largest ring a 16-bit sequence space can index without aliasing
pub const MAX_RING_CAPACITY: usize = 0x8000;

/// Round a requested slot count to the one a [`PacketRing`] will use
pub fn ring_slots(requested: usize) -> usize {
    requested.clamp(1, MAX_RING_CAPACITY).next_power_of_two()
}

/// Circular packet store
#[derive(Debug, Clone)]
pub struct PacketRing {
    slots: Vec<Option<RtpPacket>>,
}

impl PacketRing {
    /// Create a ring with at least `capacity` slots (see [`ring_slots`])
    pub fn new(capacity: usize) -> Self {
        PacketRing {
            slots: vec![None; ring_slots(capacity)],
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn index(&self, seq: SeqNumber) -> usize {
        seq.slot(self.slots.len())
    }

    /// Store a packet, returning whatever previously occupied its slot
    pub fn insert(&mut self, packet: RtpPacket) -> Option<RtpPacket> {
        let idx = self.index(packet.seq);
        self.slots[idx].replace(packet)
    }

    /// Get the packet with sequence number `seq`
    pub fn get(&self, seq: SeqNumber) -> Option<&RtpPacket> {
        match &self.slots[self.index(seq)] {
            Some(packet) if packet.seq == seq => Some(packet),
            _ => None,
        }
    }

    pub fn contains(&self, seq: SeqNumber) -> bool {
        self.get(seq).is_some()
    }

    /// Remove and return the packet with sequence number `seq`
    pub fn take(&mut self, seq: SeqNumber) -> Option<RtpPacket> {
        let idx = self.index(seq);
        match &self.slots[idx] {
            Some(packet) if packet.seq == seq => self.slots[idx].take(),
            _ => None,
        }
    }

    /// Empty the slot for `seq` regardless of its occupant
    pub fn clear_slot(&mut self, seq: SeqNumber) {
        let idx = self.index(seq);
        self.slots[idx] = None;
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

impl Default for PacketRing {
    fn default() -> Self {
        PacketRing::new(PACKET_BUFFER_SIZE)
    }
}
