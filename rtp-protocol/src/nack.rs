//! Loss tracking and NACK generation
//!
//! Missing sequence numbers are kept in a [`NackTable`] with a retry counter
//! each. When feedback is due they are packed into generic NACK items
//! (RFC 4585 §6.2.1): a packet id (PID) plus a 16-bit bitmask of following
//! lost packets (BLP).

use crate::sequence::SeqNumber;
use std::collections::HashMap;

/// Offsets from the base that a single group may cover
pub const NACK_GROUP_SPAN: u16 = 16;

/// One generic NACK item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NackRequest {
    /// First lost packet
    pub pid: SeqNumber,
    /// Bit `i` set means `pid + i + 1` is lost as well
    pub blp: u16,
}

impl NackRequest {
    pub fn new(pid: SeqNumber, blp: u16) -> Self {
        NackRequest { pid, blp }
    }

    /// Every sequence number this item asks for, in ascending order
    pub fn sequences(&self) -> impl Iterator<Item = SeqNumber> + '_ {
        std::iter::once(self.pid).chain(
            (0..16u16)
                .filter(move |bit| self.blp & (1 << bit) != 0)
                .map(move |bit| self.pid + bit + 1),
        )
    }

    pub fn contains(&self, seq: SeqNumber) -> bool {
        match self.pid.forward_diff(seq) {
            0 => true,
            diff @ 1..=16 => self.blp & (1 << (diff - 1)) != 0,
            _ => false,
        }
    }

    /// Number of packets requested
    pub fn len(&self) -> usize {
        1 + self.blp.count_ones() as usize
    }
}

/// Packs ascending sequence numbers into (PID, BLP) groups
#[derive(Debug, Clone, Default)]
pub struct NackCoalescer {
    base: Option<SeqNumber>,
    mask: u16,
}

impl NackCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a lost sequence number to the current group
    ///
    /// Returns false when `seq` is not within reach of the current base; the
    /// caller then flushes with [`take`](Self::take) and adds `seq` again.
    pub fn add(&mut self, seq: SeqNumber) -> bool {
        let Some(base) = self.base else {
            self.base = Some(seq);
            self.mask = 0;
            return true;
        };

        if !seq.is_ahead_or_at(base) {
            return false;
        }
        match base.forward_diff(seq) {
            0 => true,
            diff if diff < NACK_GROUP_SPAN => {
                self.mask |= 1 << (diff - 1);
                true
            }
            _ => false,
        }
    }

    /// Flush the current group and start over
    pub fn take(&mut self) -> Option<NackRequest> {
        let base = self.base.take()?;
        let mask = std::mem::take(&mut self.mask);
        Some(NackRequest::new(base, mask))
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_none()
    }
}

/// Coalesce ascending sequence numbers into NACK items
pub fn coalesce<I>(seqs: I) -> Vec<NackRequest>
where
    I: IntoIterator<Item = SeqNumber>,
{
    let mut coalescer = NackCoalescer::new();
    let mut requests = Vec::new();

    for seq in seqs {
        if !coalescer.add(seq) {
            requests.extend(coalescer.take());
            coalescer.add(seq);
        }
    }
    requests.extend(coalescer.take());
    requests
}

/// Pending loss entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackEntry {
    pub seq: SeqNumber,
    /// NACKs already sent for this packet
    pub retries: u32,
}

/// Lost packets awaiting retransmission
#[derive(Debug, Default)]
pub struct NackTable {
    entries: HashMap<SeqNumber, u32>,
}

impl NackTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `seq`; returns false if it was already pending
    pub fn add(&mut self, seq: SeqNumber) -> bool {
        if self.entries.contains_key(&seq) {
            return false;
        }
        self.entries.insert(seq, 0);
        true
    }

    /// Track every sequence number in `first..=last`
    pub fn add_range(&mut self, first: SeqNumber, last: SeqNumber) -> usize {
        first
            .range_inclusive(last)
            .filter(|seq| self.add(*seq))
            .count()
    }

    /// Stop tracking `seq` (packet arrived)
    pub fn remove(&mut self, seq: SeqNumber) -> bool {
        self.entries.remove(&seq).is_some()
    }

    pub fn contains(&self, seq: SeqNumber) -> bool {
        self.entries.contains_key(&seq)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop entries behind `begin`; returns how many were removed
    pub fn prune_behind(&mut self, begin: SeqNumber) -> usize {
        let before = self.entries.len();
        self.entries.retain(|seq, _| !begin.is_ahead_of(*seq));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pending entries in circular ascending order
    pub fn snapshot(&self) -> Vec<NackEntry> {
        let mut entries: Vec<NackEntry> = self
            .entries
            .iter()
            .map(|(seq, retries)| NackEntry {
                seq: *seq,
                retries: *retries,
            })
            .collect();
        entries.sort_by(|a, b| a.seq.cmp_wrapping(b.seq));
        entries
    }

    /// Count one more NACK for `seq`, dropping it once `max_retries` is reached
    ///
    /// Returns true if the entry was dropped.
    pub fn record_attempt(&mut self, seq: SeqNumber, max_retries: u32) -> bool {
        let Some(retries) = self.entries.get_mut(&seq) else {
            return false;
        };
        *retries += 1;
        if *retries >= max_retries {
            self.entries.remove(&seq);
            true
        } else {
            false
        }
    }
}
