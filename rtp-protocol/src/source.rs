//! Per-source reception statistics
//!
//! Bookkeeping from RFC 3550 Appendix A: extended highest sequence number
//! with cycle counting (A.1), cumulative and interval loss (A.3) and
//! interarrival jitter (A.8). A receiver turns this into report blocks.

use crate::rtcp::ReportBlock;
use crate::sequence::SeqNumber;
use rtp_io::{duration_to_compact, NtpTime, Timestamp};

const SEQ_CYCLE: u64 = 1 << 16;

/// Reception state for one remote source
#[derive(Debug, Clone, Default)]
pub struct SourceStatistics {
    initialized: bool,
    base_seq: u16,
    max_seq: u16,
    cycles: u64,
    received: u64,
    expected_prior: u64,
    received_prior: u64,
    last_transit: Option<u32>,
    jitter: f64,
    last_sr: u32,
    last_sr_arrival: Option<Timestamp>,
}

impl SourceStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one received packet
    pub fn update_seq(&mut self, seq: SeqNumber) {
        let raw = seq.as_raw();
        if !self.initialized {
            self.initialized = true;
            self.base_seq = raw;
            self.max_seq = raw;
            self.received = 1;
            return;
        }

        let max = SeqNumber::new(self.max_seq);
        if seq.is_ahead_of(max) {
            if raw < self.max_seq {
                self.cycles += SEQ_CYCLE;
            }
            self.max_seq = raw;
        }
        self.received += 1;
    }

    /// Update interarrival jitter
    ///
    /// `arrival` is the local receive time expressed in the same clock-rate
    /// units as `rtp_timestamp`.
    pub fn update_jitter(&mut self, rtp_timestamp: u32, arrival: u32) {
        let transit = arrival.wrapping_sub(rtp_timestamp);
        if let Some(previous) = self.last_transit {
            let d = (transit.wrapping_sub(previous) as i32).unsigned_abs() as f64;
            self.jitter += (d - self.jitter) / 16.0;
        }
        self.last_transit = Some(transit);
    }

    /// Remember the arrival of a sender report from this source
    pub fn record_sender_report(&mut self, ntp: NtpTime, arrival: Timestamp) {
        self.last_sr = ntp.middle_32();
        self.last_sr_arrival = Some(arrival);
    }

    /// Highest sequence number seen, extended with the wrap count
    pub fn extended_highest_seq(&self) -> u32 {
        (self.cycles + self.max_seq as u64) as u32
    }

    /// Packets expected from the first to the highest sequence number
    pub fn expected(&self) -> u64 {
        if !self.initialized {
            return 0;
        }
        self.cycles + self.max_seq as u64 - self.base_seq as u64 + 1
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Expected minus received; negative when duplicates arrived
    pub fn cumulative_lost(&self) -> i64 {
        self.expected() as i64 - self.received as i64
    }

    /// Current jitter estimate in timestamp units
    pub fn jitter(&self) -> u32 {
        self.jitter as u32
    }

    /// Build a report block and start a new reporting interval
    pub fn report_block(&mut self, ssrc: u32, now: Timestamp) -> ReportBlock {
        let expected = self.expected();
        let expected_interval = expected - self.expected_prior.min(expected);
        let received_interval = self.received - self.received_prior.min(self.received);
        self.expected_prior = expected;
        self.received_prior = self.received;

        let lost_interval = expected_interval as i64 - received_interval as i64;
        let fraction_lost = if expected_interval == 0 || lost_interval <= 0 {
            0
        } else {
            ((lost_interval << 8) / expected_interval as i64).min(255) as u8
        };

        let delay_since_last_sr = self
            .last_sr_arrival
            .map(|arrival| duration_to_compact(now.duration_since(arrival)))
            .unwrap_or(0);

        ReportBlock {
            ssrc,
            fraction_lost,
            cumulative_lost: self.cumulative_lost().clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            highest_seq: self.extended_highest_seq(),
            jitter: self.jitter(),
            last_sr: self.last_sr,
            delay_since_last_sr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_sequence_cycles() {
        let mut stats = SourceStatistics::new();
        for raw in [65_533u16, 65_534, 65_535, 0, 1] {
            stats.update_seq(SeqNumber::new(raw));
        }

        assert_eq!(stats.extended_highest_seq(), 65_536 + 1);
        assert_eq!(stats.expected(), 5);
        assert_eq!(stats.cumulative_lost(), 0);
    }

    #[test]
    fn test_late_packet_does_not_move_max() {
        let mut stats = SourceStatistics::new();
        for raw in [10u16, 12, 11] {
            stats.update_seq(SeqNumber::new(raw));
        }

        assert_eq!(stats.extended_highest_seq(), 12);
        assert_eq!(stats.cumulative_lost(), 0);
    }

    #[test]
    fn test_fraction_lost_per_interval() {
        let mut stats = SourceStatistics::new();
        for raw in [0u16, 1, 3] {
            stats.update_seq(SeqNumber::new(raw));
        }

        let now = Timestamp::now();
        let block = stats.report_block(42, now);
        assert_eq!(block.ssrc, 42);
        assert_eq!(block.cumulative_lost, 1);
        assert_eq!(block.fraction_lost, 64);
        assert_eq!(block.highest_seq, 3);

        // Nothing new: next interval reports no loss
        let block = stats.report_block(42, now);
        assert_eq!(block.fraction_lost, 0);
        assert_eq!(block.cumulative_lost, 1);
    }

    #[test]
    fn test_jitter_converges() {
        let mut stats = SourceStatistics::new();
        // Packets sent 160 ticks apart arriving 200 ticks apart
        for i in 0..200u32 {
            stats.update_jitter(i * 160, i * 200);
        }
        assert!((38..=40).contains(&stats.jitter()));

        let mut steady = SourceStatistics::new();
        for i in 0..10u32 {
            steady.update_jitter(i * 160, 5_000 + i * 160);
        }
        assert_eq!(steady.jitter(), 0);
    }

    #[test]
    fn test_last_sr_and_delay() {
        let mut stats = SourceStatistics::new();
        stats.update_seq(SeqNumber::new(1));

        let arrival = Timestamp::now();
        stats.record_sender_report(
            NtpTime {
                seconds: 0x0001_0002,
                fraction: 0x0003_0004,
            },
            arrival,
        );

        let block = stats.report_block(1, arrival + Duration::from_millis(500));
        assert_eq!(block.last_sr, 0x0002_0003);
        assert_eq!(block.delay_since_last_sr, 0x8000);
    }
}
