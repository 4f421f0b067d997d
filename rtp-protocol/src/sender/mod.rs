//! RTP sender
//!
//! A [`Sender`] turns encoded access units into RTP packets for one
//! synchronization source. Codec-specific [`Packetizer`]s split a frame into
//! payload chunks; the sender stamps sequence numbers and timestamps, keeps
//! the packets in a history ring for retransmission and hands each one to its
//! outbound subscribers.

mod aac;
mod audio;
mod h264;
mod vp8;

pub use aac::{LatmPacketizer, Rfc3640Packetizer};
pub use audio::AudioPacketizer;
pub use h264::H264Packetizer;
pub use vp8::Vp8Packetizer;

use crate::buffer::PacketRing;
use crate::events::{FeedbackCounters, SenderEvents, Subscribers};
use crate::media::{Codec, Format};
use crate::nack::NackRequest;
use crate::packet::{RtpPacket, PACKET_BUFFER_SIZE};
use crate::rtcp::{ReportBlock, SenderReport};
use crate::sequence::SeqNumber;
use bytes::Bytes;
use parking_lot::Mutex;
use rtp_io::{compact_to_duration, NtpTime, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

/// Errors from [`Sender::send_frame`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Frame is empty")]
    EmptyFrame,

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("No NAL units found in frame")]
    NoNalUnits,
}

/// One packet's worth of payload produced by a packetizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub payload: Bytes,
    pub marker: bool,
    /// Timestamp increment applied after this chunk is sent
    pub advance: u32,
}

/// Splits one access unit into packet payloads
pub trait Packetizer: Send + Sync {
    fn packetize(&self, frame: &[u8], duration: u32) -> Result<Vec<Chunk>, SendError>;
}

/// Packetizer for a codec's RTP payload format
pub fn packetizer_for(codec: Codec) -> Box<dyn Packetizer> {
    match codec {
        Codec::Mpeg4Generic => Box::new(Rfc3640Packetizer),
        Codec::Mp4aLatm => Box::new(LatmPacketizer),
        Codec::H264 => Box::new(H264Packetizer),
        Codec::Vp8 => Box::new(Vp8Packetizer),
        Codec::Pcma | Codec::Pcmu | Codec::G722 | Codec::Opus | Codec::Other => {
            Box::new(AudioPacketizer)
        }
    }
}

/// Sender statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct SenderStats {
    pub ssrc: u32,
    pub last_seq: u16,
    pub last_timestamp: u32,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    /// Packets since the last sender report
    pub packets_sent_period: u32,
    /// Payload bytes since the last sender report
    pub bytes_sent_period: u32,
    pub packets_retransmitted: u64,
    /// Cumulative loss reported by the peer
    pub remote_lost: i32,
    /// Fraction lost reported by the peer, in 1/256 units
    pub remote_fraction_lost: u8,
    /// Jitter reported by the peer, in timestamp units
    pub remote_jitter: u32,
    /// Round-trip time derived from the last report block
    pub rtt: Option<Duration>,
    pub nacks: u64,
    pub plis: u64,
    pub firs: u64,
}

struct SenderState {
    seq: SeqNumber,
    timestamp: u32,
    history: PacketRing,
    last_seq: SeqNumber,
    /// Wall time and media timestamp of the most recent packet
    last_sent: Option<(Timestamp, u32)>,
    packets_sent: u64,
    bytes_sent: u64,
    packets_sent_period: u32,
    bytes_sent_period: u32,
    packets_retransmitted: u64,
    remote: Option<ReportBlock>,
    rtt: Option<Duration>,
}

/// Packetizes frames for one outgoing source
pub struct Sender {
    ssrc: u32,
    format: Format,
    packetizer: Box<dyn Packetizer>,
    state: Mutex<SenderState>,
    feedback: FeedbackCounters,
    subscribers: Subscribers<dyn SenderEvents>,
}

impl Sender {
    /// Create a sender with random initial sequence number and timestamp
    pub fn new(ssrc: u32, format: Format) -> Self {
        Self::with_initial(ssrc, format, SeqNumber::new(rand::random()), rand::random())
    }

    /// Create a sender starting at a known sequence number and timestamp
    pub fn with_initial(ssrc: u32, format: Format, seq: SeqNumber, timestamp: u32) -> Self {
        debug!(
            ssrc = format_args!("{:#010X}", ssrc),
            codec = %format.codec,
            pt = format.payload_type,
            "Created sender"
        );
        Sender {
            ssrc,
            format,
            packetizer: packetizer_for(format.codec),
            state: Mutex::new(SenderState {
                seq,
                timestamp,
                history: PacketRing::new(PACKET_BUFFER_SIZE),
                last_seq: seq.prev(),
                last_sent: None,
                packets_sent: 0,
                bytes_sent: 0,
                packets_sent_period: 0,
                bytes_sent_period: 0,
                packets_retransmitted: 0,
                remote: None,
                rtt: None,
            }),
            feedback: FeedbackCounters::default(),
            subscribers: Subscribers::new(),
        }
    }

    #[inline]
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    #[inline]
    pub fn format(&self) -> &Format {
        &self.format
    }

    /// Register a handler for outbound packets
    pub fn subscribe(&self, handler: Arc<dyn SenderEvents>) {
        self.subscribers.subscribe(handler);
    }

    /// Packetize and transmit one access unit
    ///
    /// `duration` is the frame length in clock-rate units. Returns the number
    /// of packets sent.
    pub fn send_frame(&self, frame: &[u8], duration: u32) -> Result<usize, SendError> {
        let chunks = self.packetizer.packetize(frame, duration)?;
        let count = chunks.len();

        let mut state = self.state.lock();
        for chunk in chunks {
            let mut packet =
                RtpPacket::new(self.format.payload_type, self.ssrc, state.seq, state.timestamp);
            packet.marker = chunk.marker;
            packet.payload = chunk.payload;
            self.transmit(&mut state, packet);
            state.timestamp = state.timestamp.wrapping_add(chunk.advance);
        }

        trace!(
            ssrc = format_args!("{:#010X}", self.ssrc),
            size = frame.len(),
            packets = count,
            "Sent frame"
        );
        Ok(count)
    }

    fn transmit(&self, state: &mut SenderState, packet: RtpPacket) {
        let wire = packet.to_bytes().freeze();
        self.subscribers
            .for_each(|h| h.on_outbound_packet(self.ssrc, &packet, &wire));

        let payload_len = packet.payload_size() as u32;
        state.packets_sent += 1;
        state.bytes_sent += payload_len as u64;
        state.packets_sent_period = state.packets_sent_period.wrapping_add(1);
        state.bytes_sent_period = state.bytes_sent_period.wrapping_add(payload_len);
        state.last_seq = packet.seq;
        state.seq = packet.seq.next();
        state.last_sent = Some((Timestamp::now(), packet.timestamp));
        state.history.insert(packet);
    }

    /// Look up a previously sent packet
    pub fn get_history(&self, seq: SeqNumber) -> Option<RtpPacket> {
        self.state.lock().history.get(seq).cloned()
    }

    /// Re-send every packet of `request` still held in history
    ///
    /// Returns the number of packets retransmitted.
    pub fn retransmit(&self, request: &NackRequest) -> usize {
        self.feedback.record_nack();

        let mut state = self.state.lock();
        let mut sent = 0;
        for seq in request.sequences() {
            let Some(packet) = state.history.get(seq) else {
                debug!(
                    ssrc = format_args!("{:#010X}", self.ssrc),
                    %seq,
                    "NACKed packet no longer in history"
                );
                continue;
            };
            let wire = packet.to_bytes().freeze();
            self.subscribers
                .for_each(|h| h.on_outbound_packet(self.ssrc, packet, &wire));
            sent += 1;
        }
        state.packets_retransmitted += sent as u64;
        sent
    }

    /// Snapshot counters for a sender report and start a new period
    ///
    /// The report carries no blocks; the caller appends reception reports.
    pub fn prepare_sender_report(&self, now: NtpTime) -> SenderReport {
        let mut state = self.state.lock();

        let rtp_timestamp = match state.last_sent {
            Some((sent_at, ts)) => ts.wrapping_add(
                Timestamp::now().as_rtp_units_since(sent_at, self.format.clock_rate),
            ),
            None => state.timestamp,
        };

        let report = SenderReport {
            ssrc: self.ssrc,
            ntp: now,
            rtp_timestamp,
            packet_count: state.packets_sent_period,
            octet_count: state.bytes_sent_period,
            reports: Vec::new(),
        };
        state.packets_sent_period = 0;
        state.bytes_sent_period = 0;
        report
    }

    /// Record the peer's view of this source from a report block
    pub fn update_from_receiver_report(&self, block: &ReportBlock, arrival: NtpTime) {
        let mut state = self.state.lock();
        if block.last_sr != 0 {
            let rtt = arrival
                .middle_32()
                .wrapping_sub(block.last_sr)
                .wrapping_sub(block.delay_since_last_sr);
            if rtt < 0x8000_0000 {
                state.rtt = Some(compact_to_duration(rtt));
            }
        }
        state.remote = Some(*block);
        trace!(
            ssrc = format_args!("{:#010X}", self.ssrc),
            lost = block.cumulative_lost,
            fraction = block.fraction_lost,
            jitter = block.jitter,
            "Receiver report"
        );
    }

    /// Count a picture loss indication from the peer
    pub fn record_pli(&self) -> u64 {
        self.feedback.record_pli()
    }

    /// Count a full intra request from the peer
    pub fn record_fir(&self) -> u64 {
        self.feedback.record_fir()
    }

    /// Sequence number of the most recently sent packet
    pub fn last_seq(&self) -> SeqNumber {
        self.state.lock().last_seq
    }

    /// Timestamp of the most recently sent packet
    pub fn last_timestamp(&self) -> u32 {
        let state = self.state.lock();
        state.last_sent.map(|(_, ts)| ts).unwrap_or(state.timestamp)
    }

    /// Timestamp the next frame will carry
    pub fn next_timestamp(&self) -> u32 {
        self.state.lock().timestamp
    }

    pub fn stats(&self) -> SenderStats {
        let state = self.state.lock();
        let remote = state.remote.unwrap_or_default();
        SenderStats {
            ssrc: self.ssrc,
            last_seq: state.last_seq.as_raw(),
            last_timestamp: state.last_sent.map(|(_, ts)| ts).unwrap_or(state.timestamp),
            packets_sent: state.packets_sent,
            bytes_sent: state.bytes_sent,
            packets_sent_period: state.packets_sent_period,
            bytes_sent_period: state.bytes_sent_period,
            packets_retransmitted: state.packets_retransmitted,
            remote_lost: remote.cumulative_lost,
            remote_fraction_lost: remote.fraction_lost,
            remote_jitter: remote.jitter,
            rtt: state.rtt,
            nacks: self.feedback.nacks(),
            plis: self.feedback.plis(),
            firs: self.feedback.firs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Capture(Mutex<Vec<RtpPacket>>);

    impl SenderEvents for Capture {
        fn on_outbound_packet(&self, _ssrc: u32, packet: &RtpPacket, wire: &Bytes) {
            assert_eq!(RtpPacket::parse(wire).unwrap(), *packet);
            self.0.lock().push(packet.clone());
        }
    }

    fn sender(codec: Codec) -> (Sender, Arc<Capture>) {
        let sender = Sender::with_initial(
            0x1234,
            Format::with_defaults(codec, 96),
            SeqNumber::new(65_534),
            1_000,
        );
        let capture = Arc::new(Capture::default());
        sender.subscribe(capture.clone());
        (sender, capture)
    }

    #[test]
    fn test_sequence_and_history() {
        let (sender, capture) = sender(Codec::Pcmu);
        sender.send_frame(&[1; 160], 160).unwrap();
        sender.send_frame(&[2; 160], 160).unwrap();
        sender.send_frame(&[3; 160], 160).unwrap();

        let seqs: Vec<u16> = capture.0.lock().iter().map(|p| p.seq.as_raw()).collect();
        assert_eq!(seqs, vec![65_534, 65_535, 0]);
        assert_eq!(sender.last_seq(), SeqNumber::new(0));
        assert_eq!(sender.last_timestamp(), 1_320);
        assert_eq!(sender.next_timestamp(), 1_480);

        let stored = sender.get_history(SeqNumber::new(65_535)).unwrap();
        assert_eq!(stored.timestamp, 1_160);
        assert_eq!(&stored.payload[..], &[2; 160]);
        assert!(sender.get_history(SeqNumber::new(1)).is_none());
    }

    #[test]
    fn test_history_rejects_stale_slot() {
        let (sender, _capture) = sender(Codec::Pcmu);
        for _ in 0..(PACKET_BUFFER_SIZE + 1) {
            sender.send_frame(&[0; 10], 10).unwrap();
        }

        // First packet's slot now holds a newer sequence number
        assert!(sender.get_history(SeqNumber::new(65_534)).is_none());
        assert!(sender.get_history(SeqNumber::new(65_535)).is_some());
    }

    #[test]
    fn test_retransmit() {
        let (sender, capture) = sender(Codec::Pcmu);
        for _ in 0..4 {
            sender.send_frame(&[0; 10], 10).unwrap();
        }
        capture.0.lock().clear();

        // 65_534 and 0 are in history, 5 is not
        let sent = sender.retransmit(&NackRequest::new(SeqNumber::new(65_534), 0b1 << 1 | 0b1 << 6));
        assert_eq!(sent, 2);

        let seqs: Vec<u16> = capture.0.lock().iter().map(|p| p.seq.as_raw()).collect();
        assert_eq!(seqs, vec![65_534, 0]);

        let stats = sender.stats();
        assert_eq!(stats.nacks, 1);
        assert_eq!(stats.packets_retransmitted, 2);
        assert_eq!(stats.packets_sent, 4);
    }

    #[test]
    fn test_sender_report_resets_period() {
        let (sender, _capture) = sender(Codec::Pcmu);
        sender.send_frame(&[0; 100], 100).unwrap();
        sender.send_frame(&[0; 60], 60).unwrap();

        let now = NtpTime::now();
        let sr = sender.prepare_sender_report(now);
        assert_eq!(sr.ssrc, 0x1234);
        assert_eq!(sr.ntp, now);
        assert_eq!(sr.packet_count, 2);
        assert_eq!(sr.octet_count, 160);
        assert!(sr.reports.is_empty());

        let sr = sender.prepare_sender_report(now);
        assert_eq!(sr.packet_count, 0);
        assert_eq!(sender.stats().packets_sent, 2);
    }

    #[test]
    fn test_receiver_report_and_rtt() {
        let (sender, _capture) = sender(Codec::Pcmu);
        let arrival = NtpTime {
            seconds: 100,
            fraction: 0,
        };
        let block = ReportBlock {
            ssrc: 0x1234,
            fraction_lost: 25,
            cumulative_lost: 7,
            jitter: 12,
            // SR sent at 99.5 s, held for 0.25 s by the peer
            last_sr: (99 << 16) | 0x8000,
            delay_since_last_sr: 0x4000,
            ..Default::default()
        };
        sender.update_from_receiver_report(&block, arrival);

        let stats = sender.stats();
        assert_eq!(stats.remote_lost, 7);
        assert_eq!(stats.remote_fraction_lost, 25);
        assert_eq!(stats.remote_jitter, 12);
        assert_eq!(stats.rtt, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_feedback_counters() {
        let (sender, _capture) = sender(Codec::H264);
        sender.record_pli();
        sender.record_fir();
        sender.record_fir();

        let stats = sender.stats();
        assert_eq!(stats.plis, 1);
        assert_eq!(stats.firs, 2);
    }

    #[test]
    fn test_empty_frame_rejected() {
        let (sender, capture) = sender(Codec::Vp8);
        assert_eq!(sender.send_frame(&[], 3_000), Err(SendError::EmptyFrame));
        assert!(capture.0.lock().is_empty());
    }
}
