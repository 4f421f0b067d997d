//! RTP receiver
//!
//! A [`Receiver`] accepts packets for one remote synchronization source,
//! holds them in a reorder ring indexed by sequence number, and reassembles
//! access units once they are complete. Gaps are tracked in a NACK table that
//! a background thread turns into retransmission requests; when recovery is
//! hopeless the thread asks for a key frame instead.
//!
//! The window of undelivered packets runs from `begin` to `end` inclusive.
//! `begin` only moves forward: when a frame is delivered, when the head of the
//! window has waited longer than the configured delay, or when the window
//! outgrows the ring.

mod aac;
mod audio;
mod h264;
mod vp8;

pub use aac::{LatmDepacketizer, Rfc3640Depacketizer};
pub use audio::AudioDepacketizer;
pub use h264::H264Depacketizer;
pub use vp8::Vp8Depacketizer;

use crate::buffer::{ring_slots, PacketRing};
use crate::codec::DepacketizeError;
use crate::events::{FeedbackCounters, ReceiverEvents, Subscribers};
use crate::media::{Codec, Format, Frame, MediaKind};
use crate::nack::{coalesce, NackTable};
use crate::packet::{PacketError, RtpPacket, PACKET_BUFFER_SIZE};
use crate::rtcp::{ReportBlock, SenderReport};
use crate::sequence::SeqNumber;
use crate::source::SourceStatistics;
use parking_lot::Mutex;
use rtp_io::{NtpTime, Signal, Timer, Timestamp};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Errors from [`Receiver::insert_packet`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReceiverError {
    #[error("Malformed packet: {0}")]
    Malformed(#[from] PacketError),

    #[error("SSRC mismatch: expected {expected:#010X}, got {actual:#010X}")]
    SsrcMismatch { expected: u32, actual: u32 },
}

/// What happened to an inserted packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Stored in the window
    Accepted,
    /// Behind the window; discarded
    Stale,
}

/// One decoded unit produced by a [`Depacketizer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub frame: Frame,
    /// Decoding can start from this unit
    pub keyframe: bool,
}

/// Reconstructs frames from the packets of one RTP payload format
///
/// Audio-class formats receive one packet per call; video formats receive
/// every packet of an access unit, ending with the marker packet.
pub trait Depacketizer: Send + Sync {
    fn depacketize(&self, packets: &[RtpPacket]) -> Result<Vec<Unit>, DepacketizeError>;

    /// Whether losing `packet` breaks decoding of later frames
    fn is_reference(&self, _packet: &RtpPacket) -> bool {
        false
    }
}

/// Depacketizer for a codec's RTP payload format
pub fn depacketizer_for(codec: Codec) -> Box<dyn Depacketizer> {
    match codec {
        Codec::Mpeg4Generic => Box::new(Rfc3640Depacketizer),
        Codec::Mp4aLatm => Box::new(LatmDepacketizer),
        Codec::H264 => Box::new(H264Depacketizer),
        Codec::Vp8 => Box::new(Vp8Depacketizer),
        Codec::Pcma | Codec::Pcmu | Codec::G722 | Codec::Opus | Codec::Other => {
            Box::new(AudioDepacketizer::new(codec))
        }
    }
}

/// Receiver tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// How long the head of the window may wait for a missing packet
    pub delay: Duration,
    /// NACKs sent per lost packet; `None` picks 1 for audio and 3 for video
    pub max_nack_retries: Option<u32>,
    /// Pending NACK count above which the table is flushed
    pub nack_flush_threshold: usize,
    /// Minimum spacing between key frame requests
    pub keyframe_interval: Duration,
    /// NACK thread wait while losses are pending
    pub nack_busy_poll: Duration,
    /// NACK thread wait while idle
    pub nack_idle_poll: Duration,
    /// Reorder ring slots, rounded up to a power of two no larger than 32768
    pub capacity: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            delay: Duration::from_secs(1),
            max_nack_retries: None,
            nack_flush_threshold: 1000,
            keyframe_interval: Duration::from_secs(3),
            nack_busy_poll: Duration::from_millis(10),
            nack_idle_poll: Duration::from_secs(1),
            capacity: PACKET_BUFFER_SIZE,
        }
    }
}

impl ReceiverConfig {
    /// Retry budget for a stream of `kind`
    pub fn nack_retries(&self, kind: MediaKind) -> u32 {
        self.max_nack_retries.unwrap_or(match kind {
            MediaKind::Audio => 1,
            MediaKind::Video => 3,
        })
    }
}

/// Receiver statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct ReceiverStats {
    pub ssrc: u32,
    pub last_seq: u16,
    pub last_timestamp: u32,
    /// Interarrival jitter in timestamp units
    pub jitter: u32,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub packets_received_period: u32,
    pub bytes_received_period: u32,
    /// Packets discarded for arriving behind the window
    pub packets_stale: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    /// Cumulative packets lost
    pub lost: i64,
    /// Fraction lost in the last report, in 1/256 units
    pub fraction_lost: u8,
    /// Packets the peer reported sending, summed over its sender reports
    pub remote_packets_sent: u64,
    pub remote_bytes_sent: u64,
    pub remote_packets_sent_period: u32,
    pub remote_bytes_sent_period: u32,
    /// Wall clock of the last sender report
    pub last_sr: Option<NtpTime>,
    pub nacks: u64,
    pub plis: u64,
    pub firs: u64,
}

struct ReceiverState {
    ring: PacketRing,
    begin: SeqNumber,
    end: SeqNumber,
    /// When the head of the window last moved
    head_since: Timestamp,
    /// Reference for arrival times in media clock units
    origin: Timestamp,
    source: SourceStatistics,
    stats: ReceiverStats,
}

impl ReceiverState {
    fn window_empty(&self) -> bool {
        self.begin.is_ahead_of(self.end)
    }

    fn advance_to(&mut self, seq: SeqNumber) {
        self.begin = seq;
        self.head_since = Timestamp::now();
    }

    fn timed_out(&self, delay: Duration) -> bool {
        self.head_since.elapsed() >= delay
    }

    /// Pass units through the key frame gate
    fn deliver(&mut self, shared: &ReceiverShared, packets: &[RtpPacket], out: &mut Vec<Frame>) {
        let units = match shared.depacketizer.depacketize(packets) {
            Ok(units) => units,
            Err(e) => {
                debug!(
                    ssrc = format_args!("{:#010X}", shared.ssrc),
                    error = %e,
                    "Dropping undecodable frame"
                );
                self.stats.frames_dropped += 1;
                return;
            }
        };

        for unit in units {
            if unit.keyframe && shared.waiting_for_keyframe.swap(false, Ordering::AcqRel) {
                debug!(ssrc = format_args!("{:#010X}", shared.ssrc), "Key frame received");
            }
            if shared.waiting_for_keyframe.load(Ordering::Acquire) {
                self.stats.frames_dropped += 1;
            } else {
                self.stats.frames_received += 1;
                out.push(unit.frame);
            }
        }
    }

    /// Audio-class formats: one frame per packet
    fn reassemble_audio(&mut self, shared: &ReceiverShared, out: &mut Vec<Frame>) {
        let start = self.begin;
        let mut seq = start;
        while !seq.is_ahead_of(self.end) {
            match self.ring.take(seq) {
                Some(packet) => self.deliver(shared, &[packet], out),
                None if self.timed_out(shared.config.delay) => {
                    trace!(%seq, "Skipping missing packet");
                    self.stats.frames_dropped += 1;
                }
                None => break,
            }
            seq = seq.next();
        }
        if seq != start {
            self.advance_to(seq);
        }
    }

    /// Video formats: frames end at the marker packet
    fn reassemble_video(&mut self, shared: &ReceiverShared, out: &mut Vec<Frame>) {
        loop {
            while let Some(packets) = self.take_frame() {
                self.deliver(shared, &packets, out);
            }
            if self.window_empty() || !self.timed_out(shared.config.delay) {
                break;
            }
            self.drop_to_marker(shared);
        }
    }

    /// Remove a complete run of packets from `begin` through a marker packet
    fn take_frame(&mut self) -> Option<Vec<RtpPacket>> {
        if self.window_empty() {
            return None;
        }
        let mut last = self.begin;
        loop {
            if self.ring.get(last)?.marker {
                break;
            }
            if last == self.end {
                return None;
            }
            last = last.next();
        }

        let packets = self
            .begin
            .range_inclusive(last)
            .filter_map(|seq| self.ring.take(seq))
            .collect();
        self.advance_to(last.next());
        Some(packets)
    }

    /// Give up on the frame at the head of the window
    fn drop_to_marker(&mut self, shared: &ReceiverShared) {
        let mut stop = self.end.next();
        let mut reference = false;
        for seq in self.begin.range_inclusive(self.end) {
            let Some(packet) = self.ring.take(seq) else {
                continue;
            };
            reference |= shared.depacketizer.is_reference(&packet);
            if packet.marker {
                stop = seq.next();
                break;
            }
        }

        debug!(
            ssrc = format_args!("{:#010X}", shared.ssrc),
            from = %self.begin,
            to = %stop,
            reference,
            "Reassembly timed out, dropping frame"
        );
        self.stats.frames_dropped += 1;
        if reference {
            shared.waiting_for_keyframe.store(true, Ordering::Release);
        }
        self.advance_to(stop);
    }
}

struct ReceiverShared {
    ssrc: u32,
    format: Format,
    config: ReceiverConfig,
    max_nack_retries: u32,
    depacketizer: Box<dyn Depacketizer>,
    state: Mutex<ReceiverState>,
    nack: Mutex<NackTable>,
    signal: Signal,
    active: AtomicBool,
    reset: AtomicBool,
    waiting_for_keyframe: AtomicBool,
    feedback: FeedbackCounters,
    subscribers: Subscribers<dyn ReceiverEvents>,
}

impl ReceiverShared {
    fn reassemble(&self, state: &mut ReceiverState) -> Vec<Frame> {
        let mut frames = Vec::new();
        match self.format.kind() {
            MediaKind::Audio => state.reassemble_audio(self, &mut frames),
            MediaKind::Video => state.reassemble_video(self, &mut frames),
        }
        frames
    }

    /// Forget losses the window has moved past
    fn prune_nacks(&self, begin: SeqNumber) {
        let pruned = self.nack.lock().prune_behind(begin);
        if pruned > 0 {
            trace!(ssrc = format_args!("{:#010X}", self.ssrc), %begin, pruned, "Pruned NACK entries");
        }
    }

    fn dispatch(&self, frames: Vec<Frame>) {
        for frame in &frames {
            self.subscribers
                .for_each(|h| h.on_frame(self.ssrc, &self.format, frame));
        }
    }
}

/// Reassembles frames for one incoming source
pub struct Receiver {
    shared: Arc<ReceiverShared>,
    nack_thread: Option<JoinHandle<()>>,
}

impl Receiver {
    /// Create a receiver with default tuning
    pub fn new(ssrc: u32, format: Format) -> Self {
        Self::with_config(ssrc, format, ReceiverConfig::default())
    }

    /// Create a receiver and start its NACK thread
    pub fn with_config(ssrc: u32, format: Format, config: ReceiverConfig) -> Self {
        let now = Timestamp::now();
        let capacity = ring_slots(config.capacity);
        let shared = Arc::new(ReceiverShared {
            ssrc,
            format,
            max_nack_retries: config.nack_retries(format.kind()),
            depacketizer: depacketizer_for(format.codec),
            state: Mutex::new(ReceiverState {
                ring: PacketRing::new(capacity),
                begin: SeqNumber::new(0),
                end: SeqNumber::new(0),
                head_since: now,
                origin: now,
                source: SourceStatistics::new(),
                stats: ReceiverStats {
                    ssrc,
                    ..Default::default()
                },
            }),
            config: ReceiverConfig { capacity, ..config },
            nack: Mutex::new(NackTable::new()),
            signal: Signal::new(),
            active: AtomicBool::new(true),
            reset: AtomicBool::new(true),
            waiting_for_keyframe: AtomicBool::new(format.kind() == MediaKind::Video),
            feedback: FeedbackCounters::default(),
            subscribers: Subscribers::new(),
        });

        let worker = Arc::clone(&shared);
        let nack_thread = thread::spawn(move || run_nack(worker));

        debug!(
            ssrc = format_args!("{:#010X}", ssrc),
            codec = %format.codec,
            pt = format.payload_type,
            "Created receiver"
        );
        Receiver {
            shared,
            nack_thread: Some(nack_thread),
        }
    }

    #[inline]
    pub fn ssrc(&self) -> u32 {
        self.shared.ssrc
    }

    #[inline]
    pub fn format(&self) -> &Format {
        &self.shared.format
    }

    /// Register a handler for frames and feedback requests
    pub fn subscribe(&self, handler: Arc<dyn ReceiverEvents>) {
        self.shared.subscribers.subscribe(handler);
    }

    /// Parse a datagram and insert the packet
    pub fn insert_bytes(&self, data: &[u8]) -> Result<InsertOutcome, ReceiverError> {
        let packet = RtpPacket::parse(data)?;
        self.insert_packet(packet)
    }

    /// Store a packet and deliver any frames it completes
    pub fn insert_packet(&self, packet: RtpPacket) -> Result<InsertOutcome, ReceiverError> {
        let shared = &*self.shared;
        if packet.ssrc != shared.ssrc {
            return Err(ReceiverError::SsrcMismatch {
                expected: shared.ssrc,
                actual: packet.ssrc,
            });
        }

        let seq = packet.seq;
        let mut state = shared.state.lock();

        if shared.reset.swap(false, Ordering::AcqRel) {
            debug!(ssrc = format_args!("{:#010X}", shared.ssrc), %seq, "Resetting receive window");
            state.ring.clear();
            state.begin = seq;
            state.end = seq;
            state.head_since = Timestamp::now();
            shared.nack.lock().clear();
        }

        if state.begin.is_ahead_of(seq) {
            trace!(%seq, begin = %state.begin, "Stale packet");
            state.stats.packets_stale += 1;
            return Ok(InsertOutcome::Stale);
        }

        let begin = state.begin;
        // A packet landing in an empty window starts a new wait
        if state.window_empty() {
            state.head_since = Timestamp::now();
        }

        let payload_len = packet.payload_size() as u32;
        let stats = &mut state.stats;
        stats.packets_received += 1;
        stats.bytes_received += payload_len as u64;
        stats.packets_received_period = stats.packets_received_period.wrapping_add(1);
        stats.bytes_received_period = stats.bytes_received_period.wrapping_add(payload_len);
        stats.last_timestamp = packet.timestamp;

        let arrival = Timestamp::now().as_rtp_units_since(state.origin, shared.format.clock_rate);
        state.source.update_seq(seq);
        state.source.update_jitter(packet.timestamp, arrival);

        state.ring.insert(packet);
        shared.nack.lock().remove(seq);

        if state.end.is_ahead_of(seq) {
            trace!(%seq, "Recovered lost packet");
        } else {
            let gap = state.end.forward_diff(seq);
            if gap > 1 && shared.max_nack_retries > 0 {
                let added = shared.nack.lock().add_range(state.end.next(), seq.prev());
                trace!(from = %state.end.next(), to = %seq.prev(), added, "Packets missing");
                shared.signal.notify();
            }
            state.end = seq;
        }

        let span = state.begin.forward_diff(state.end) as usize;
        if !state.window_empty() && span >= shared.config.capacity {
            warn!(
                ssrc = format_args!("{:#010X}", shared.ssrc),
                span,
                "Receive window exhausted, skipping ahead"
            );
            state.stats.frames_dropped += span as u64;
            let end = state.end;
            state.advance_to(end);
        }

        let frames = shared.reassemble(&mut state);
        if state.begin != begin {
            shared.prune_nacks(state.begin);
        }
        drop(state);
        shared.dispatch(frames);
        Ok(InsertOutcome::Accepted)
    }

    /// Run reassembly without a new packet so timeouts can fire
    pub fn poll(&self) {
        let frames = {
            let mut state = self.shared.state.lock();
            let begin = state.begin;
            let frames = self.shared.reassemble(&mut state);
            if state.begin != begin {
                self.shared.prune_nacks(state.begin);
            }
            frames
        };
        self.shared.dispatch(frames);
    }

    /// Build this source's report block and start a new reporting period
    pub fn prepare_receiver_report(&self, now: Timestamp) -> ReportBlock {
        let mut state = self.shared.state.lock();
        let block = state.source.report_block(self.shared.ssrc, now);
        state.stats.fraction_lost = block.fraction_lost;
        state.stats.packets_received_period = 0;
        state.stats.bytes_received_period = 0;
        block
    }

    /// Record a sender report from the remote source
    pub fn update_from_sender_report(&self, report: &SenderReport, now: Timestamp) {
        let mut state = self.shared.state.lock();
        state.source.record_sender_report(report.ntp, now);

        let stats = &mut state.stats;
        stats.remote_packets_sent += report.packet_count as u64;
        stats.remote_bytes_sent += report.octet_count as u64;
        stats.remote_packets_sent_period = report.packet_count;
        stats.remote_bytes_sent_period = report.octet_count;
        stats.last_sr = Some(report.ntp);
    }

    /// Count a PLI sent for this source; the window restarts on the next packet
    pub fn record_pli(&self) -> u64 {
        self.shared.reset.store(true, Ordering::Release);
        self.shared.feedback.record_pli()
    }

    /// Count a FIR sent for this source; the window restarts on the next packet
    pub fn record_fir(&self) -> u64 {
        self.shared.reset.store(true, Ordering::Release);
        self.shared.feedback.record_fir()
    }

    pub fn waiting_for_keyframe(&self) -> bool {
        self.shared.waiting_for_keyframe.load(Ordering::Acquire)
    }

    /// Current window as (begin, end)
    pub fn cursor(&self) -> (SeqNumber, SeqNumber) {
        let state = self.shared.state.lock();
        (state.begin, state.end)
    }

    /// Sequence numbers awaiting retransmission, in ascending order
    pub fn pending_nacks(&self) -> Vec<SeqNumber> {
        self.shared
            .nack
            .lock()
            .snapshot()
            .into_iter()
            .map(|entry| entry.seq)
            .collect()
    }

    pub fn stats(&self) -> ReceiverStats {
        let state = self.shared.state.lock();
        let mut stats = state.stats.clone();
        stats.last_seq = state.end.as_raw();
        stats.jitter = state.source.jitter();
        stats.lost = state.source.cumulative_lost();
        stats.nacks = self.shared.feedback.nacks();
        stats.plis = self.shared.feedback.plis();
        stats.firs = self.shared.feedback.firs();
        stats
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.shared.active.store(false, Ordering::Release);
        self.shared.signal.notify();
        if let Some(handle) = self.nack_thread.take() {
            if handle.join().is_err() {
                warn!(ssrc = format_args!("{:#010X}", self.shared.ssrc), "NACK thread panicked");
            }
        }
    }
}

/// Background loss recovery loop
fn run_nack(shared: Arc<ReceiverShared>) {
    let config = &shared.config;
    let mut keyframe_timer = Timer::new(config.keyframe_interval);

    while shared.active.load(Ordering::Acquire) {
        let entries = shared.nack.lock().snapshot();

        if entries.len() > config.nack_flush_threshold
            || shared.waiting_for_keyframe.load(Ordering::Acquire)
        {
            // Flushing abandons the losses, so the window restarts on the next packet
            if !entries.is_empty() {
                shared.nack.lock().clear();
                shared.reset.store(true, Ordering::Release);
            }
            if shared.format.kind() == MediaKind::Video && keyframe_timer.try_fire() {
                debug!(ssrc = format_args!("{:#010X}", shared.ssrc), "Requesting key frame");
                shared
                    .subscribers
                    .for_each(|h| h.on_keyframe_request(shared.ssrc, &shared.format));
            }
            shared.signal.wait_timeout(config.nack_idle_poll);
            continue;
        }

        for request in coalesce(entries.iter().map(|entry| entry.seq)) {
            shared.feedback.record_nack();
            trace!(
                ssrc = format_args!("{:#010X}", shared.ssrc),
                pid = %request.pid,
                blp = format_args!("{:#06X}", request.blp),
                "Sending NACK"
            );
            shared
                .subscribers
                .for_each(|h| h.on_nack(shared.ssrc, &shared.format, request));
        }

        let remaining = {
            let mut table = shared.nack.lock();
            for entry in &entries {
                if table.record_attempt(entry.seq, shared.max_nack_retries) {
                    trace!(seq = %entry.seq, "NACK retries exhausted");
                }
            }
            table.len()
        };

        let wait = if remaining > 0 {
            config.nack_busy_poll
        } else {
            config.nack_idle_poll
        };
        shared.signal.wait_timeout(wait);
    }
    trace!(ssrc = format_args!("{:#010X}", shared.ssrc), "NACK thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{unbounded, Receiver as Channel, Sender as ChannelSender};

    struct Forward {
        frames: ChannelSender<Frame>,
        nacks: ChannelSender<crate::nack::NackRequest>,
        keyframes: ChannelSender<u32>,
    }

    impl ReceiverEvents for Forward {
        fn on_frame(&self, _ssrc: u32, _format: &Format, frame: &Frame) {
            let _ = self.frames.send(frame.clone());
        }

        fn on_nack(&self, _ssrc: u32, _format: &Format, request: crate::nack::NackRequest) {
            let _ = self.nacks.send(request);
        }

        fn on_keyframe_request(&self, ssrc: u32, _format: &Format) {
            let _ = self.keyframes.send(ssrc);
        }
    }

    struct Harness {
        receiver: Receiver,
        frames: Channel<Frame>,
        nacks: Channel<crate::nack::NackRequest>,
        keyframes: Channel<u32>,
    }

    fn harness(codec: Codec, config: ReceiverConfig) -> Harness {
        let receiver = Receiver::with_config(0xBEEF, Format::with_defaults(codec, 96), config);
        let (frames_tx, frames) = unbounded();
        let (nacks_tx, nacks) = unbounded();
        let (keyframes_tx, keyframes) = unbounded();
        receiver.subscribe(Arc::new(Forward {
            frames: frames_tx,
            nacks: nacks_tx,
            keyframes: keyframes_tx,
        }));
        Harness {
            receiver,
            frames,
            nacks,
            keyframes,
        }
    }

    fn packet(seq: u16, ts: u32, marker: bool, payload: &[u8]) -> RtpPacket {
        let mut packet = RtpPacket::new(96, 0xBEEF, SeqNumber::new(seq), ts);
        packet.marker = marker;
        packet.set_payload(payload);
        packet
    }

    /// Long polls so the NACK thread leaves the table alone between checks
    fn quiet() -> ReceiverConfig {
        ReceiverConfig {
            max_nack_retries: Some(3),
            nack_busy_poll: Duration::from_secs(30),
            nack_idle_poll: Duration::from_secs(30),
            ..Default::default()
        }
    }

    #[test]
    fn test_audio_in_order() {
        let h = harness(Codec::Pcmu, ReceiverConfig::default());
        for seq in 0..3u16 {
            let outcome = h
                .receiver
                .insert_packet(packet(seq, seq as u32 * 160, false, &[seq as u8; 160]))
                .unwrap();
            assert_eq!(outcome, InsertOutcome::Accepted);
        }

        let frames: Vec<Frame> = h.frames.try_iter().collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].pts, 320);
        assert_eq!(frames[1].data[0], 1);

        let stats = h.receiver.stats();
        assert_eq!(stats.frames_received, 3);
        assert_eq!(stats.packets_received, 3);
        assert_eq!(stats.bytes_received, 480);
        assert_eq!(h.receiver.cursor(), (SeqNumber::new(3), SeqNumber::new(2)));
    }

    #[test]
    fn test_gap_records_nacks() {
        let h = harness(Codec::Pcmu, quiet());
        for seq in [10u16, 11, 14] {
            h.receiver.insert_packet(packet(seq, 0, false, &[0; 10])).unwrap();
        }

        assert_eq!(
            h.receiver.pending_nacks(),
            vec![SeqNumber::new(12), SeqNumber::new(13)]
        );
        assert_eq!(h.receiver.cursor().1, SeqNumber::new(14));
        // 14 waits behind the hole
        assert_eq!(h.frames.try_iter().count(), 2);
    }

    #[test]
    fn test_late_packet_fills_hole() {
        let h = harness(Codec::Pcmu, quiet());
        for seq in [10u16, 11, 13, 12] {
            h.receiver.insert_packet(packet(seq, seq as u32, false, &[seq as u8])).unwrap();
        }

        let order: Vec<u32> = h.frames.try_iter().map(|f| f.pts).collect();
        assert_eq!(order, vec![10, 11, 12, 13]);
        assert!(h.receiver.pending_nacks().is_empty());
        assert_eq!(h.receiver.cursor(), (SeqNumber::new(14), SeqNumber::new(13)));
    }

    #[test]
    fn test_stale_packet() {
        let h = harness(Codec::Pcmu, quiet());
        h.receiver.insert_packet(packet(100, 0, false, &[1])).unwrap();
        h.receiver.insert_packet(packet(101, 0, false, &[1])).unwrap();

        let outcome = h.receiver.insert_packet(packet(100, 0, false, &[1])).unwrap();
        assert_eq!(outcome, InsertOutcome::Stale);
        assert_eq!(h.receiver.stats().packets_stale, 1);
        assert_eq!(h.receiver.stats().packets_received, 2);
    }

    #[test]
    fn test_ssrc_mismatch() {
        let h = harness(Codec::Pcmu, quiet());
        let mut foreign = packet(1, 0, false, &[1]);
        foreign.ssrc = 7;
        assert_eq!(
            h.receiver.insert_packet(foreign),
            Err(ReceiverError::SsrcMismatch {
                expected: 0xBEEF,
                actual: 7
            })
        );
    }

    #[test]
    fn test_malformed_bytes() {
        let h = harness(Codec::Pcmu, quiet());
        assert!(matches!(
            h.receiver.insert_bytes(&[0x80, 0]),
            Err(ReceiverError::Malformed(_))
        ));
    }

    #[test]
    fn test_audio_timeout_skips_hole() {
        let config = ReceiverConfig {
            delay: Duration::from_millis(30),
            ..quiet()
        };
        let h = harness(Codec::Pcmu, config);
        h.receiver.insert_packet(packet(1, 1, false, &[1])).unwrap();
        h.receiver.insert_packet(packet(3, 3, false, &[3])).unwrap();
        assert_eq!(h.frames.try_iter().count(), 1);

        thread::sleep(Duration::from_millis(50));
        h.receiver.poll();

        let late: Vec<u32> = h.frames.try_iter().map(|f| f.pts).collect();
        assert_eq!(late, vec![3]);
        assert_eq!(h.receiver.stats().frames_dropped, 1);
    }

    #[test]
    fn test_video_waits_for_keyframe() {
        let h = harness(Codec::H264, quiet());
        assert!(h.receiver.waiting_for_keyframe());

        // Non-IDR slice is discarded while waiting
        h.receiver.insert_packet(packet(1, 0, true, &[0x41, 1])).unwrap();
        assert_eq!(h.frames.try_iter().count(), 0);
        assert_eq!(h.receiver.stats().frames_dropped, 1);

        h.receiver.insert_packet(packet(2, 3000, true, &[0x65, 2])).unwrap();
        assert!(!h.receiver.waiting_for_keyframe());
        h.receiver.insert_packet(packet(3, 6000, true, &[0x41, 3])).unwrap();

        let frames: Vec<Frame> = h.frames.try_iter().collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0].data[..], &[0, 0, 0, 1, 0x65, 2]);
        assert_eq!(frames[1].pts, 6000);
    }

    #[test]
    fn test_video_frame_needs_marker() {
        let h = harness(Codec::H264, quiet());
        h.receiver.insert_packet(packet(5, 90, false, &[0x7C, 0x85, 1])).unwrap();
        h.receiver.insert_packet(packet(6, 90, false, &[0x7C, 0x05, 2])).unwrap();
        assert_eq!(h.frames.try_iter().count(), 0);

        h.receiver.insert_packet(packet(7, 90, true, &[0x7C, 0x45, 3])).unwrap();
        let frames: Vec<Frame> = h.frames.try_iter().collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].data[..], &[0, 0, 0, 1, 0x65, 1, 2, 3]);
        assert_eq!(h.receiver.cursor().0, SeqNumber::new(8));
    }

    #[test]
    fn test_video_timeout_drops_frame_once() {
        let config = ReceiverConfig {
            delay: Duration::from_millis(30),
            ..quiet()
        };
        let h = harness(Codec::H264, config);
        h.receiver.insert_packet(packet(1, 0, true, &[0x65, 1])).unwrap();

        // Frame at ts 3000 loses its middle packet
        h.receiver.insert_packet(packet(2, 3000, false, &[0x7C, 0x81, 1])).unwrap();
        h.receiver.insert_packet(packet(4, 3000, true, &[0x7C, 0x41, 3])).unwrap();
        h.receiver.insert_packet(packet(5, 6000, true, &[0x65, 9])).unwrap();

        thread::sleep(Duration::from_millis(50));
        h.receiver.poll();

        let pts: Vec<u32> = h.frames.try_iter().map(|f| f.pts).collect();
        assert_eq!(pts, vec![0, 6000]);
        assert_eq!(h.receiver.stats().frames_dropped, 1);
        // The dropped fragments carried NRI 3, so the IDR after them reopened decoding
        assert!(!h.receiver.waiting_for_keyframe());
    }

    #[test]
    fn test_window_exhaustion_skips_ahead() {
        let config = ReceiverConfig {
            capacity: 16,
            ..quiet()
        };
        let h = harness(Codec::Pcmu, config);
        h.receiver.insert_packet(packet(0, 0, false, &[0])).unwrap();
        h.receiver.insert_packet(packet(2, 0, false, &[0])).unwrap();
        h.receiver.insert_packet(packet(40, 0, false, &[0])).unwrap();

        let (begin, end) = h.receiver.cursor();
        assert_eq!(end, SeqNumber::new(40));
        assert!(begin.is_ahead_of(end));
        // seq 40 was delivered once the window collapsed onto it
        assert_eq!(h.frames.try_iter().count(), 2);
        assert_eq!(h.receiver.stats().frames_dropped, 39);
        // Holes the window skipped over are no longer requested
        assert!(h.receiver.pending_nacks().is_empty());
    }

    #[test]
    fn test_odd_capacity_across_sequence_wrap() {
        let config = ReceiverConfig {
            capacity: 1000,
            ..quiet()
        };
        let h = harness(Codec::Pcmu, config);
        for seq in [64_999u16, 65_001, 1, 65_000] {
            h.receiver.insert_packet(packet(seq, seq as u32, false, &[1])).unwrap();
        }

        let pts: Vec<u32> = h.frames.try_iter().map(|f| f.pts).collect();
        assert_eq!(pts, vec![64_999, 65_000, 65_001]);
        assert_eq!(h.receiver.cursor(), (SeqNumber::new(65_002), SeqNumber::new(1)));
    }

    #[test]
    fn test_nack_thread_coalesces() {
        let config = ReceiverConfig {
            max_nack_retries: Some(1),
            ..Default::default()
        };
        let h = harness(Codec::Pcmu, config);
        h.receiver.insert_packet(packet(100, 0, false, &[0])).unwrap();
        h.receiver.insert_packet(packet(104, 0, false, &[0])).unwrap();

        let request = h.nacks.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(request.pid, SeqNumber::new(101));
        assert_eq!(request.blp, 0b11);

        // A single retry is allowed, so the table drains
        thread::sleep(Duration::from_millis(50));
        assert!(h.receiver.pending_nacks().is_empty());
        assert_eq!(h.receiver.stats().nacks, 1);
    }

    #[test]
    fn test_keyframe_request_while_waiting() {
        let config = ReceiverConfig {
            keyframe_interval: Duration::from_millis(20),
            nack_idle_poll: Duration::from_millis(10),
            ..Default::default()
        };
        let h = harness(Codec::Vp8, config);
        let ssrc = h.keyframes.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(ssrc, 0xBEEF);
    }

    #[test]
    fn test_reports() {
        let h = harness(Codec::Pcmu, quiet());
        for seq in [1u16, 2, 4] {
            h.receiver.insert_packet(packet(seq, 0, false, &[0; 20])).unwrap();
        }

        let sr = SenderReport {
            ssrc: 0xBEEF,
            ntp: NtpTime {
                seconds: 10,
                fraction: 0,
            },
            packet_count: 4,
            octet_count: 80,
            ..Default::default()
        };
        h.receiver.update_from_sender_report(&sr, Timestamp::now());

        let block = h.receiver.prepare_receiver_report(Timestamp::now());
        assert_eq!(block.ssrc, 0xBEEF);
        assert_eq!(block.highest_seq, 4);
        assert_eq!(block.cumulative_lost, 1);
        assert_eq!(block.fraction_lost, 64);
        assert_eq!(block.last_sr, 10 << 16);

        let stats = h.receiver.stats();
        assert_eq!(stats.remote_packets_sent, 4);
        assert_eq!(stats.remote_bytes_sent_period, 80);
        assert_eq!(stats.packets_received_period, 0);
        assert_eq!(stats.fraction_lost, 64);
        assert_eq!(stats.lost, 1);
    }

    #[test]
    fn test_pli_forces_reset() {
        let h = harness(Codec::Pcmu, quiet());
        h.receiver.insert_packet(packet(1, 0, false, &[0])).unwrap();
        h.receiver.insert_packet(packet(4, 0, false, &[0])).unwrap();
        assert_eq!(h.receiver.pending_nacks().len(), 2);
        assert_eq!(h.receiver.record_pli(), 1);

        h.receiver.insert_packet(packet(500, 0, false, &[0])).unwrap();
        assert!(h.receiver.pending_nacks().is_empty());
        assert_eq!(h.receiver.cursor(), (SeqNumber::new(501), SeqNumber::new(500)));
        assert_eq!(h.receiver.stats().plis, 1);
    }
}
