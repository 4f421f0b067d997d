//! Media stream
//!
//! A [`MediaStream`] owns the senders and receivers of one media session,
//! keyed by SSRC. It wires their events to a [`Transport`], routes incoming
//! RTCP to the right sender or receiver, and builds the periodic
//! SR/RR + SDES compound.

use crate::transport::{Transport, TransportError};
use bytes::Bytes;
use parking_lot::RwLock;
use rtp_io::{NtpTime, Timestamp};
use rtp_protocol::events::{ReceiverEvents, SenderEvents, Subscribers};
use rtp_protocol::nack::NackRequest;
use rtp_protocol::rtcp::{
    self, FirEntry, FullIntraRequest, Goodbye, Nack, PictureLossIndication, ReceiverReport,
    RtcpError, RtcpPacket, SdesChunk, MAX_COUNT,
};
use rtp_protocol::{
    Format, Frame, InsertOutcome, Receiver, ReceiverConfig, ReceiverError, ReceiverStats,
    ReportBlock, RtpPacket, SendError, Sender, SenderStats,
};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Stream errors
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("No sender with SSRC {0:#010X}")]
    UnknownSender(u32),

    #[error("No receiver for SSRC {0:#010X}")]
    UnknownReceiver(u32),

    #[error("SSRC {0:#010X} already in use")]
    DuplicateSsrc(u32),

    #[error("Send error: {0}")]
    Send(#[from] SendError),

    #[error("Receive error: {0}")]
    Receive(#[from] ReceiverError),

    #[error("RTCP error: {0}")]
    Rtcp(#[from] RtcpError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// How a key frame is requested from a remote sender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyframeRequestKind {
    /// Picture loss indication
    Pli,
    /// Full intra request
    Fir,
}

/// Feedback messages the peer accepts for a payload type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackCapabilities {
    pub nack: bool,
    pub pli: bool,
    pub fir: bool,
}

impl Default for FeedbackCapabilities {
    fn default() -> Self {
        FeedbackCapabilities {
            nack: true,
            pli: true,
            fir: false,
        }
    }
}

impl FeedbackCapabilities {
    /// Preferred key frame request; PLI unless only FIR is offered
    pub fn keyframe_request(&self) -> KeyframeRequestKind {
        if !self.pli && self.fir {
            KeyframeRequestKind::Fir
        } else {
            KeyframeRequestKind::Pli
        }
    }
}

/// Handler for stream-level events
pub trait StreamEvents: Send + Sync {
    /// A receiver reconstructed a frame
    fn on_frame(&self, _ssrc: u32, _format: &Format, _frame: &Frame) {}

    /// The peer asked one of our senders for a key frame
    fn on_keyframe_required(&self, _ssrc: u32, _kind: KeyframeRequestKind) {}

    /// A remote source left the session
    fn on_bye(&self, _ssrc: u32, _reason: Option<&str>) {}
}

struct StreamInner {
    local_ssrc: u32,
    cname: String,
    transport: Arc<dyn Transport>,
    senders: RwLock<HashMap<u32, Arc<Sender>>>,
    receivers: RwLock<HashMap<u32, Arc<Receiver>>>,
    feedback: RwLock<HashMap<u8, FeedbackCapabilities>>,
    subscribers: Subscribers<dyn StreamEvents>,
}

impl StreamInner {
    fn capabilities(&self, payload_type: u8) -> FeedbackCapabilities {
        self.feedback
            .read()
            .get(&payload_type)
            .copied()
            .unwrap_or_default()
    }

    fn send_rtcp(&self, packets: &[RtcpPacket]) -> Result<(), StreamError> {
        let data = rtcp::serialize_compound(packets);
        self.transport.send_rtcp(data)?;
        Ok(())
    }

    fn send_nack(&self, media_ssrc: u32, format: &Format, request: NackRequest) {
        if !self.capabilities(format.payload_type).nack {
            return;
        }
        let nack = RtcpPacket::Nack(Nack {
            sender_ssrc: self.local_ssrc,
            media_ssrc,
            requests: vec![request],
        });
        if let Err(e) = self.send_rtcp(&[nack]) {
            warn!(ssrc = format_args!("{:#010X}", media_ssrc), error = %e, "Failed to send NACK");
        }
    }

    fn request_keyframe(&self, remote_ssrc: u32) -> Result<KeyframeRequestKind, StreamError> {
        // Counters only; the lock is never held across a callback
        let (kind, packet) = {
            let receivers = self.receivers.read();
            let receiver = receivers
                .get(&remote_ssrc)
                .ok_or(StreamError::UnknownReceiver(remote_ssrc))?;
            let kind = self
                .capabilities(receiver.format().payload_type)
                .keyframe_request();
            let packet = match kind {
                KeyframeRequestKind::Pli => {
                    receiver.record_pli();
                    RtcpPacket::PictureLossIndication(PictureLossIndication {
                        sender_ssrc: self.local_ssrc,
                        media_ssrc: remote_ssrc,
                    })
                }
                KeyframeRequestKind::Fir => {
                    let count = receiver.record_fir();
                    RtcpPacket::FullIntraRequest(FullIntraRequest {
                        sender_ssrc: self.local_ssrc,
                        entries: vec![FirEntry {
                            ssrc: remote_ssrc,
                            seq_nr: count as u8,
                        }],
                    })
                }
            };
            (kind, packet)
        };

        debug!(ssrc = format_args!("{:#010X}", remote_ssrc), ?kind, "Requesting key frame");
        self.send_rtcp(&[packet])?;
        Ok(kind)
    }
}

/// Forwards packets from a sender to the transport
struct SenderBridge {
    transport: Arc<dyn Transport>,
}

impl SenderEvents for SenderBridge {
    fn on_outbound_packet(&self, ssrc: u32, packet: &RtpPacket, wire: &Bytes) {
        if let Err(e) = self.transport.send_rtp(wire.clone()) {
            warn!(
                ssrc = format_args!("{:#010X}", ssrc),
                seq = %packet.seq,
                error = %e,
                "Failed to send RTP packet"
            );
        }
    }
}

/// Routes receiver events back into the stream without keeping it alive
struct ReceiverBridge {
    stream: Weak<StreamInner>,
}

impl ReceiverEvents for ReceiverBridge {
    fn on_frame(&self, ssrc: u32, format: &Format, frame: &Frame) {
        if let Some(stream) = self.stream.upgrade() {
            stream
                .subscribers
                .for_each(|h| h.on_frame(ssrc, format, frame));
        }
    }

    fn on_nack(&self, ssrc: u32, format: &Format, request: NackRequest) {
        if let Some(stream) = self.stream.upgrade() {
            stream.send_nack(ssrc, format, request);
        }
    }

    fn on_keyframe_request(&self, ssrc: u32, _format: &Format) {
        if let Some(stream) = self.stream.upgrade() {
            if let Err(e) = stream.request_keyframe(ssrc) {
                warn!(ssrc = format_args!("{:#010X}", ssrc), error = %e, "Key frame request failed");
            }
        }
    }
}

/// One media session: local senders, remote receivers and their RTCP loop
pub struct MediaStream {
    inner: Arc<StreamInner>,
}

impl MediaStream {
    /// Create a stream with a random local SSRC
    pub fn new(cname: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self::with_ssrc(rand::random(), cname, transport)
    }

    pub fn with_ssrc(local_ssrc: u32, cname: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        MediaStream {
            inner: Arc::new(StreamInner {
                local_ssrc,
                cname: cname.into(),
                transport,
                senders: RwLock::new(HashMap::new()),
                receivers: RwLock::new(HashMap::new()),
                feedback: RwLock::new(HashMap::new()),
                subscribers: Subscribers::new(),
            }),
        }
    }

    #[inline]
    pub fn local_ssrc(&self) -> u32 {
        self.inner.local_ssrc
    }

    #[inline]
    pub fn cname(&self) -> &str {
        &self.inner.cname
    }

    /// Register a handler for frames and peer requests
    pub fn subscribe(&self, handler: Arc<dyn StreamEvents>) {
        self.inner.subscribers.subscribe(handler);
    }

    /// Declare which feedback messages the peer accepts for `payload_type`
    pub fn set_feedback(&self, payload_type: u8, capabilities: FeedbackCapabilities) {
        self.inner.feedback.write().insert(payload_type, capabilities);
    }

    /// Add a sender with a random SSRC, returning the SSRC
    pub fn add_sender(&self, format: Format) -> Result<u32, StreamError> {
        let mut senders = self.inner.senders.write();
        let ssrc = loop {
            let candidate: u32 = rand::random();
            if candidate != self.inner.local_ssrc && !senders.contains_key(&candidate) {
                break candidate;
            }
        };
        senders.insert(ssrc, self.make_sender(Sender::new(ssrc, format)));
        Ok(ssrc)
    }

    /// Add a sender with a chosen SSRC
    pub fn add_sender_with(&self, sender: Sender) -> Result<u32, StreamError> {
        let ssrc = sender.ssrc();
        let mut senders = self.inner.senders.write();
        if senders.contains_key(&ssrc) {
            return Err(StreamError::DuplicateSsrc(ssrc));
        }
        senders.insert(ssrc, self.make_sender(sender));
        Ok(ssrc)
    }

    fn make_sender(&self, sender: Sender) -> Arc<Sender> {
        sender.subscribe(Arc::new(SenderBridge {
            transport: Arc::clone(&self.inner.transport),
        }));
        debug!(ssrc = format_args!("{:#010X}", sender.ssrc()), "Added sender");
        Arc::new(sender)
    }

    /// Start receiving from `remote_ssrc`
    pub fn add_receiver(
        &self,
        remote_ssrc: u32,
        format: Format,
        config: ReceiverConfig,
    ) -> Result<(), StreamError> {
        let mut receivers = self.inner.receivers.write();
        if receivers.contains_key(&remote_ssrc) {
            return Err(StreamError::DuplicateSsrc(remote_ssrc));
        }

        let receiver = Receiver::with_config(remote_ssrc, format, config);
        receiver.subscribe(Arc::new(ReceiverBridge {
            stream: Arc::downgrade(&self.inner),
        }));
        receivers.insert(remote_ssrc, Arc::new(receiver));
        debug!(ssrc = format_args!("{:#010X}", remote_ssrc), "Added receiver");
        Ok(())
    }

    pub fn remove_sender(&self, ssrc: u32) -> bool {
        let removed = self.inner.senders.write().remove(&ssrc);
        removed.is_some()
    }

    /// Stop receiving from `ssrc`
    pub fn remove_receiver(&self, ssrc: u32) -> bool {
        // Dropped outside the lock: the drop joins the NACK thread, which
        // may be waiting on this map
        let removed = self.inner.receivers.write().remove(&ssrc);
        removed.is_some()
    }

    fn sender(&self, ssrc: u32) -> Option<Arc<Sender>> {
        self.inner.senders.read().get(&ssrc).cloned()
    }

    fn receiver(&self, ssrc: u32) -> Option<Arc<Receiver>> {
        self.inner.receivers.read().get(&ssrc).cloned()
    }

    /// Packetize and send one frame on sender `ssrc`
    pub fn send_frame(&self, ssrc: u32, frame: &[u8], duration: u32) -> Result<usize, StreamError> {
        let sender = self.sender(ssrc).ok_or(StreamError::UnknownSender(ssrc))?;
        Ok(sender.send_frame(frame, duration)?)
    }

    /// Feed one received RTP datagram
    pub fn receive_rtp(&self, data: &[u8]) -> Result<InsertOutcome, StreamError> {
        let packet = RtpPacket::parse(data).map_err(ReceiverError::from)?;
        let receiver = self
            .receiver(packet.ssrc)
            .ok_or(StreamError::UnknownReceiver(packet.ssrc))?;
        Ok(receiver.insert_packet(packet)?)
    }

    /// Feed one received RTCP compound datagram
    pub fn receive_rtcp(&self, data: &[u8]) -> Result<(), StreamError> {
        for packet in rtcp::parse_compound(data)? {
            self.handle_rtcp(packet);
        }
        Ok(())
    }

    fn handle_rtcp(&self, packet: RtcpPacket) {
        match packet {
            RtcpPacket::SenderReport(sr) => {
                if let Some(receiver) = self.receiver(sr.ssrc) {
                    receiver.update_from_sender_report(&sr, Timestamp::now());
                }
                self.apply_report_blocks(&sr.reports);
            }
            RtcpPacket::ReceiverReport(rr) => self.apply_report_blocks(&rr.reports),
            RtcpPacket::Nack(nack) => match self.sender(nack.media_ssrc) {
                Some(sender) => {
                    let resent: usize = nack.requests.iter().map(|r| sender.retransmit(r)).sum();
                    trace!(
                        ssrc = format_args!("{:#010X}", nack.media_ssrc),
                        resent,
                        "Handled NACK"
                    );
                }
                None => debug!(ssrc = format_args!("{:#010X}", nack.media_ssrc), "NACK for unknown sender"),
            },
            RtcpPacket::PictureLossIndication(pli) => {
                if let Some(sender) = self.sender(pli.media_ssrc) {
                    sender.record_pli();
                    self.inner.subscribers.for_each(|h| {
                        h.on_keyframe_required(pli.media_ssrc, KeyframeRequestKind::Pli)
                    });
                }
            }
            RtcpPacket::FullIntraRequest(fir) => {
                for entry in &fir.entries {
                    if let Some(sender) = self.sender(entry.ssrc) {
                        sender.record_fir();
                        self.inner.subscribers.for_each(|h| {
                            h.on_keyframe_required(entry.ssrc, KeyframeRequestKind::Fir)
                        });
                    }
                }
            }
            RtcpPacket::Goodbye(bye) => {
                for ssrc in &bye.sources {
                    debug!(ssrc = format_args!("{:#010X}", ssrc), reason = ?bye.reason, "BYE");
                    self.inner
                        .subscribers
                        .for_each(|h| h.on_bye(*ssrc, bye.reason.as_deref()));
                }
            }
            RtcpPacket::SourceDescription(chunks) => {
                for chunk in &chunks {
                    trace!(ssrc = format_args!("{:#010X}", chunk.ssrc), cname = %chunk.cname, "SDES");
                }
            }
            RtcpPacket::Unknown { packet_type, .. } => {
                trace!(packet_type, "Ignoring RTCP packet");
            }
        }
    }

    fn apply_report_blocks(&self, blocks: &[ReportBlock]) {
        let arrival = NtpTime::now();
        for block in blocks {
            if let Some(sender) = self.sender(block.ssrc) {
                sender.update_from_receiver_report(block, arrival);
            }
        }
    }

    /// Build the periodic report compound
    ///
    /// Each sender contributes an SR carrying the reception report blocks;
    /// with no senders each receiver gets its own RR from the local SSRC.
    /// An SDES CNAME chunk follows.
    pub fn build_report(&self, now: NtpTime) -> Vec<RtcpPacket> {
        let monotonic = Timestamp::now();
        let mut blocks: Vec<ReportBlock> = {
            let receivers = self.inner.receivers.read();
            receivers
                .values()
                .map(|receiver| receiver.prepare_receiver_report(monotonic))
                .collect()
        };

        let senders: Vec<Arc<Sender>> = self.inner.senders.read().values().cloned().collect();
        let mut packets = Vec::with_capacity(senders.len().max(blocks.len()) + 1);
        let mut chunks = Vec::new();

        if senders.is_empty() {
            packets.extend(blocks.into_iter().map(|block| {
                RtcpPacket::ReceiverReport(ReceiverReport {
                    ssrc: self.inner.local_ssrc,
                    reports: vec![block],
                })
            }));
            chunks.push(SdesChunk {
                ssrc: self.inner.local_ssrc,
                cname: self.inner.cname.clone(),
            });
        } else {
            blocks.truncate(MAX_COUNT);
            for sender in &senders {
                let mut sr = sender.prepare_sender_report(now);
                sr.reports = blocks.clone();
                packets.push(RtcpPacket::SenderReport(sr));
                chunks.push(SdesChunk {
                    ssrc: sender.ssrc(),
                    cname: self.inner.cname.clone(),
                });
            }
        }

        packets.push(RtcpPacket::SourceDescription(chunks));
        packets
    }

    /// Build and transmit the report compound
    pub fn send_report(&self) -> Result<(), StreamError> {
        let packets = self.build_report(NtpTime::now());
        self.inner.send_rtcp(&packets)
    }

    /// Ask the remote sender `remote_ssrc` for a key frame
    pub fn request_keyframe(&self, remote_ssrc: u32) -> Result<KeyframeRequestKind, StreamError> {
        self.inner.request_keyframe(remote_ssrc)
    }

    /// Announce that our senders are leaving
    pub fn send_bye(&self, reason: Option<&str>) -> Result<(), StreamError> {
        let mut sources: Vec<u32> = self.inner.senders.read().keys().copied().collect();
        if sources.is_empty() {
            sources.push(self.inner.local_ssrc);
        }
        let bye = RtcpPacket::Goodbye(Goodbye {
            sources,
            reason: reason.map(str::to_owned),
        });
        self.inner.send_rtcp(&[bye])
    }

    /// Re-run reassembly on every receiver so reassembly timeouts fire
    pub fn poll(&self) {
        let receivers: Vec<Arc<Receiver>> = self.inner.receivers.read().values().cloned().collect();
        for receiver in receivers {
            receiver.poll();
        }
    }

    pub fn sender_stats(&self, ssrc: u32) -> Option<SenderStats> {
        self.sender(ssrc).map(|sender| sender.stats())
    }

    pub fn receiver_stats(&self, ssrc: u32) -> Option<ReceiverStats> {
        self.receiver(ssrc).map(|receiver| receiver.stats())
    }

    pub fn sender_ssrcs(&self) -> Vec<u32> {
        self.inner.senders.read().keys().copied().collect()
    }

    pub fn receiver_ssrcs(&self) -> Vec<u32> {
        self.inner.receivers.read().keys().copied().collect()
    }
}

impl Drop for MediaStream {
    fn drop(&mut self) {
        // Stop the NACK threads while this handle still owns the stream, so a
        // bridge callback never ends up releasing the last reference
        let receivers = std::mem::take(&mut *self.inner.receivers.write());
        drop(receivers);
    }
}
