//! RTCP Packet Structures and Serialization
//!
//! Wire formats for the control packets the report loop exchanges:
//! sender/receiver reports and SDES/BYE (RFC 3550 §6), generic NACK and PLI
//! (RFC 4585 §6.2.1, §6.3.1) and FIR (RFC 5104 §4.3.1). Packets are usually
//! sent as a compound: several packets back to back in one datagram.

use crate::nack::NackRequest;
use crate::sequence::SeqNumber;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rtp_io::NtpTime;
use thiserror::Error;

/// Size of the common RTCP header in bytes
pub const RTCP_HEADER_SIZE: usize = 4;

/// Size of one report block in bytes
pub const REPORT_BLOCK_SIZE: usize = 24;

/// At most 31 report blocks or sources fit in the count field
pub const MAX_COUNT: usize = 31;

const RTCP_VERSION: u8 = 2;
const PADDING_FLAG: u8 = 0x20;
const COUNT_MASK: u8 = 0x1F;

/// RTCP packet types
pub mod packet_type {
    pub const SENDER_REPORT: u8 = 200;
    pub const RECEIVER_REPORT: u8 = 201;
    pub const SOURCE_DESCRIPTION: u8 = 202;
    pub const GOODBYE: u8 = 203;
    pub const TRANSPORT_FEEDBACK: u8 = 205;
    pub const PAYLOAD_FEEDBACK: u8 = 206;
}

/// Feedback message types carried in the count field
pub mod feedback_format {
    /// Generic NACK (transport layer)
    pub const NACK: u8 = 1;
    /// Picture loss indication (payload specific)
    pub const PLI: u8 = 1;
    /// Full intra request (payload specific)
    pub const FIR: u8 = 4;
}

const SDES_END: u8 = 0;
const SDES_CNAME: u8 = 1;

/// RTCP parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RtcpError {
    #[error("Insufficient data: expected at least {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Unsupported RTCP version {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid length: packet claims {length} bytes, {available} available")]
    InvalidLength { length: usize, available: usize },
}

/// Reception statistics about one source (RFC 3550 §6.4.1)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportBlock {
    /// Source this block reports on
    pub ssrc: u32,
    /// Fraction lost since the previous report, in 1/256 units
    pub fraction_lost: u8,
    /// Cumulative packets lost (24-bit signed on the wire)
    pub cumulative_lost: i32,
    /// Extended highest sequence number received
    pub highest_seq: u32,
    /// Interarrival jitter in timestamp units
    pub jitter: u32,
    /// Middle 32 bits of the NTP time of the last SR received
    pub last_sr: u32,
    /// Delay since that SR, in 1/65536 seconds
    pub delay_since_last_sr: u32,
}

impl ReportBlock {
    fn write(&self, buf: &mut BytesMut) {
        let lost = self.cumulative_lost.clamp(-0x80_0000, 0x7F_FFFF) as u32 & 0x00FF_FFFF;
        buf.put_u32(self.ssrc);
        buf.put_u32((self.fraction_lost as u32) << 24 | lost);
        buf.put_u32(self.highest_seq);
        buf.put_u32(self.jitter);
        buf.put_u32(self.last_sr);
        buf.put_u32(self.delay_since_last_sr);
    }

    fn read(buf: &mut &[u8]) -> Result<Self, RtcpError> {
        ensure(buf, REPORT_BLOCK_SIZE)?;
        let ssrc = buf.get_u32();
        let word = buf.get_u32();
        let mut lost = (word & 0x00FF_FFFF) as i32;
        if lost & 0x80_0000 != 0 {
            lost -= 0x100_0000;
        }
        Ok(ReportBlock {
            ssrc,
            fraction_lost: (word >> 24) as u8,
            cumulative_lost: lost,
            highest_seq: buf.get_u32(),
            jitter: buf.get_u32(),
            last_sr: buf.get_u32(),
            delay_since_last_sr: buf.get_u32(),
        })
    }
}

/// Sender report (PT 200)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderReport {
    pub ssrc: u32,
    /// Wall-clock time when the report was generated
    pub ntp: NtpTime,
    /// Media timestamp corresponding to `ntp`
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
    pub reports: Vec<ReportBlock>,
}

/// Receiver report (PT 201)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverReport {
    pub ssrc: u32,
    pub reports: Vec<ReportBlock>,
}

/// Source description chunk carrying a canonical name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesChunk {
    pub ssrc: u32,
    pub cname: String,
}

/// Goodbye (PT 203)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Goodbye {
    pub sources: Vec<u32>,
    pub reason: Option<String>,
}

/// Generic NACK (PT 205, FMT 1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nack {
    pub sender_ssrc: u32,
    /// Source whose packets are missing
    pub media_ssrc: u32,
    pub requests: Vec<NackRequest>,
}

/// Picture loss indication (PT 206, FMT 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureLossIndication {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
}

/// One FIR request entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirEntry {
    /// Source asked to send a decoder refresh
    pub ssrc: u32,
    /// Command sequence number, incremented per new request
    pub seq_nr: u8,
}

/// Full intra request (PT 206, FMT 4)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullIntraRequest {
    pub sender_ssrc: u32,
    pub entries: Vec<FirEntry>,
}

/// A single packet of a compound RTCP datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport(SenderReport),
    ReceiverReport(ReceiverReport),
    SourceDescription(Vec<SdesChunk>),
    Goodbye(Goodbye),
    Nack(Nack),
    PictureLossIndication(PictureLossIndication),
    FullIntraRequest(FullIntraRequest),
    /// Packet type this crate does not interpret
    Unknown { packet_type: u8, count: u8, body: Bytes },
}

impl RtcpPacket {
    /// Append the wire form of this packet to `buf`
    pub fn serialize(&self, buf: &mut BytesMut) {
        match self {
            RtcpPacket::SenderReport(sr) => {
                let reports = &sr.reports[..sr.reports.len().min(MAX_COUNT)];
                write_packet(buf, reports.len() as u8, packet_type::SENDER_REPORT, |buf| {
                    buf.put_u32(sr.ssrc);
                    buf.put_u64(sr.ntp.as_u64());
                    buf.put_u32(sr.rtp_timestamp);
                    buf.put_u32(sr.packet_count);
                    buf.put_u32(sr.octet_count);
                    reports.iter().for_each(|block| block.write(buf));
                });
            }
            RtcpPacket::ReceiverReport(rr) => {
                let reports = &rr.reports[..rr.reports.len().min(MAX_COUNT)];
                write_packet(buf, reports.len() as u8, packet_type::RECEIVER_REPORT, |buf| {
                    buf.put_u32(rr.ssrc);
                    reports.iter().for_each(|block| block.write(buf));
                });
            }
            RtcpPacket::SourceDescription(chunks) => {
                let chunks = &chunks[..chunks.len().min(MAX_COUNT)];
                write_packet(buf, chunks.len() as u8, packet_type::SOURCE_DESCRIPTION, |buf| {
                    for chunk in chunks {
                        let cname = &chunk.cname.as_bytes()[..chunk.cname.len().min(255)];
                        buf.put_u32(chunk.ssrc);
                        buf.put_u8(SDES_CNAME);
                        buf.put_u8(cname.len() as u8);
                        buf.put_slice(cname);
                        // Item list terminator plus padding to the next word
                        let used = 4 + 2 + cname.len();
                        buf.put_bytes(SDES_END, 4 - used % 4);
                    }
                });
            }
            RtcpPacket::Goodbye(bye) => {
                let sources = &bye.sources[..bye.sources.len().min(MAX_COUNT)];
                write_packet(buf, sources.len() as u8, packet_type::GOODBYE, |buf| {
                    sources.iter().for_each(|ssrc| buf.put_u32(*ssrc));
                    if let Some(reason) = &bye.reason {
                        let reason = &reason.as_bytes()[..reason.len().min(255)];
                        buf.put_u8(reason.len() as u8);
                        buf.put_slice(reason);
                    }
                });
            }
            RtcpPacket::Nack(nack) => {
                write_packet(
                    buf,
                    feedback_format::NACK,
                    packet_type::TRANSPORT_FEEDBACK,
                    |buf| {
                        buf.put_u32(nack.sender_ssrc);
                        buf.put_u32(nack.media_ssrc);
                        for request in &nack.requests {
                            buf.put_u16(request.pid.as_raw());
                            buf.put_u16(request.blp);
                        }
                    },
                );
            }
            RtcpPacket::PictureLossIndication(pli) => {
                write_packet(buf, feedback_format::PLI, packet_type::PAYLOAD_FEEDBACK, |buf| {
                    buf.put_u32(pli.sender_ssrc);
                    buf.put_u32(pli.media_ssrc);
                });
            }
            RtcpPacket::FullIntraRequest(fir) => {
                write_packet(buf, feedback_format::FIR, packet_type::PAYLOAD_FEEDBACK, |buf| {
                    buf.put_u32(fir.sender_ssrc);
                    // Media source field is unused for FIR
                    buf.put_u32(0);
                    for entry in &fir.entries {
                        buf.put_u32(entry.ssrc);
                        buf.put_u8(entry.seq_nr);
                        buf.put_bytes(0, 3);
                    }
                });
            }
            RtcpPacket::Unknown {
                packet_type,
                count,
                body,
            } => {
                write_packet(buf, *count, *packet_type, |buf| buf.put_slice(body));
            }
        }
    }

    /// Serialize a single packet
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.serialize(&mut buf);
        buf.freeze()
    }
}

/// Serialize several packets into one compound datagram
pub fn serialize_compound(packets: &[RtcpPacket]) -> Bytes {
    let mut buf = BytesMut::new();
    for packet in packets {
        packet.serialize(&mut buf);
    }
    buf.freeze()
}

/// Split a compound datagram into its packets
pub fn parse_compound(bytes: &[u8]) -> Result<Vec<RtcpPacket>, RtcpError> {
    let mut packets = Vec::new();
    let mut rest = bytes;

    while !rest.is_empty() {
        if rest.len() < RTCP_HEADER_SIZE {
            return Err(RtcpError::InsufficientData {
                expected: RTCP_HEADER_SIZE,
                actual: rest.len(),
            });
        }

        let b0 = rest[0];
        let version = b0 >> 6;
        if version != RTCP_VERSION {
            return Err(RtcpError::UnsupportedVersion(version));
        }
        let count = b0 & COUNT_MASK;
        let pt = rest[1];
        let length = (u16::from_be_bytes([rest[2], rest[3]]) as usize + 1) * 4;
        if length > rest.len() {
            return Err(RtcpError::InvalidLength {
                length,
                available: rest.len(),
            });
        }

        let mut body = &rest[RTCP_HEADER_SIZE..length];
        if b0 & PADDING_FLAG != 0 {
            let padding = body.last().copied().unwrap_or(0) as usize;
            if padding == 0 || padding > body.len() {
                return Err(RtcpError::InvalidLength {
                    length: padding,
                    available: body.len(),
                });
            }
            body = &body[..body.len() - padding];
        }

        packets.push(parse_packet(pt, count, body)?);
        rest = &rest[length..];
    }

    Ok(packets)
}

fn parse_packet(pt: u8, count: u8, mut body: &[u8]) -> Result<RtcpPacket, RtcpError> {
    let buf = &mut body;
    let packet = match (pt, count) {
        (packet_type::SENDER_REPORT, _) => {
            ensure(buf, 24)?;
            let ssrc = buf.get_u32();
            let ntp = NtpTime::from_u64(buf.get_u64());
            let rtp_timestamp = buf.get_u32();
            let packet_count = buf.get_u32();
            let octet_count = buf.get_u32();
            let reports = read_blocks(buf, count)?;
            RtcpPacket::SenderReport(SenderReport {
                ssrc,
                ntp,
                rtp_timestamp,
                packet_count,
                octet_count,
                reports,
            })
        }
        (packet_type::RECEIVER_REPORT, _) => {
            ensure(buf, 4)?;
            let ssrc = buf.get_u32();
            let reports = read_blocks(buf, count)?;
            RtcpPacket::ReceiverReport(ReceiverReport { ssrc, reports })
        }
        (packet_type::SOURCE_DESCRIPTION, _) => {
            RtcpPacket::SourceDescription(read_sdes(buf, count)?)
        }
        (packet_type::GOODBYE, _) => {
            ensure(buf, count as usize * 4)?;
            let sources = (0..count).map(|_| buf.get_u32()).collect();
            let reason = if buf.has_remaining() {
                let len = buf.get_u8() as usize;
                ensure(buf, len)?;
                let text = String::from_utf8_lossy(&buf[..len]).into_owned();
                Some(text)
            } else {
                None
            };
            RtcpPacket::Goodbye(Goodbye { sources, reason })
        }
        (packet_type::TRANSPORT_FEEDBACK, feedback_format::NACK) => {
            ensure(buf, 8)?;
            let sender_ssrc = buf.get_u32();
            let media_ssrc = buf.get_u32();
            let mut requests = Vec::with_capacity(buf.len() / 4);
            while buf.remaining() >= 4 {
                let pid = SeqNumber::new(buf.get_u16());
                requests.push(NackRequest::new(pid, buf.get_u16()));
            }
            RtcpPacket::Nack(Nack {
                sender_ssrc,
                media_ssrc,
                requests,
            })
        }
        (packet_type::PAYLOAD_FEEDBACK, feedback_format::PLI) => {
            ensure(buf, 8)?;
            RtcpPacket::PictureLossIndication(PictureLossIndication {
                sender_ssrc: buf.get_u32(),
                media_ssrc: buf.get_u32(),
            })
        }
        (packet_type::PAYLOAD_FEEDBACK, feedback_format::FIR) => {
            ensure(buf, 8)?;
            let sender_ssrc = buf.get_u32();
            let _media_ssrc = buf.get_u32();
            let mut entries = Vec::with_capacity(buf.len() / 8);
            while buf.remaining() >= 8 {
                let ssrc = buf.get_u32();
                let seq_nr = buf.get_u8();
                buf.advance(3);
                entries.push(FirEntry { ssrc, seq_nr });
            }
            RtcpPacket::FullIntraRequest(FullIntraRequest {
                sender_ssrc,
                entries,
            })
        }
        _ => RtcpPacket::Unknown {
            packet_type: pt,
            count,
            body: Bytes::copy_from_slice(buf),
        },
    };
    Ok(packet)
}

fn read_blocks(buf: &mut &[u8], count: u8) -> Result<Vec<ReportBlock>, RtcpError> {
    (0..count).map(|_| ReportBlock::read(buf)).collect()
}

fn read_sdes(buf: &mut &[u8], count: u8) -> Result<Vec<SdesChunk>, RtcpError> {
    let mut chunks = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let chunk_start = buf.len();
        ensure(buf, 4)?;
        let ssrc = buf.get_u32();
        let mut cname = String::new();

        loop {
            ensure(buf, 1)?;
            let item = buf.get_u8();
            if item == SDES_END {
                // Skip padding up to the next 32-bit boundary of the chunk
                let used = chunk_start - buf.len();
                let pad = (4 - used % 4) % 4;
                ensure(buf, pad)?;
                buf.advance(pad);
                break;
            }
            ensure(buf, 1)?;
            let len = buf.get_u8() as usize;
            ensure(buf, len)?;
            if item == SDES_CNAME {
                cname = String::from_utf8_lossy(&buf[..len]).into_owned();
            }
            buf.advance(len);
        }

        chunks.push(SdesChunk { ssrc, cname });
    }
    Ok(chunks)
}

/// Write header, body and padding; the length field is patched afterwards
fn write_packet<F>(buf: &mut BytesMut, count: u8, packet_type: u8, body: F)
where
    F: FnOnce(&mut BytesMut),
{
    let start = buf.len();
    buf.put_u8(RTCP_VERSION << 6 | (count & COUNT_MASK));
    buf.put_u8(packet_type);
    buf.put_u16(0);

    body(buf);

    let unaligned = (buf.len() - start) % 4;
    if unaligned != 0 {
        buf.put_bytes(0, 4 - unaligned);
    }
    let words = ((buf.len() - start) / 4 - 1) as u16;
    buf[start + 2..start + 4].copy_from_slice(&words.to_be_bytes());
}

fn ensure(buf: &[u8], needed: usize) -> Result<(), RtcpError> {
    if buf.len() < needed {
        return Err(RtcpError::InsufficientData {
            expected: needed,
            actual: buf.len(),
        });
    }
    Ok(())
}
