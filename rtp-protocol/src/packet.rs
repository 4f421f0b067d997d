//! RTP Packet Structures and Serialization
//!
//! An RTP packet is a 12-byte fixed header, an optional CSRC list and header
//! extension, and the payload (RFC 3550 §5.1). Padding is accepted on parse and
//! stripped; packets built here are never padded.

use crate::sequence::SeqNumber;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Size of the fixed RTP header in bytes
pub const HEADER_SIZE: usize = 12;

/// Largest payload a sender puts in one packet
pub const MAX_PAYLOAD_SIZE: usize = 1200;

/// Slots in the sender history and receiver reorder rings
pub const PACKET_BUFFER_SIZE: usize = 512;

/// The only RTP version in use
pub const RTP_VERSION: u8 = 2;

/// At most 15 contributing sources fit in the CC field
pub const MAX_CSRC_COUNT: usize = 15;

const PADDING_FLAG: u8 = 0x20;
const EXTENSION_FLAG: u8 = 0x10;
const CSRC_COUNT_MASK: u8 = 0x0F;
const MARKER_FLAG: u8 = 0x80;
const PAYLOAD_TYPE_MASK: u8 = 0x7F;

/// Packet parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Insufficient data: expected at least {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Unsupported RTP version {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid padding length {padding} with {available} bytes after the header")]
    InvalidPadding { padding: usize, available: usize },
}

/// RTP header extension (RFC 3550 §5.3.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderExtension {
    /// Profile-defined identifier
    pub profile: u16,
    /// Extension body; padded with zeros to a 32-bit boundary on the wire
    pub data: Bytes,
}

/// RTP data packet
#[derive(Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// Payload type (7 bits)
    pub payload_type: u8,
    /// Marker bit; for video, set on the last packet of an access unit
    pub marker: bool,
    pub seq: SeqNumber,
    /// Media timestamp in clock-rate units
    pub timestamp: u32,
    pub ssrc: u32,
    /// Contributing sources; only the first 15 are serialized
    pub csrc: Vec<u32>,
    pub extension: Option<HeaderExtension>,
    pub payload: Bytes,
}

impl RtpPacket {
    /// Create a packet header with an empty payload
    pub fn new(payload_type: u8, ssrc: u32, seq: SeqNumber, timestamp: u32) -> Self {
        RtpPacket {
            payload_type: payload_type & PAYLOAD_TYPE_MASK,
            marker: false,
            seq,
            timestamp,
            ssrc,
            csrc: Vec::new(),
            extension: None,
            payload: Bytes::new(),
        }
    }

    /// Copy `data` in as the payload
    pub fn set_payload(&mut self, data: &[u8]) {
        self.payload = Bytes::copy_from_slice(data);
    }

    pub fn clear_payload(&mut self) {
        self.payload = Bytes::new();
    }

    /// Header length including CSRCs and extension
    pub fn header_size(&self) -> usize {
        let csrc = self.csrc.len().min(MAX_CSRC_COUNT) * 4;
        let ext = self
            .extension
            .as_ref()
            .map(|ext| 4 + padded_len(ext.data.len()))
            .unwrap_or(0);
        HEADER_SIZE + csrc + ext
    }

    #[inline]
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// Total size of the serialized packet
    pub fn size(&self) -> usize {
        self.header_size() + self.payload.len()
    }

    /// Serialize into `buf` (network byte order)
    pub fn serialize(&self, buf: &mut BytesMut) {
        let csrc_count = self.csrc.len().min(MAX_CSRC_COUNT);

        let mut b0 = RTP_VERSION << 6 | csrc_count as u8;
        if self.extension.is_some() {
            b0 |= EXTENSION_FLAG;
        }
        let mut b1 = self.payload_type & PAYLOAD_TYPE_MASK;
        if self.marker {
            b1 |= MARKER_FLAG;
        }

        buf.reserve(self.size());
        buf.put_u8(b0);
        buf.put_u8(b1);
        buf.put_u16(self.seq.as_raw());
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        for csrc in &self.csrc[..csrc_count] {
            buf.put_u32(*csrc);
        }
        if let Some(ext) = &self.extension {
            let len = padded_len(ext.data.len());
            buf.put_u16(ext.profile);
            buf.put_u16((len / 4) as u16);
            buf.put_slice(&ext.data);
            buf.put_bytes(0, len - ext.data.len());
        }
        buf.put_slice(&self.payload);
    }

    /// Serialize the packet to bytes
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());
        self.serialize(&mut buf);
        buf
    }

    /// Parse a packet from bytes
    ///
    /// The payload is copied; `bytes` is not retained.
    pub fn parse(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < HEADER_SIZE {
            return Err(PacketError::InsufficientData {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = bytes;
        let b0 = buf.get_u8();
        let version = b0 >> 6;
        if version != RTP_VERSION {
            return Err(PacketError::UnsupportedVersion(version));
        }
        let b1 = buf.get_u8();
        let seq = SeqNumber::new(buf.get_u16());
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        let csrc_count = (b0 & CSRC_COUNT_MASK) as usize;
        ensure_remaining(bytes, buf, csrc_count * 4)?;
        let csrc = (0..csrc_count).map(|_| buf.get_u32()).collect();

        let extension = if b0 & EXTENSION_FLAG != 0 {
            ensure_remaining(bytes, buf, 4)?;
            let profile = buf.get_u16();
            let len = buf.get_u16() as usize * 4;
            ensure_remaining(bytes, buf, len)?;
            let data = Bytes::copy_from_slice(&buf[..len]);
            buf.advance(len);
            Some(HeaderExtension { profile, data })
        } else {
            None
        };

        let mut payload = buf;
        if b0 & PADDING_FLAG != 0 {
            let padding = payload.last().copied().unwrap_or(0) as usize;
            if padding == 0 || padding > payload.len() {
                return Err(PacketError::InvalidPadding {
                    padding,
                    available: payload.len(),
                });
            }
            payload = &payload[..payload.len() - padding];
        }

        Ok(RtpPacket {
            payload_type: b1 & PAYLOAD_TYPE_MASK,
            marker: b1 & MARKER_FLAG != 0,
            seq,
            timestamp,
            ssrc,
            csrc,
            extension,
            payload: Bytes::copy_from_slice(payload),
        })
    }
}

impl fmt::Debug for RtpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtpPacket")
            .field("pt", &self.payload_type)
            .field("marker", &self.marker)
            .field("seq", &self.seq)
            .field("ts", &self.timestamp)
            .field("ssrc", &format_args!("{:#010X}", self.ssrc))
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

#[inline]
fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

fn ensure_remaining(all: &[u8], rest: &[u8], needed: usize) -> Result<(), PacketError> {
    if rest.len() < needed {
        let consumed = all.len() - rest.len();
        return Err(PacketError::InsufficientData {
            expected: consumed + needed,
            actual: all.len(),
        });
    }
    Ok(())
}
