//! Media format descriptors and reconstructed frames

use bytes::Bytes;
use std::fmt;

/// Kind of media carried by a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Codecs with a packetization mode in this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// G.711 A-law
    Pcma,
    /// G.711 mu-law
    Pcmu,
    G722,
    Opus,
    /// AAC in RFC 3640 AAC-hbr mode
    Mpeg4Generic,
    /// AAC in RFC 3016 LATM mode
    Mp4aLatm,
    H264,
    Vp8,
    /// Unknown audio codec, carried with the generic audio packetization
    Other,
}

impl Codec {
    pub fn kind(self) -> MediaKind {
        match self {
            Codec::H264 | Codec::Vp8 => MediaKind::Video,
            _ => MediaKind::Audio,
        }
    }

    /// Encoding name as used in an `rtpmap` attribute
    pub fn encoding_name(self) -> &'static str {
        match self {
            Codec::Pcma => "PCMA",
            Codec::Pcmu => "PCMU",
            Codec::G722 => "G722",
            Codec::Opus => "opus",
            Codec::Mpeg4Generic => "mpeg4-generic",
            Codec::Mp4aLatm => "MP4A-LATM",
            Codec::H264 => "H264",
            Codec::Vp8 => "VP8",
            Codec::Other => "unknown",
        }
    }

    /// Look up a codec by `rtpmap` encoding name (case-insensitive)
    pub fn from_encoding_name(name: &str) -> Codec {
        match name.to_ascii_lowercase().as_str() {
            "pcma" => Codec::Pcma,
            "pcmu" => Codec::Pcmu,
            "g722" => Codec::G722,
            "opus" => Codec::Opus,
            "mpeg4-generic" => Codec::Mpeg4Generic,
            "mp4a-latm" => Codec::Mp4aLatm,
            "h264" => Codec::H264,
            "vp8" => Codec::Vp8,
            _ => Codec::Other,
        }
    }

    /// Usual media clock rate for the codec
    pub fn default_clock_rate(self) -> u32 {
        match self {
            Codec::Pcma | Codec::Pcmu | Codec::G722 | Codec::Other => 8_000,
            Codec::Opus => 48_000,
            Codec::Mpeg4Generic | Codec::Mp4aLatm => 44_100,
            Codec::H264 | Codec::Vp8 => 90_000,
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encoding_name())
    }
}

/// Negotiated format of one stream; immutable once constructed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Format {
    pub codec: Codec,
    pub payload_type: u8,
    /// Media clock rate in Hz
    pub clock_rate: u32,
    pub channels: u8,
}

impl Format {
    pub fn new(codec: Codec, payload_type: u8, clock_rate: u32, channels: u8) -> Self {
        Format {
            codec,
            payload_type: payload_type & 0x7F,
            clock_rate: clock_rate.max(1),
            channels,
        }
    }

    /// Format with the codec's usual clock rate and a single channel
    pub fn with_defaults(codec: Codec, payload_type: u8) -> Self {
        Format::new(codec, payload_type, codec.default_clock_rate(), 1)
    }

    #[inline]
    pub fn kind(&self) -> MediaKind {
        self.codec.kind()
    }
}

/// One reconstructed access unit handed to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub codec: Codec,
    pub kind: MediaKind,
    /// Presentation timestamp in clock-rate units
    pub pts: u32,
    /// Decode timestamp; equal to `pts` for the supported codecs
    pub dts: u32,
    pub data: Bytes,
}

impl Frame {
    pub fn new(codec: Codec, pts: u32, data: Bytes) -> Self {
        Frame {
            codec,
            kind: codec.kind(),
            pts,
            dts: pts,
            data,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
