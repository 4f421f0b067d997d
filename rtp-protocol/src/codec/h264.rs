//! H.264 NAL unit helpers (RFC 6184)

/// Annex-B start code prepended to every reconstructed NAL unit
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// NAL unit types relevant to packetization
pub mod nal_type {
    pub const SLICE: u8 = 1;
    pub const IDR: u8 = 5;
    pub const SEI: u8 = 6;
    pub const SPS: u8 = 7;
    pub const PPS: u8 = 8;
    pub const AUD: u8 = 9;
    /// Single-time aggregation packet
    pub const STAP_A: u8 = 24;
    /// Single-time aggregation packet with decoding order number
    pub const STAP_B: u8 = 25;
    /// Multi-time aggregation packet, 16-bit timestamp offsets
    pub const MTAP16: u8 = 26;
    /// Multi-time aggregation packet, 24-bit timestamp offsets
    pub const MTAP24: u8 = 27;
    /// Fragmentation unit
    pub const FU_A: u8 = 28;
    /// Fragmentation unit with decoding order number
    pub const FU_B: u8 = 29;
}

const FORBIDDEN_MASK: u8 = 0x80;
const NRI_MASK: u8 = 0x60;
const TYPE_MASK: u8 = 0x1F;

/// One-byte NAL unit header: F | NRI | Type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeader(pub u8);

impl NalHeader {
    pub fn new(forbidden: bool, nri: u8, nal_type: u8) -> Self {
        let mut b = (nri << 5) & NRI_MASK | nal_type & TYPE_MASK;
        if forbidden {
            b |= FORBIDDEN_MASK;
        }
        NalHeader(b)
    }

    /// Forbidden zero bit; set means the unit may contain errors
    #[inline]
    pub fn forbidden(self) -> bool {
        self.0 & FORBIDDEN_MASK != 0
    }

    /// Reference importance (0 = not used for reference)
    #[inline]
    pub fn nri(self) -> u8 {
        (self.0 & NRI_MASK) >> 5
    }

    #[inline]
    pub fn nal_type(self) -> u8 {
        self.0 & TYPE_MASK
    }

    /// F and NRI bits with the type cleared
    #[inline]
    pub fn flags(self) -> u8 {
        self.0 & (FORBIDDEN_MASK | NRI_MASK)
    }
}

/// FU header: S | E | R | Type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuHeader(pub u8);

impl FuHeader {
    pub fn new(start: bool, end: bool, nal_type: u8) -> Self {
        let mut b = nal_type & TYPE_MASK;
        if start {
            b |= 0x80;
        }
        if end {
            b |= 0x40;
        }
        FuHeader(b)
    }

    #[inline]
    pub fn start(self) -> bool {
        self.0 & 0x80 != 0
    }

    #[inline]
    pub fn end(self) -> bool {
        self.0 & 0x40 != 0
    }

    /// Type of the fragmented NAL unit
    #[inline]
    pub fn nal_type(self) -> u8 {
        self.0 & TYPE_MASK
    }
}

/// True for NAL types a decoder can start from (IDR, SPS, PPS)
#[inline]
pub fn is_keyframe_nal(ty: u8) -> bool {
    matches!(ty, nal_type::IDR | nal_type::SPS | nal_type::PPS)
}

/// True for coded slice NAL types
#[inline]
pub fn is_vcl_nal(ty: u8) -> bool {
    (nal_type::SLICE..=nal_type::IDR).contains(&ty)
}

/// Split an Annex-B byte stream into NAL units (start codes removed)
///
/// Accepts 3- and 4-byte start codes. Bytes before the first start code are
/// ignored; input without any start code is returned as a single unit.
pub fn split_annexb(data: &[u8]) -> Vec<&[u8]> {
    let mut bounds = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let code_start = if i > 0 && data[i - 1] == 0 { i - 1 } else { i };
            bounds.push((code_start, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    if bounds.is_empty() {
        return if data.is_empty() { Vec::new() } else { vec![data] };
    }

    bounds
        .iter()
        .enumerate()
        .filter_map(|(idx, &(_, begin))| {
            let end = bounds.get(idx + 1).map(|next| next.0).unwrap_or(data.len());
            let nal = &data[begin..end];
            (!nal.is_empty()).then_some(nal)
        })
        .collect()
}
