//! AAC access-unit framing
//!
//! Two RTP payload formats are supported:
//! - RFC 3640 `mpeg4-generic` in AAC-hbr mode: a 16-bit AU-headers-length
//!   (in bits), then one 16-bit AU header per access unit (13-bit size,
//!   3-bit index), then the access units back to back.
//! - RFC 3016 `MP4A-LATM`: each access unit is preceded by its length coded
//!   as a run of 0xFF bytes (255 each) and a final byte below 0xFF.

use super::{ensure_len, DepacketizeError};
use bytes::{BufMut, BytesMut};

/// Bits per AU header in AAC-hbr mode
pub const AU_HEADER_BITS: usize = 16;

/// Largest access unit a 13-bit AU size can describe
pub const MAX_AU_SIZE: usize = 0x1FFF;

/// Write the AU header section for a single access unit of `au_size` bytes
pub fn write_au_header_section(buf: &mut BytesMut, au_size: usize) {
    let size = au_size.min(MAX_AU_SIZE) as u16;
    buf.put_u16(AU_HEADER_BITS as u16);
    buf.put_u16(size << 3);
}

/// Parse the AU header section of an RFC 3640 payload
///
/// Returns the access-unit sizes and the offset of the first access unit.
pub fn parse_au_header_section(payload: &[u8]) -> Result<(Vec<usize>, usize), DepacketizeError> {
    ensure_len(payload, 2)?;
    let header_bits = u16::from_be_bytes([payload[0], payload[1]]) as usize;
    let count = header_bits / AU_HEADER_BITS;
    if count == 0 {
        return Err(DepacketizeError::InvalidHeader("empty AU header section"));
    }

    let data_offset = 2 + count * 2;
    ensure_len(payload, data_offset)?;

    let sizes = payload[2..data_offset]
        .chunks_exact(2)
        .map(|h| ((h[0] as usize) << 5) | ((h[1] as usize) >> 3))
        .collect();
    Ok((sizes, data_offset))
}

/// Write the LATM length prefix for an access unit of `au_size` bytes
pub fn write_latm_length(buf: &mut BytesMut, au_size: usize) {
    buf.put_bytes(0xFF, au_size / 255);
    buf.put_u8((au_size % 255) as u8);
}

/// Read a LATM length prefix, advancing `data` past it
pub fn read_latm_length(data: &mut &[u8]) -> Result<usize, DepacketizeError> {
    let bytes: &[u8] = *data;
    let mut len = 0;
    for (i, &b) in bytes.iter().enumerate() {
        len += b as usize;
        if b != 0xFF {
            *data = &bytes[i + 1..];
            return Ok(len);
        }
    }
    Err(DepacketizeError::Truncated {
        needed: bytes.len() + 1,
        available: bytes.len(),
    })
}
