//! Codec payload formats
//!
//! Bit-level helpers for the RTP payload formats: H.264 NAL and
//! fragmentation headers (RFC 6184), the VP8 payload descriptor (RFC 7741)
//! and AAC access-unit framing (RFC 3640, RFC 3016).

pub mod aac;
pub mod h264;
pub mod vp8;

use thiserror::Error;

/// Errors decoding a codec payload
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DepacketizeError {
    #[error("Payload truncated: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Invalid payload header: {0}")]
    InvalidHeader(&'static str),
}

pub(crate) fn ensure_len(data: &[u8], needed: usize) -> Result<(), DepacketizeError> {
    if data.len() < needed {
        return Err(DepacketizeError::Truncated {
            needed,
            available: data.len(),
        });
    }
    Ok(())
}
