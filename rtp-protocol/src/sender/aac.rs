//! AAC packetization, one access unit per packet

use super::{Chunk, Packetizer, SendError};
use crate::codec::aac::{write_au_header_section, write_latm_length, MAX_AU_SIZE};
use bytes::{BufMut, BytesMut};

/// RFC 3640 `mpeg4-generic` in AAC-hbr mode
#[derive(Debug, Clone, Copy, Default)]
pub struct Rfc3640Packetizer;

impl Packetizer for Rfc3640Packetizer {
    fn packetize(&self, frame: &[u8], duration: u32) -> Result<Vec<Chunk>, SendError> {
        if frame.is_empty() {
            return Err(SendError::EmptyFrame);
        }
        if frame.len() > MAX_AU_SIZE {
            return Err(SendError::FrameTooLarge {
                size: frame.len(),
                max: MAX_AU_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(4 + frame.len());
        write_au_header_section(&mut buf, frame.len());
        buf.put_slice(frame);

        Ok(vec![Chunk {
            payload: buf.freeze(),
            marker: false,
            advance: duration,
        }])
    }
}

/// RFC 3016 `MP4A-LATM` with a length-prefixed payload
#[derive(Debug, Clone, Copy, Default)]
pub struct LatmPacketizer;

impl Packetizer for LatmPacketizer {
    fn packetize(&self, frame: &[u8], duration: u32) -> Result<Vec<Chunk>, SendError> {
        if frame.is_empty() {
            return Err(SendError::EmptyFrame);
        }

        let mut buf = BytesMut::with_capacity(frame.len() / 255 + 1 + frame.len());
        write_latm_length(&mut buf, frame.len());
        buf.put_slice(frame);

        Ok(vec![Chunk {
            payload: buf.freeze(),
            marker: false,
            advance: duration,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc3640_header() {
        let chunks = Rfc3640Packetizer.packetize(&[0xAB; 100], 1024).unwrap();
        assert_eq!(chunks.len(), 1);

        let payload = &chunks[0].payload;
        assert_eq!(&payload[..4], &[0x00, 0x10, 0x03, 0x20]);
        assert_eq!(payload.len(), 104);
        assert!(!chunks[0].marker);
        assert_eq!(chunks[0].advance, 1024);
    }

    #[test]
    fn test_rfc3640_too_large() {
        let frame = vec![0; MAX_AU_SIZE + 1];
        assert_eq!(
            Rfc3640Packetizer.packetize(&frame, 1024),
            Err(SendError::FrameTooLarge {
                size: MAX_AU_SIZE + 1,
                max: MAX_AU_SIZE
            })
        );
    }

    #[test]
    fn test_latm_prefix() {
        let chunks = LatmPacketizer.packetize(&[1; 300], 1024).unwrap();
        let payload = &chunks[0].payload;
        assert_eq!(&payload[..2], &[0xFF, 45]);
        assert_eq!(payload.len(), 302);
    }
}
