//! H.264 packetization (RFC 6184, non-interleaved mode)
//!
//! NAL units that fit are sent as single NAL unit packets. Larger units are
//! split into FU-A fragments. The marker bit is set on the last packet of the
//! access unit.

use super::{Chunk, Packetizer, SendError};
use crate::codec::h264::{nal_type, split_annexb, FuHeader, NalHeader};
use crate::packet::MAX_PAYLOAD_SIZE;
use bytes::{BufMut, Bytes, BytesMut};

/// FU indicator and FU header
const FU_HEADER_SIZE: usize = 2;
const FU_FRAGMENT_SIZE: usize = MAX_PAYLOAD_SIZE - FU_HEADER_SIZE;

#[derive(Debug, Clone, Copy, Default)]
pub struct H264Packetizer;

impl Packetizer for H264Packetizer {
    fn packetize(&self, frame: &[u8], duration: u32) -> Result<Vec<Chunk>, SendError> {
        if frame.is_empty() {
            return Err(SendError::EmptyFrame);
        }
        let nals = split_annexb(frame);
        if nals.is_empty() {
            return Err(SendError::NoNalUnits);
        }

        let mut chunks = Vec::new();
        let last_nal = nals.len() - 1;
        for (i, nal) in nals.into_iter().enumerate() {
            let is_last = i == last_nal;
            if nal.len() <= MAX_PAYLOAD_SIZE {
                chunks.push(Chunk {
                    payload: Bytes::copy_from_slice(nal),
                    marker: is_last,
                    advance: if is_last { duration } else { 0 },
                });
            } else {
                fragment(nal, is_last, duration, &mut chunks);
            }
        }
        Ok(chunks)
    }
}

fn fragment(nal: &[u8], is_last_nal: bool, duration: u32, chunks: &mut Vec<Chunk>) {
    let header = NalHeader(nal[0]);
    let indicator = header.flags() | nal_type::FU_A;

    let pieces: Vec<&[u8]> = nal[1..].chunks(FU_FRAGMENT_SIZE).collect();
    let last_piece = pieces.len() - 1;
    for (i, piece) in pieces.into_iter().enumerate() {
        let end = i == last_piece;
        let fu = FuHeader::new(i == 0, end, header.nal_type());

        let mut buf = BytesMut::with_capacity(FU_HEADER_SIZE + piece.len());
        buf.put_u8(indicator);
        buf.put_u8(fu.0);
        buf.put_slice(piece);

        let final_chunk = end && is_last_nal;
        chunks.push(Chunk {
            payload: buf.freeze(),
            marker: final_chunk,
            advance: if final_chunk { duration } else { 0 },
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annexb(nals: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in nals {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(nal);
        }
        out
    }

    #[test]
    fn test_single_nal_packets() {
        let frame = annexb(&[&[0x67, 1, 2, 3], &[0x68, 4], &[0x65, 5, 6, 7, 8]]);
        let chunks = H264Packetizer.packetize(&frame, 3000).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(&chunks[0].payload[..], &[0x67, 1, 2, 3]);
        assert_eq!(&chunks[2].payload[..], &[0x65, 5, 6, 7, 8]);
        assert_eq!(
            chunks.iter().map(|c| c.marker).collect::<Vec<_>>(),
            vec![false, false, true]
        );
        assert_eq!(
            chunks.iter().map(|c| c.advance).collect::<Vec<_>>(),
            vec![0, 0, 3000]
        );
    }

    #[test]
    fn test_fu_a_fragmentation() {
        let mut nal = vec![0x65];
        nal.extend((0..3000).map(|i| i as u8));
        let frame = annexb(&[&nal]);
        let chunks = H264Packetizer.packetize(&frame, 3000).unwrap();

        // 2999 body bytes in fragments of 1198
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(chunk.payload.len() <= MAX_PAYLOAD_SIZE);
            assert_eq!(chunk.payload[0], 0x60 | nal_type::FU_A);
        }
        assert_eq!(chunks[0].payload[1], 0x85);
        assert_eq!(chunks[1].payload[1], 0x05);
        assert_eq!(chunks[2].payload[1], 0x45);
        assert!(chunks[2].marker && !chunks[0].marker && !chunks[1].marker);

        let body: Vec<u8> = chunks.iter().flat_map(|c| c.payload[2..].to_vec()).collect();
        assert_eq!(body, &nal[1..]);
    }

    #[test]
    fn test_fragmented_nal_followed_by_small() {
        let big = vec![0x41; 1500];
        let frame = annexb(&[&big, &[0x41, 9]]);
        let chunks = H264Packetizer.packetize(&frame, 90).unwrap();

        assert_eq!(chunks.len(), 3);
        assert!(!chunks[1].marker);
        assert!(chunks[2].marker);
        assert_eq!(chunks[2].advance, 90);
    }

    #[test]
    fn test_errors() {
        assert_eq!(H264Packetizer.packetize(&[], 90), Err(SendError::EmptyFrame));
        assert_eq!(
            H264Packetizer.packetize(&[0, 0, 1], 90),
            Err(SendError::NoNalUnits)
        );
    }
}
