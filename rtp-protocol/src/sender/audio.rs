//! Generic audio packetization: the frame is cut into payload-sized slices

use super::{Chunk, Packetizer, SendError};
use crate::packet::MAX_PAYLOAD_SIZE;
use bytes::Bytes;

/// Splits raw audio frames (G.711, G.722, Opus) into packets
///
/// The marker bit stays clear. The frame duration is spread over the slices
/// in proportion to their size.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioPacketizer;

impl Packetizer for AudioPacketizer {
    fn packetize(&self, frame: &[u8], duration: u32) -> Result<Vec<Chunk>, SendError> {
        if frame.is_empty() {
            return Err(SendError::EmptyFrame);
        }

        let total = frame.len() as u64;
        let mut offset = 0u64;
        let chunks = frame
            .chunks(MAX_PAYLOAD_SIZE)
            .map(|slice| {
                let start = duration as u64 * offset / total;
                offset += slice.len() as u64;
                let end = duration as u64 * offset / total;
                Chunk {
                    payload: Bytes::copy_from_slice(slice),
                    marker: false,
                    advance: (end - start) as u32,
                }
            })
            .collect();
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_frame_single_chunk() {
        let chunks = AudioPacketizer.packetize(&[7; 160], 160).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].payload.len(), 160);
        assert!(!chunks[0].marker);
        assert_eq!(chunks[0].advance, 160);
    }

    #[test]
    fn test_large_frame_split() {
        let chunks = AudioPacketizer.packetize(&[0; 3000], 3000).unwrap();
        let sizes: Vec<usize> = chunks.iter().map(|c| c.payload.len()).collect();
        assert_eq!(sizes, vec![1200, 1200, 600]);

        let advances: Vec<u32> = chunks.iter().map(|c| c.advance).collect();
        assert_eq!(advances, vec![1200, 1200, 600]);
    }

    #[test]
    fn test_advance_sums_to_duration() {
        let chunks = AudioPacketizer.packetize(&[0; 2500], 961).unwrap();
        assert_eq!(chunks.iter().map(|c| c.advance).sum::<u32>(), 961);
    }

    #[test]
    fn test_empty_frame() {
        assert_eq!(AudioPacketizer.packetize(&[], 160), Err(SendError::EmptyFrame));
    }
}
