//! VP8 packetization (RFC 7741) with a minimal one-byte descriptor

use super::{Chunk, Packetizer, SendError};
use crate::codec::vp8::Vp8Descriptor;
use crate::packet::MAX_PAYLOAD_SIZE;
use bytes::{BufMut, BytesMut};

const DESCRIPTOR_SIZE: usize = 1;
const FRAGMENT_SIZE: usize = MAX_PAYLOAD_SIZE - DESCRIPTOR_SIZE;

#[derive(Debug, Clone, Copy, Default)]
pub struct Vp8Packetizer;

impl Packetizer for Vp8Packetizer {
    fn packetize(&self, frame: &[u8], duration: u32) -> Result<Vec<Chunk>, SendError> {
        if frame.is_empty() {
            return Err(SendError::EmptyFrame);
        }

        let pieces: Vec<&[u8]> = frame.chunks(FRAGMENT_SIZE).collect();
        let last = pieces.len() - 1;
        let chunks = pieces
            .into_iter()
            .enumerate()
            .map(|(i, piece)| {
                let descriptor = if i == 0 {
                    Vp8Descriptor::start()
                } else {
                    Vp8Descriptor::default()
                };
                let mut buf = BytesMut::with_capacity(DESCRIPTOR_SIZE + piece.len());
                descriptor.serialize(&mut buf);
                buf.put_slice(piece);

                Chunk {
                    payload: buf.freeze(),
                    marker: i == last,
                    advance: if i == last { duration } else { 0 },
                }
            })
            .collect();
        Ok(chunks)
    }
}
