//! Generic audio: every packet payload is one frame

use super::{Depacketizer, Unit};
use crate::codec::DepacketizeError;
use crate::media::{Codec, Frame};
use crate::packet::RtpPacket;

#[derive(Debug, Clone, Copy)]
pub struct AudioDepacketizer {
    codec: Codec,
}

impl AudioDepacketizer {
    pub fn new(codec: Codec) -> Self {
        AudioDepacketizer { codec }
    }
}

impl Depacketizer for AudioDepacketizer {
    fn depacketize(&self, packets: &[RtpPacket]) -> Result<Vec<Unit>, DepacketizeError> {
        Ok(packets
            .iter()
            .map(|packet| Unit {
                frame: Frame::new(self.codec, packet.timestamp, packet.payload.clone()),
                keyframe: false,
            })
            .collect())
    }
}
