//! VP8 depacketization (RFC 7741)

use super::{Depacketizer, Unit};
use crate::codec::vp8::{Vp8Descriptor, Vp8PayloadHeader};
use crate::codec::DepacketizeError;
use crate::media::{Codec, Frame};
use crate::packet::RtpPacket;
use bytes::{BufMut, BytesMut};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct Vp8Depacketizer;

impl Depacketizer for Vp8Depacketizer {
    fn depacketize(&self, packets: &[RtpPacket]) -> Result<Vec<Unit>, DepacketizeError> {
        let mut data = BytesMut::new();
        let mut first: Option<(&RtpPacket, Vp8Descriptor, usize)> = None;

        for packet in packets {
            let (descriptor, len) = match Vp8Descriptor::parse(&packet.payload) {
                Ok(parsed) => parsed,
                Err(e) => {
                    debug!(seq = %packet.seq, error = %e, "Bad VP8 descriptor");
                    continue;
                }
            };
            if first.is_none() {
                if !descriptor.start_of_partition {
                    continue;
                }
                first = Some((packet, descriptor, len));
            }
            data.put_slice(&packet.payload[len..]);
        }

        let (packet, descriptor, len) =
            first.ok_or(DepacketizeError::InvalidHeader("no partition start in frame"))?;
        if data.is_empty() {
            return Err(DepacketizeError::InvalidHeader("empty VP8 frame"));
        }

        let keyframe = descriptor.start_of_partition
            && descriptor.partition_id == 0
            && Vp8PayloadHeader::parse(&packet.payload[len..])
                .map(|header| header.key_frame)
                .unwrap_or(false);

        Ok(vec![Unit {
            frame: Frame::new(Codec::Vp8, packet.timestamp, data.freeze()),
            keyframe,
        }])
    }

    fn is_reference(&self, packet: &RtpPacket) -> bool {
        Vp8Descriptor::parse(&packet.payload)
            .map(|(descriptor, _)| !descriptor.non_reference)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::SeqNumber;

    fn packet(seq: u16, payload: &[u8]) -> RtpPacket {
        let mut packet = RtpPacket::new(100, 1, SeqNumber::new(seq), 3000);
        packet.set_payload(payload);
        packet
    }

    #[test]
    fn test_key_frame() {
        let packets = [packet(1, &[0x10, 0x50, 0x01, 0x00, 9]), packet(2, &[0x00, 8, 7])];
        let units = Vp8Depacketizer.depacketize(&packets).unwrap();

        assert_eq!(units.len(), 1);
        assert!(units[0].keyframe);
        assert_eq!(&units[0].frame.data[..], &[0x50, 0x01, 0x00, 9, 8, 7]);
    }

    #[test]
    fn test_inter_frame() {
        let units = Vp8Depacketizer
            .depacketize(&[packet(1, &[0x10, 0x51, 0x01, 0x00])])
            .unwrap();
        assert!(!units[0].keyframe);
    }

    #[test]
    fn test_leading_continuation_skipped() {
        let packets = [packet(1, &[0x00, 1, 2]), packet(2, &[0x10, 0x50, 0, 0])];
        let units = Vp8Depacketizer.depacketize(&packets).unwrap();
        assert_eq!(&units[0].frame.data[..], &[0x50, 0, 0]);
    }

    #[test]
    fn test_missing_start_is_error() {
        assert!(Vp8Depacketizer.depacketize(&[packet(1, &[0x00, 1])]).is_err());
    }

    #[test]
    fn test_reference_detection() {
        assert!(Vp8Depacketizer.is_reference(&packet(1, &[0x10, 0])));
        assert!(!Vp8Depacketizer.is_reference(&packet(1, &[0x30, 0])));
    }
}
