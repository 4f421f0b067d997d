//! AAC depacketization; a packet may carry several access units

use super::{Depacketizer, Unit};
use crate::codec::aac::{parse_au_header_section, read_latm_length};
use crate::codec::DepacketizeError;
use crate::media::{Codec, Frame};
use crate::packet::RtpPacket;
use tracing::debug;

fn unit(packet: &RtpPacket, codec: Codec, start: usize, len: usize) -> Unit {
    Unit {
        frame: Frame::new(codec, packet.timestamp, packet.payload.slice(start..start + len)),
        keyframe: false,
    }
}

/// RFC 3640 `mpeg4-generic`, AAC-hbr mode
#[derive(Debug, Clone, Copy, Default)]
pub struct Rfc3640Depacketizer;

impl Depacketizer for Rfc3640Depacketizer {
    fn depacketize(&self, packets: &[RtpPacket]) -> Result<Vec<Unit>, DepacketizeError> {
        let mut units = Vec::new();
        for packet in packets {
            let payload = &packet.payload;
            let (sizes, mut offset) = parse_au_header_section(payload)?;
            for size in sizes {
                if offset + size > payload.len() {
                    debug!(
                        seq = %packet.seq,
                        size,
                        available = payload.len() - offset,
                        "Truncated access unit"
                    );
                    break;
                }
                units.push(unit(packet, Codec::Mpeg4Generic, offset, size));
                offset += size;
            }
        }
        Ok(units)
    }
}

/// RFC 3016 `MP4A-LATM`
#[derive(Debug, Clone, Copy, Default)]
pub struct LatmDepacketizer;

impl Depacketizer for LatmDepacketizer {
    fn depacketize(&self, packets: &[RtpPacket]) -> Result<Vec<Unit>, DepacketizeError> {
        let mut units = Vec::new();
        for packet in packets {
            let payload = &packet.payload[..];
            let mut rest = payload;
            while !rest.is_empty() {
                let size = match read_latm_length(&mut rest) {
                    Ok(size) => size,
                    Err(e) => {
                        debug!(seq = %packet.seq, error = %e, "Truncated length prefix");
                        break;
                    }
                };
                if size > rest.len() {
                    debug!(seq = %packet.seq, size, available = rest.len(), "Truncated access unit");
                    break;
                }
                let start = payload.len() - rest.len();
                units.push(unit(packet, Codec::Mp4aLatm, start, size));
                rest = &rest[size..];
            }
        }
        Ok(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::SeqNumber;

    fn packet(payload: &[u8]) -> RtpPacket {
        let mut packet = RtpPacket::new(97, 1, SeqNumber::new(1), 2048);
        packet.set_payload(payload);
        packet
    }

    #[test]
    fn test_rfc3640_two_access_units() {
        // AU-headers-length 32 bits, sizes 100 and 50
        let mut payload = vec![0x00, 0x20, 0x03, 0x20, 0x01, 0x90];
        payload.extend_from_slice(&[0xA1; 100]);
        payload.extend_from_slice(&[0xB2; 50]);

        let units = Rfc3640Depacketizer.depacketize(&[packet(&payload)]).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(&units[0].frame.data[..], &[0xA1; 100][..]);
        assert_eq!(&units[1].frame.data[..], &[0xB2; 50][..]);
        assert!(units.iter().all(|u| u.frame.pts == 2048));
    }

    #[test]
    fn test_rfc3640_truncated_au_stops() {
        let mut payload = vec![0x00, 0x20, 0x00, 0x50, 0x01, 0x90];
        payload.extend_from_slice(&[0; 20]);

        let units = Rfc3640Depacketizer.depacketize(&[packet(&payload)]).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].frame.len(), 10);
    }

    #[test]
    fn test_rfc3640_bad_header() {
        assert!(Rfc3640Depacketizer.depacketize(&[packet(&[0x00])]).is_err());
    }

    #[test]
    fn test_latm_multiple_units() {
        let mut payload = vec![3, 1, 2, 3, 0xFF, 1];
        payload.extend_from_slice(&[7; 256]);

        let units = LatmDepacketizer.depacketize(&[packet(&payload)]).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(&units[0].frame.data[..], &[1, 2, 3]);
        assert_eq!(units[1].frame.len(), 256);
        assert_eq!(units[1].frame.codec, Codec::Mp4aLatm);
    }

    #[test]
    fn test_latm_truncated_prefix_keeps_earlier_units() {
        let payload = [2, 0xAA, 0xBB, 0xFF, 0xFF];

        let units = LatmDepacketizer.depacketize(&[packet(&payload)]).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(&units[0].frame.data[..], &[0xAA, 0xBB]);
    }
}
