//! H.264 depacketization (RFC 6184)
//!
//! Every reconstructed NAL unit is delivered as its own frame with an Annex-B
//! start code. Aggregation packets yield one frame per contained NAL unit;
//! fragmentation units are reassembled from their start fragment onward.

use super::{Depacketizer, Unit};
use crate::codec::h264::{is_keyframe_nal, nal_type, FuHeader, NalHeader, START_CODE};
use crate::codec::{ensure_len, DepacketizeError};
use crate::media::{Codec, Frame};
use crate::packet::RtpPacket;
use bytes::{BufMut, BytesMut};
use tracing::debug;

/// FU indicator and FU header
const FU_HEADER_SIZE: usize = 2;
/// Decoding order number in STAP-B, MTAP and FU-B
const DON_SIZE: usize = 2;

#[derive(Debug, Clone, Copy, Default)]
pub struct H264Depacketizer;

impl Depacketizer for H264Depacketizer {
    fn depacketize(&self, packets: &[RtpPacket]) -> Result<Vec<Unit>, DepacketizeError> {
        let mut units = Vec::new();
        let mut fragment: Option<(u32, BytesMut)> = None;

        for packet in packets {
            let payload = &packet.payload[..];
            if payload.len() < 2 {
                continue;
            }
            let header = NalHeader(payload[0]);
            if header.forbidden() {
                debug!(seq = %packet.seq, "Skipping NAL unit with forbidden bit set");
                continue;
            }

            let ts = packet.timestamp;
            let result = match header.nal_type() {
                1..=23 => {
                    units.push(nal_unit(ts, payload));
                    Ok(())
                }
                nal_type::STAP_A => single_time(ts, &payload[1..], &mut units),
                nal_type::STAP_B => ensure_len(payload, 1 + DON_SIZE)
                    .and_then(|_| single_time(ts, &payload[1 + DON_SIZE..], &mut units)),
                nal_type::MTAP16 => multi_time(ts, payload, 2, &mut units),
                nal_type::MTAP24 => multi_time(ts, payload, 3, &mut units),
                nal_type::FU_A => fragmented(packet, FU_HEADER_SIZE, &mut fragment, &mut units),
                nal_type::FU_B => {
                    fragmented(packet, FU_HEADER_SIZE + DON_SIZE, &mut fragment, &mut units)
                }
                ty => {
                    debug!(seq = %packet.seq, nal_type = ty, "Unsupported NAL unit type");
                    Ok(())
                }
            };

            if let Err(e) = result {
                debug!(seq = %packet.seq, error = %e, "Malformed aggregation packet");
            }
        }

        if fragment.is_some() {
            debug!("Discarding fragmented NAL unit without end fragment");
        }
        Ok(units)
    }

    fn is_reference(&self, packet: &RtpPacket) -> bool {
        packet
            .payload
            .first()
            .map(|&b| NalHeader(b).nri() > 0)
            .unwrap_or(false)
    }
}

fn finish(pts: u32, data: BytesMut) -> Unit {
    let keyframe = data
        .get(START_CODE.len())
        .map(|&b| is_keyframe_nal(NalHeader(b).nal_type()))
        .unwrap_or(false);
    Unit {
        frame: Frame::new(Codec::H264, pts, data.freeze()),
        keyframe,
    }
}

fn nal_unit(pts: u32, nal: &[u8]) -> Unit {
    let mut data = BytesMut::with_capacity(START_CODE.len() + nal.len());
    data.put_slice(&START_CODE);
    data.put_slice(nal);
    finish(pts, data)
}

/// FU-A / FU-B: `skip` bytes of headers precede the fragment data
fn fragmented(
    packet: &RtpPacket,
    skip: usize,
    fragment: &mut Option<(u32, BytesMut)>,
    units: &mut Vec<Unit>,
) -> Result<(), DepacketizeError> {
    let payload = &packet.payload[..];
    ensure_len(payload, skip)?;
    let indicator = NalHeader(payload[0]);
    let fu = FuHeader(payload[1]);

    if fu.start() {
        let mut data = BytesMut::with_capacity(START_CODE.len() + 1 + payload.len() - skip);
        data.put_slice(&START_CODE);
        data.put_u8(indicator.flags() | fu.nal_type());
        *fragment = Some((packet.timestamp, data));
    }

    let Some((_, data)) = fragment.as_mut() else {
        debug!(seq = %packet.seq, "Fragment without start, ignoring");
        return Ok(());
    };
    data.put_slice(&payload[skip..]);

    if fu.end() {
        if let Some((pts, data)) = fragment.take() {
            units.push(finish(pts, data));
        }
    }
    Ok(())
}

/// STAP-A / STAP-B body: repeated `[size: u16][NAL]`
fn single_time(pts: u32, mut body: &[u8], units: &mut Vec<Unit>) -> Result<(), DepacketizeError> {
    while body.len() >= 2 {
        let size = u16::from_be_bytes([body[0], body[1]]) as usize;
        ensure_len(body, 2 + size)?;
        if size > 0 {
            units.push(nal_unit(pts, &body[2..2 + size]));
        }
        body = &body[2 + size..];
    }
    Ok(())
}

/// MTAP16 / MTAP24: DONB, then repeated
/// `[size: u16][DOND: u8][TS offset: 16 or 24 bits][NAL]`
///
/// `size` covers DOND, the offset and the NAL unit.
fn multi_time(
    ts: u32,
    payload: &[u8],
    offset_len: usize,
    units: &mut Vec<Unit>,
) -> Result<(), DepacketizeError> {
    ensure_len(payload, 1 + DON_SIZE)?;
    let mut body = &payload[1 + DON_SIZE..];
    let prefix = 1 + offset_len;

    while body.len() >= 2 {
        let size = u16::from_be_bytes([body[0], body[1]]) as usize;
        if size < prefix {
            return Err(DepacketizeError::InvalidHeader("MTAP unit shorter than its header"));
        }
        ensure_len(body, 2 + size)?;

        let offset = body[3..3 + offset_len]
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | b as u32);
        let nal = &body[2 + prefix..2 + size];
        if !nal.is_empty() {
            units.push(nal_unit(ts.wrapping_add(offset), nal));
        }
        body = &body[2 + size..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::SeqNumber;

    fn packet(seq: u16, payload: &[u8]) -> RtpPacket {
        let mut packet = RtpPacket::new(96, 1, SeqNumber::new(seq), 9000);
        packet.set_payload(payload);
        packet
    }

    #[test]
    fn test_single_nal() {
        let units = H264Depacketizer
            .depacketize(&[packet(1, &[0x65, 1, 2, 3])])
            .unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(&units[0].frame.data[..], &[0, 0, 0, 1, 0x65, 1, 2, 3]);
        assert!(units[0].keyframe);
        assert_eq!(units[0].frame.pts, 9000);
    }

    #[test]
    fn test_stap_a() {
        let payload = [24, 0, 3, 0x67, 1, 2, 0, 2, 0x68, 3];
        let units = H264Depacketizer.depacketize(&[packet(1, &payload)]).unwrap();

        assert_eq!(units.len(), 2);
        assert_eq!(&units[0].frame.data[4..], &[0x67, 1, 2]);
        assert_eq!(&units[1].frame.data[4..], &[0x68, 3]);
        assert!(units.iter().all(|u| u.keyframe));
    }

    #[test]
    fn test_stap_b_skips_don() {
        let payload = [25, 0xAB, 0xCD, 0, 2, 0x41, 9];
        let units = H264Depacketizer.depacketize(&[packet(1, &payload)]).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(&units[0].frame.data[4..], &[0x41, 9]);
        assert!(!units[0].keyframe);
    }

    #[test]
    fn test_mtap16_offsets() {
        // DONB, then size=5 (DOND + 16-bit offset + 2-byte NAL)
        let payload = [26, 0, 1, 0, 5, 0, 0x01, 0x00, 0x41, 7];
        let units = H264Depacketizer.depacketize(&[packet(1, &payload)]).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].frame.pts, 9000 + 256);
        assert_eq!(&units[0].frame.data[4..], &[0x41, 7]);
    }

    #[test]
    fn test_mtap24_offsets() {
        let payload = [27, 0, 1, 0, 6, 0, 0x01, 0x00, 0x00, 0x41, 7];
        let units = H264Depacketizer.depacketize(&[packet(1, &payload)]).unwrap();
        assert_eq!(units[0].frame.pts, 9000 + 65_536);
    }

    #[test]
    fn test_fu_a_reassembly() {
        let packets = [
            packet(1, &[0x7C, 0x85, 1, 2]),
            packet(2, &[0x7C, 0x05, 3, 4]),
            packet(3, &[0x7C, 0x45, 5]),
        ];
        let units = H264Depacketizer.depacketize(&packets).unwrap();

        assert_eq!(units.len(), 1);
        assert_eq!(&units[0].frame.data[..], &[0, 0, 0, 1, 0x65, 1, 2, 3, 4, 5]);
        assert!(units[0].keyframe);
    }

    #[test]
    fn test_fu_b_skips_don() {
        let packets = [
            packet(1, &[0x7D, 0x81, 0, 0, 1]),
            packet(2, &[0x7D, 0x41, 0, 1, 2]),
        ];
        let units = H264Depacketizer.depacketize(&packets).unwrap();
        assert_eq!(&units[0].frame.data[..], &[0, 0, 0, 1, 0x61, 1, 2]);
    }

    #[test]
    fn test_fragment_without_start_ignored() {
        let packets = [packet(2, &[0x7C, 0x05, 3, 4]), packet(3, &[0x7C, 0x45, 5])];
        let units = H264Depacketizer.depacketize(&packets).unwrap();
        assert!(units.is_empty());
    }

    #[test]
    fn test_short_and_forbidden_skipped() {
        let packets = [packet(1, &[0x65]), packet(2, &[0xE5, 1]), packet(3, &[0x41, 1])];
        let units = H264Depacketizer.depacketize(&packets).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].frame.data[4], 0x41);
    }

    #[test]
    fn test_truncated_stap_keeps_earlier_units() {
        let payload = [24, 0, 2, 0x41, 1, 0, 9, 0x41];
        let units = H264Depacketizer.depacketize(&[packet(1, &payload)]).unwrap();
        assert_eq!(units.len(), 1);
    }

    #[test]
    fn test_reference_detection() {
        assert!(H264Depacketizer.is_reference(&packet(1, &[0x65, 0])));
        assert!(!H264Depacketizer.is_reference(&packet(1, &[0x01, 0])));
    }
}
