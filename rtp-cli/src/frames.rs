//! Splitting input files into access units

use bytes::{BufMut, Bytes, BytesMut};
use rtp::protocol::codec::h264::{is_vcl_nal, split_annexb, NalHeader, START_CODE};
use rtp::Codec;

/// One access unit read from the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    pub data: Bytes,
    /// Duration in media clock units
    pub duration: u32,
}

/// Bytes per frame for codecs carried as fixed-size chunks
pub fn default_frame_size(codec: Codec) -> usize {
    match codec {
        Codec::Pcma | Codec::Pcmu | Codec::G722 | Codec::Other => 160,
        Codec::Opus => 120,
        Codec::Mpeg4Generic | Codec::Mp4aLatm => 512,
        Codec::Vp8 => 4000,
        Codec::H264 => 0,
    }
}

/// Media clock units per frame
pub fn frame_duration(codec: Codec) -> u32 {
    match codec {
        Codec::Pcma | Codec::Pcmu | Codec::G722 | Codec::Other => 160,
        Codec::Opus => 960,
        Codec::Mpeg4Generic | Codec::Mp4aLatm => 1024,
        // 30 fps at 90 kHz
        Codec::H264 | Codec::Vp8 => 3000,
    }
}

/// Split `data` into access units for `codec`
///
/// H.264 input is an Annex-B stream; each unit runs up to and including a
/// coded slice, so parameter sets travel with the slice that follows them.
/// Every other codec is cut into `frame_size` chunks.
pub fn split_access_units(codec: Codec, data: &[u8], frame_size: usize) -> Vec<AccessUnit> {
    let duration = frame_duration(codec);
    if codec == Codec::H264 {
        return split_h264(data)
            .into_iter()
            .map(|data| AccessUnit { data, duration })
            .collect();
    }

    let size = if frame_size == 0 {
        default_frame_size(codec)
    } else {
        frame_size
    };
    data.chunks(size.max(1))
        .map(|chunk| AccessUnit {
            data: Bytes::copy_from_slice(chunk),
            duration,
        })
        .collect()
}

fn split_h264(data: &[u8]) -> Vec<Bytes> {
    let mut units = Vec::new();
    let mut current = BytesMut::new();

    for nal in split_annexb(data) {
        current.put_slice(&START_CODE);
        current.put_slice(nal);
        if is_vcl_nal(NalHeader(nal[0]).nal_type()) {
            units.push(current.split().freeze());
        }
    }
    if !current.is_empty() {
        units.push(current.freeze());
    }
    units
}
