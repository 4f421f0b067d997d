//! VP8 payload descriptor and payload header (RFC 7741)
//!
//! ```text
//!       0 1 2 3 4 5 6 7
//!      +-+-+-+-+-+-+-+-+
//!      |X|R|N|S|R| PID | (REQUIRED)
//!      +-+-+-+-+-+-+-+-+
//! X:   |I|L|T|K| RSV   | (OPTIONAL)
//!      +-+-+-+-+-+-+-+-+
//! I:   |M| PictureID   | (OPTIONAL, second byte if M)
//!      +-+-+-+-+-+-+-+-+
//! L:   |   TL0PICIDX   | (OPTIONAL)
//!      +-+-+-+-+-+-+-+-+
//! T/K: |TID|Y| KEYIDX  | (OPTIONAL)
//!      +-+-+-+-+-+-+-+-+
//! ```

use super::{ensure_len, DepacketizeError};
use bytes::{BufMut, BytesMut};

const X_BIT: u8 = 0x80;
const N_BIT: u8 = 0x20;
const S_BIT: u8 = 0x10;
const PART_ID_MASK: u8 = 0x0F;

const I_BIT: u8 = 0x80;
const L_BIT: u8 = 0x40;
const T_BIT: u8 = 0x20;
const K_BIT: u8 = 0x10;
const M_BIT: u8 = 0x80;

/// Picture identifier in its short or long wire form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureId {
    /// 7-bit form
    Short(u8),
    /// 15-bit form
    Long(u16),
}

impl PictureId {
    pub fn value(self) -> u16 {
        match self {
            PictureId::Short(id) => id as u16,
            PictureId::Long(id) => id,
        }
    }
}

/// Parsed VP8 payload descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Vp8Descriptor {
    /// N: frame can be discarded without affecting other frames
    pub non_reference: bool,
    /// S: first packet of a VP8 partition
    pub start_of_partition: bool,
    pub partition_id: u8,
    pub picture_id: Option<PictureId>,
    pub tl0_pic_idx: Option<u8>,
    /// Temporal layer index
    pub tid: Option<u8>,
    /// Y: layer sync bit, meaningful when `tid` is present
    pub layer_sync: bool,
    pub key_idx: Option<u8>,
}

impl Vp8Descriptor {
    /// Descriptor for the first packet of a frame
    pub fn start() -> Self {
        Vp8Descriptor {
            start_of_partition: true,
            ..Default::default()
        }
    }

    fn has_extension(&self) -> bool {
        self.picture_id.is_some()
            || self.tl0_pic_idx.is_some()
            || self.tid.is_some()
            || self.key_idx.is_some()
    }

    /// Encoded length in bytes
    pub fn encoded_len(&self) -> usize {
        let mut len = 1;
        if self.has_extension() {
            len += 1;
            len += match self.picture_id {
                Some(PictureId::Short(_)) => 1,
                Some(PictureId::Long(_)) => 2,
                None => 0,
            };
            if self.tl0_pic_idx.is_some() {
                len += 1;
            }
            if self.tid.is_some() || self.key_idx.is_some() {
                len += 1;
            }
        }
        len
    }

    /// Parse the descriptor at the start of `payload`
    ///
    /// Returns the descriptor and its length; the VP8 payload follows.
    pub fn parse(payload: &[u8]) -> Result<(Self, usize), DepacketizeError> {
        ensure_len(payload, 1)?;
        let b0 = payload[0];
        let mut desc = Vp8Descriptor {
            non_reference: b0 & N_BIT != 0,
            start_of_partition: b0 & S_BIT != 0,
            partition_id: b0 & PART_ID_MASK,
            ..Default::default()
        };
        let mut pos = 1;

        if b0 & X_BIT != 0 {
            ensure_len(payload, pos + 1)?;
            let ext = payload[pos];
            pos += 1;

            if ext & I_BIT != 0 {
                ensure_len(payload, pos + 1)?;
                if payload[pos] & M_BIT != 0 {
                    ensure_len(payload, pos + 2)?;
                    let id = u16::from_be_bytes([payload[pos], payload[pos + 1]]) & 0x7FFF;
                    desc.picture_id = Some(PictureId::Long(id));
                    pos += 2;
                } else {
                    desc.picture_id = Some(PictureId::Short(payload[pos]));
                    pos += 1;
                }
            }
            if ext & L_BIT != 0 {
                ensure_len(payload, pos + 1)?;
                desc.tl0_pic_idx = Some(payload[pos]);
                pos += 1;
            }
            if ext & (T_BIT | K_BIT) != 0 {
                ensure_len(payload, pos + 1)?;
                let b = payload[pos];
                if ext & T_BIT != 0 {
                    desc.tid = Some(b >> 6);
                    desc.layer_sync = b & 0x20 != 0;
                }
                if ext & K_BIT != 0 {
                    desc.key_idx = Some(b & 0x1F);
                }
                pos += 1;
            }
        }

        Ok((desc, pos))
    }

    /// Append the encoded descriptor to `buf`
    pub fn serialize(&self, buf: &mut BytesMut) {
        let extended = self.has_extension();
        let mut b0 = self.partition_id & PART_ID_MASK;
        if extended {
            b0 |= X_BIT;
        }
        if self.non_reference {
            b0 |= N_BIT;
        }
        if self.start_of_partition {
            b0 |= S_BIT;
        }
        buf.put_u8(b0);
        if !extended {
            return;
        }

        let mut ext = 0;
        if self.picture_id.is_some() {
            ext |= I_BIT;
        }
        if self.tl0_pic_idx.is_some() {
            ext |= L_BIT;
        }
        if self.tid.is_some() {
            ext |= T_BIT;
        }
        if self.key_idx.is_some() {
            ext |= K_BIT;
        }
        buf.put_u8(ext);

        match self.picture_id {
            Some(PictureId::Short(id)) => buf.put_u8(id & 0x7F),
            Some(PictureId::Long(id)) => buf.put_u16(0x8000 | (id & 0x7FFF)),
            None => {}
        }
        if let Some(idx) = self.tl0_pic_idx {
            buf.put_u8(idx);
        }
        if self.tid.is_some() || self.key_idx.is_some() {
            let mut b = (self.tid.unwrap_or(0) & 0x03) << 6;
            if self.layer_sync {
                b |= 0x20;
            }
            b |= self.key_idx.unwrap_or(0) & 0x1F;
            buf.put_u8(b);
        }
    }
}

/// The 3-byte header opening the first partition of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vp8PayloadHeader {
    /// P bit clear: key frame
    pub key_frame: bool,
    pub version: u8,
    /// H bit: frame is meant to be displayed
    pub show_frame: bool,
    /// Size of the first partition in bytes
    pub first_partition_size: u32,
}

impl Vp8PayloadHeader {
    pub const SIZE: usize = 3;

    /// Parse the header at the start of the VP8 payload (after the descriptor)
    pub fn parse(data: &[u8]) -> Result<Self, DepacketizeError> {
        ensure_len(data, Self::SIZE)?;
        let b0 = data[0];
        let size0 = (b0 >> 5) as u32;
        Ok(Vp8PayloadHeader {
            key_frame: b0 & 0x01 == 0,
            version: (b0 >> 1) & 0x07,
            show_frame: b0 & 0x10 != 0,
            first_partition_size: size0 | (data[1] as u32) << 3 | (data[2] as u32) << 11,
        })
    }
}
