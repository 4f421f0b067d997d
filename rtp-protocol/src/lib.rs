//! RTP media transport core
//!
//! This crate turns encoded audio and video access units into RTP packets
//! and back. It covers wrap-aware sequence arithmetic, the packet and RTCP
//! wire formats, per-codec packetization (generic audio, AAC, H.264, VP8),
//! the receive reorder window with NACK-driven loss recovery, and the
//! statistics behind RTCP sender and receiver reports.

pub mod buffer;
pub mod codec;
pub mod events;
pub mod media;
pub mod nack;
pub mod packet;
pub mod receiver;
pub mod rtcp;
pub mod sender;
pub mod sequence;
pub mod source;

pub use buffer::{ring_slots, PacketRing, MAX_RING_CAPACITY};
pub use codec::DepacketizeError;
pub use events::{FeedbackCounters, ReceiverEvents, SenderEvents, Subscribers};
pub use media::{Codec, Format, Frame, MediaKind};
pub use nack::{coalesce, NackCoalescer, NackRequest, NackTable};
pub use packet::{PacketError, RtpPacket, MAX_PAYLOAD_SIZE, PACKET_BUFFER_SIZE};
pub use receiver::{InsertOutcome, Receiver, ReceiverConfig, ReceiverError, ReceiverStats};
pub use rtcp::{
    parse_compound, serialize_compound, ReportBlock, RtcpError, RtcpPacket, SenderReport,
};
pub use sender::{SendError, Sender, SenderStats};
pub use sequence::SeqNumber;
pub use source::SourceStatistics;
