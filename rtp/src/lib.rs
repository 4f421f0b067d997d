//! RTP media streams
//!
//! High-level API tying senders and receivers of one media session to a
//! datagram transport, with the RTCP report loop and feedback routing.

pub use rtp_io as io;
pub use rtp_protocol as protocol;

pub mod stream;
pub mod transport;

pub use stream::{
    FeedbackCapabilities, KeyframeRequestKind, MediaStream, StreamError, StreamEvents,
};
pub use transport::{ChannelTransport, Datagram, Transport, TransportError};

// Re-export commonly used types
pub use protocol::{
    Codec, Format, Frame, InsertOutcome, MediaKind, ReceiverConfig, ReceiverStats, SenderStats,
    SeqNumber,
};
