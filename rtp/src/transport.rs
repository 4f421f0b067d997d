//! Datagram transport seam
//!
//! A [`MediaStream`](crate::MediaStream) never touches sockets. It hands
//! serialized RTP and RTCP datagrams to a [`Transport`], and the application
//! feeds received datagrams back through `receive_rtp` / `receive_rtcp`.

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};
use thiserror::Error;

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,

    #[error("Send failed: {0}")]
    Send(String),
}

/// Outgoing datagram, tagged with the channel it belongs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    Rtp(Bytes),
    Rtcp(Bytes),
}

impl Datagram {
    pub fn payload(&self) -> &Bytes {
        match self {
            Datagram::Rtp(data) | Datagram::Rtcp(data) => data,
        }
    }
}

/// Sink for outgoing datagrams
///
/// Called synchronously from sender and NACK threads; implementations must
/// not block for long.
pub trait Transport: Send + Sync {
    fn send_rtp(&self, data: Bytes) -> Result<(), TransportError>;
    fn send_rtcp(&self, data: Bytes) -> Result<(), TransportError>;
}

/// Transport that queues datagrams on a channel
///
/// Useful for loopback links and tests: the other end drains the channel and
/// delivers datagrams wherever it likes.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: Sender<Datagram>,
}

impl ChannelTransport {
    /// Create a transport and the receiving end of its queue
    pub fn new() -> (Self, Receiver<Datagram>) {
        let (tx, rx) = channel::unbounded();
        (ChannelTransport { tx }, rx)
    }

    pub fn from_sender(tx: Sender<Datagram>) -> Self {
        ChannelTransport { tx }
    }

    fn push(&self, datagram: Datagram) -> Result<(), TransportError> {
        self.tx.send(datagram).map_err(|_| TransportError::Closed)
    }
}

impl Transport for ChannelTransport {
    fn send_rtp(&self, data: Bytes) -> Result<(), TransportError> {
        self.push(Datagram::Rtp(data))
    }

    fn send_rtcp(&self, data: Bytes) -> Result<(), TransportError> {
        self.push(Datagram::Rtcp(data))
    }
}
