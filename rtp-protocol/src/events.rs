//! Event subscription for senders and receivers
//!
//! Producers hold a [`Subscribers`] list of handler trait objects and invoke
//! every handler synchronously on the producing thread. Handlers must not
//! retain borrowed arguments past the call.

use crate::media::{Format, Frame};
use crate::nack::NackRequest;
use crate::packet::RtpPacket;
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handler for packets leaving a sender
pub trait SenderEvents: Send + Sync {
    /// A packet is ready for the wire; `wire` is its serialized form
    fn on_outbound_packet(&self, ssrc: u32, packet: &RtpPacket, wire: &Bytes);
}

/// Handler for receiver output
///
/// All methods default to doing nothing so a handler implements only what it
/// consumes.
pub trait ReceiverEvents: Send + Sync {
    /// A complete access unit was reconstructed
    fn on_frame(&self, _ssrc: u32, _format: &Format, _frame: &Frame) {}

    /// Packets are missing and should be requested again
    fn on_nack(&self, _ssrc: u32, _format: &Format, _request: NackRequest) {}

    /// Decoding cannot continue until a key frame arrives
    fn on_keyframe_request(&self, _ssrc: u32, _format: &Format) {}
}

/// Registered event handlers
pub struct Subscribers<T: ?Sized> {
    handlers: RwLock<Vec<Arc<T>>>,
}

impl<T: ?Sized> Subscribers<T> {
    pub fn new() -> Self {
        Subscribers {
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, handler: Arc<T>) {
        self.handlers.write().push(handler);
    }

    /// Remove a handler previously registered with the same `Arc`
    pub fn unsubscribe(&self, handler: &Arc<T>) {
        self.handlers.write().retain(|h| !Arc::ptr_eq(h, handler));
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Call `f` for every handler in subscription order
    ///
    /// The list is snapshotted first, so handlers may subscribe or unsubscribe
    /// from inside the callback.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&T),
    {
        let handlers = self.handlers.read().clone();
        for handler in &handlers {
            f(handler);
        }
    }
}

impl<T: ?Sized> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for feedback messages sent or received
#[derive(Debug, Default)]
pub struct FeedbackCounters {
    nacks: AtomicU64,
    plis: AtomicU64,
    firs: AtomicU64,
}

impl FeedbackCounters {
    pub fn record_nack(&self) -> u64 {
        self.nacks.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_pli(&self) -> u64 {
        self.plis.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_fir(&self) -> u64 {
        self.firs.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn nacks(&self) -> u64 {
        self.nacks.load(Ordering::Relaxed)
    }

    pub fn plis(&self) -> u64 {
        self.plis.load(Ordering::Relaxed)
    }

    pub fn firs(&self) -> u64 {
        self.firs.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    trait Probe: Send + Sync {
        fn hit(&self, value: u32);
    }

    struct Recorder(Mutex<Vec<u32>>);

    impl Probe for Recorder {
        fn hit(&self, value: u32) {
            self.0.lock().push(value);
        }
    }

    #[test]
    fn test_every_subscriber_called() {
        let subscribers: Subscribers<dyn Probe> = Subscribers::new();
        let a = Arc::new(Recorder(Mutex::new(Vec::new())));
        let b = Arc::new(Recorder(Mutex::new(Vec::new())));
        subscribers.subscribe(a.clone());
        subscribers.subscribe(b.clone());

        subscribers.for_each(|h| h.hit(7));
        assert_eq!(*a.0.lock(), vec![7]);
        assert_eq!(*b.0.lock(), vec![7]);
    }

    #[test]
    fn test_unsubscribe() {
        let subscribers: Subscribers<dyn Probe> = Subscribers::new();
        let a: Arc<dyn Probe> = Arc::new(Recorder(Mutex::new(Vec::new())));
        subscribers.subscribe(a.clone());
        assert_eq!(subscribers.len(), 1);

        subscribers.unsubscribe(&a);
        assert!(subscribers.is_empty());
    }

    #[test]
    fn test_feedback_counters() {
        let counters = FeedbackCounters::default();
        assert_eq!(counters.record_fir(), 1);
        assert_eq!(counters.record_fir(), 2);
        counters.record_pli();

        assert_eq!(counters.firs(), 2);
        assert_eq!(counters.plis(), 1);
        assert_eq!(counters.nacks(), 0);
    }
}
