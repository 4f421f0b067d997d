//! In-process lossy link between two media streams
//!
//! Datagrams leaving the near stream are delivered to the far stream and
//! vice versa, after a fixed latency. RTP on the forward path is dropped at
//! the configured rate; RTCP always gets through.

use crate::config::LinkConfig;
use crossbeam::channel::{self, select, Receiver, Sender};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rtp::transport::Datagram;
use rtp::MediaStream;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Link counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub rtp_forwarded: u64,
    pub rtp_dropped: u64,
    pub rtcp_forwarded: u64,
    pub rtcp_returned: u64,
}

#[derive(Default)]
struct Counters {
    rtp_forwarded: AtomicU64,
    rtp_dropped: AtomicU64,
    rtcp_forwarded: AtomicU64,
    rtcp_returned: AtomicU64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// Background thread shuttling datagrams between two streams
pub struct LossyLink {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl LossyLink {
    /// Start the link
    ///
    /// `forward` carries what `near` transmits and `backward` what `far`
    /// transmits.
    pub fn spawn(
        config: &LinkConfig,
        forward: Receiver<Datagram>,
        backward: Receiver<Datagram>,
        near: Arc<MediaStream>,
        far: Arc<MediaStream>,
    ) -> Self {
        let (stop, stop_rx) = channel::bounded(1);
        let counters = Arc::new(Counters::default());
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut worker = Worker {
            loss: config.loss_percent / 100.0,
            latency: config.latency(),
            rng,
            queue: VecDeque::new(),
            near,
            far,
            counters: Arc::clone(&counters),
        };

        let handle = thread::spawn(move || worker.run(forward, backward, stop_rx));

        LossyLink {
            stop,
            handle: Some(handle),
            counters,
        }
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            rtp_forwarded: self.counters.rtp_forwarded.load(Ordering::Relaxed),
            rtp_dropped: self.counters.rtp_dropped.load(Ordering::Relaxed),
            rtcp_forwarded: self.counters.rtcp_forwarded.load(Ordering::Relaxed),
            rtcp_returned: self.counters.rtcp_returned.load(Ordering::Relaxed),
        }
    }

    /// Stop the thread, discarding anything still in flight
    pub fn shutdown(mut self) -> LinkStats {
        self.stop_thread();
        self.stats()
    }

    fn stop_thread(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LossyLink {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

struct Worker {
    loss: f64,
    latency: Duration,
    rng: StdRng,
    queue: VecDeque<(Instant, Direction, Datagram)>,
    near: Arc<MediaStream>,
    far: Arc<MediaStream>,
    counters: Arc<Counters>,
}

impl Worker {
    fn run(&mut self, forward: Receiver<Datagram>, backward: Receiver<Datagram>, stop: Receiver<()>) {
        loop {
            let timeout = self
                .queue
                .front()
                .map(|(due, _, _)| due.saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::from_millis(100));

            select! {
                recv(stop) -> _ => break,
                recv(forward) -> msg => match msg {
                    Ok(datagram) => self.enqueue(Direction::Forward, datagram),
                    Err(_) => break,
                },
                recv(backward) -> msg => match msg {
                    Ok(datagram) => self.enqueue(Direction::Backward, datagram),
                    Err(_) => break,
                },
                default(timeout) => {}
            }

            self.deliver_due();
        }
        debug!(queued = self.queue.len(), "Link stopped");
    }

    fn enqueue(&mut self, direction: Direction, datagram: Datagram) {
        if direction == Direction::Forward
            && matches!(datagram, Datagram::Rtp(_))
            && self.rng.gen::<f64>() < self.loss
        {
            self.counters.rtp_dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Link dropped RTP packet");
            return;
        }
        self.queue
            .push_back((Instant::now() + self.latency, direction, datagram));
    }

    fn deliver_due(&mut self) {
        let now = Instant::now();
        while self.queue.front().is_some_and(|(due, _, _)| *due <= now) {
            let Some((_, direction, datagram)) = self.queue.pop_front() else {
                break;
            };
            self.deliver(direction, datagram);
        }
    }

    fn deliver(&self, direction: Direction, datagram: Datagram) {
        let (target, rtcp_counter) = match direction {
            Direction::Forward => (&self.far, &self.counters.rtcp_forwarded),
            Direction::Backward => (&self.near, &self.counters.rtcp_returned),
        };

        let result = match &datagram {
            Datagram::Rtp(data) => {
                self.counters.rtp_forwarded.fetch_add(1, Ordering::Relaxed);
                target.receive_rtp(data).map(|_| ())
            }
            Datagram::Rtcp(data) => {
                rtcp_counter.fetch_add(1, Ordering::Relaxed);
                target.receive_rtcp(data)
            }
        };
        if let Err(e) = result {
            debug!(?direction, error = %e, "Datagram rejected");
        }
    }
}
