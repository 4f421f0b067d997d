//! Sender to receiver tests
//!
//! Each test wires a `Sender` straight into a `Receiver` and checks that
//! frames come out the other side intact.

use bytes::Bytes;
use crossbeam::channel::{unbounded, Receiver as Channel, Sender as ChannelSender};
use parking_lot::Mutex;
use rtp_protocol::nack::NackTable;
use rtp_protocol::{
    Codec, Format, Frame, NackRequest, Receiver, ReceiverConfig, ReceiverEvents, RtpPacket,
    SendError, Sender, SenderEvents, SeqNumber,
};
use std::sync::Arc;
use std::time::Duration;

/// Delivers every outbound packet to the receiver, except those filtered out
struct Wire {
    receiver: Arc<Receiver>,
    drop: Mutex<Vec<SeqNumber>>,
}

impl SenderEvents for Wire {
    fn on_outbound_packet(&self, _ssrc: u32, packet: &RtpPacket, wire: &Bytes) {
        let mut drop = self.drop.lock();
        if let Some(pos) = drop.iter().position(|&seq| seq == packet.seq) {
            drop.remove(pos);
            return;
        }
        self.receiver.insert_bytes(wire).unwrap();
    }
}

struct Collect {
    frames: ChannelSender<Frame>,
    nacks: ChannelSender<NackRequest>,
}

impl ReceiverEvents for Collect {
    fn on_frame(&self, _ssrc: u32, _format: &Format, frame: &Frame) {
        let _ = self.frames.send(frame.clone());
    }

    fn on_nack(&self, _ssrc: u32, _format: &Format, request: NackRequest) {
        let _ = self.nacks.send(request);
    }
}

struct Pair {
    sender: Sender,
    receiver: Arc<Receiver>,
    wire: Arc<Wire>,
    frames: Channel<Frame>,
    nacks: Channel<NackRequest>,
}

fn pair(codec: Codec, start: u16) -> Pair {
    let config = ReceiverConfig {
        nack_idle_poll: Duration::from_secs(30),
        ..ReceiverConfig::default()
    };
    pair_with(codec, start, config)
}

fn pair_with(codec: Codec, start: u16, config: ReceiverConfig) -> Pair {
    let format = Format::with_defaults(codec, 96);
    let sender = Sender::with_initial(0xC0FFEE, format, SeqNumber::new(start), 1000);
    let receiver = Arc::new(Receiver::with_config(0xC0FFEE, format, config));

    let (frames_tx, frames) = unbounded();
    let (nacks_tx, nacks) = unbounded();
    receiver.subscribe(Arc::new(Collect {
        frames: frames_tx,
        nacks: nacks_tx,
    }));

    let wire = Arc::new(Wire {
        receiver: Arc::clone(&receiver),
        drop: Mutex::new(Vec::new()),
    });
    sender.subscribe(wire.clone());

    Pair {
        sender,
        receiver,
        wire,
        frames,
        nacks,
    }
}

#[test]
fn test_audio_frames_across_sequence_wrap() {
    let p = pair(Codec::Opus, 65_530);
    for i in 0..12u8 {
        p.sender.send_frame(&[i; 120], 960).unwrap();
    }

    let frames: Vec<Frame> = p.frames.try_iter().collect();
    assert_eq!(frames.len(), 12);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.data, Bytes::from(vec![i as u8; 120]));
        assert_eq!(frame.pts, 1000 + 960 * i as u32);
    }
    assert_eq!(p.receiver.stats().lost, 0);
    assert_eq!(p.sender.last_seq(), SeqNumber::new(5));
}

#[test]
fn test_aac_access_units() {
    for codec in [Codec::Mpeg4Generic, Codec::Mp4aLatm] {
        let p = pair(codec, 0);
        let units: Vec<Vec<u8>> = vec![vec![0x21; 300], vec![0x42; 700], vec![0x63; 1]];
        for unit in &units {
            p.sender.send_frame(unit, 1024).unwrap();
        }

        let frames: Vec<Frame> = p.frames.try_iter().collect();
        assert_eq!(frames.len(), 3, "{}", codec);
        for (frame, unit) in frames.iter().zip(&units) {
            assert_eq!(&frame.data[..], &unit[..]);
            assert_eq!(frame.codec, codec);
        }
    }
}

#[test]
fn test_oversized_aac_rejected() {
    let p = pair(Codec::Mpeg4Generic, 0);
    let result = p.sender.send_frame(&vec![0; 0x2000], 1024);
    assert!(matches!(result, Err(SendError::FrameTooLarge { .. })));
    assert_eq!(p.sender.stats().packets_sent, 0);
}

#[test]
fn test_h264_fragmented_idr() {
    let p = pair(Codec::H264, 100);
    let sps = [0x67, 0x42, 0xC0, 0x1E];
    let pps = [0x68, 0xCE, 0x3C, 0x80];
    let mut idr = vec![0x65];
    idr.extend((0..5000).map(|i| (i % 251 + 1) as u8));

    let mut frame = Vec::new();
    for nal in [&sps[..], &pps[..], &idr[..]] {
        frame.extend_from_slice(&[0, 0, 0, 1]);
        frame.extend_from_slice(nal);
    }
    let packets = p.sender.send_frame(&frame, 3000).unwrap();
    assert_eq!(packets, 2 + 5);

    let frames: Vec<Frame> = p.frames.try_iter().collect();
    assert_eq!(frames.len(), 3);
    assert_eq!(&frames[0].data[4..], &sps);
    assert_eq!(&frames[1].data[4..], &pps);
    assert_eq!(&frames[2].data[..4], &[0, 0, 0, 1]);
    assert_eq!(&frames[2].data[4..], &idr[..]);
    assert!(!p.receiver.waiting_for_keyframe());
}

#[test]
fn test_h264_inter_frames_wait_for_idr() {
    let p = pair(Codec::H264, 0);
    p.sender.send_frame(&[0, 0, 0, 1, 0x41, 0x9A, 0x01], 3000).unwrap();
    assert!(p.frames.try_recv().is_err());
    assert_eq!(p.receiver.stats().frames_dropped, 1);

    p.sender.send_frame(&[0, 0, 0, 1, 0x65, 0x88, 0x80], 3000).unwrap();
    p.sender.send_frame(&[0, 0, 0, 1, 0x41, 0x9A, 0x02], 3000).unwrap();
    let frames: Vec<Frame> = p.frames.try_iter().collect();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].pts, 1000 + 6000);
}

#[test]
fn test_vp8_multi_packet_key_frame() {
    let p = pair(Codec::Vp8, 0);
    let mut key = vec![0x10, 0x02, 0x00, 0x9D, 0x01, 0x2A];
    key.resize(3000, 0x77);
    assert_eq!(p.sender.send_frame(&key, 3000).unwrap(), 3);

    let mut inter = vec![0x11];
    inter.resize(500, 0x33);
    p.sender.send_frame(&inter, 3000).unwrap();

    let frames: Vec<Frame> = p.frames.try_iter().collect();
    assert_eq!(frames.len(), 2);
    assert_eq!(&frames[0].data[..], &key[..]);
    assert_eq!(&frames[1].data[..], &inter[..]);
}

#[test]
fn test_vp8_inter_frame_keeps_receiver_waiting() {
    let p = pair(Codec::Vp8, 0);
    assert!(p.receiver.waiting_for_keyframe());

    // P bit set in the VP8 payload header: not decodable on its own
    let inter = [0x11, 0x00, 0x00, 0x42];
    assert_eq!(p.sender.send_frame(&inter, 3000).unwrap(), 1);
    assert!(p.frames.try_recv().is_err());
    assert!(p.receiver.waiting_for_keyframe());
    assert_eq!(p.receiver.stats().frames_dropped, 1);

    let mut key = vec![0x10, 0x02, 0x00, 0x9D, 0x01, 0x2A];
    key.resize(64, 0x55);
    p.sender.send_frame(&key, 3000).unwrap();
    assert!(!p.receiver.waiting_for_keyframe());
    assert_eq!(&p.frames.try_recv().unwrap().data[..], &key[..]);
}

#[test]
fn test_lost_packet_recovered_by_retransmission() {
    let config = ReceiverConfig {
        nack_busy_poll: Duration::from_millis(5),
        nack_idle_poll: Duration::from_millis(50),
        ..ReceiverConfig::default()
    };
    let p = pair_with(Codec::Pcmu, 500, config);
    p.wire.drop.lock().push(SeqNumber::new(502));

    for i in 0..5u8 {
        p.sender.send_frame(&[i; 160], 160).unwrap();
    }
    assert_eq!(p.frames.try_iter().count(), 2);

    let request = p.nacks.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(request, NackRequest::new(SeqNumber::new(502), 0));
    assert_eq!(p.sender.retransmit(&request), 1);

    let frames: Vec<Frame> = p.frames.try_iter().collect();
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].data[0], 2);
    assert_eq!(p.sender.stats().packets_retransmitted, 1);
    assert!(p.receiver.pending_nacks().is_empty());
}

#[test]
fn test_nack_retry_exhaustion() {
    let mut table = NackTable::new();
    assert_eq!(table.add_range(SeqNumber::new(65_534), SeqNumber::new(1)), 4);

    for _ in 0..2 {
        assert!(!table.record_attempt(SeqNumber::new(0), 3));
    }
    assert!(table.record_attempt(SeqNumber::new(0), 3));
    assert!(!table.contains(SeqNumber::new(0)));
    assert_eq!(table.len(), 3);

    let order: Vec<u16> = table.snapshot().iter().map(|e| e.seq.as_raw()).collect();
    assert_eq!(order, vec![65_534, 65_535, 1]);
}
