use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rtp_io::NtpTime;
use rtp_protocol::rtcp::{parse_compound, serialize_compound, ReportBlock, RtcpPacket, SdesChunk};
use rtp_protocol::sender::{H264Packetizer, Packetizer};
use rtp_protocol::{RtpPacket, SenderReport, SeqNumber};

fn bench_rtp_packet_serialize(c: &mut Criterion) {
    let mut packet = RtpPacket::new(96, 0x1234_5678, SeqNumber::new(1000), 90_000);
    packet.set_payload(&[0u8; 1200]);

    let mut group = c.benchmark_group("rtp_packet");
    group.throughput(Throughput::Bytes(packet.size() as u64));
    group.bench_function("serialize", |b| {
        let mut buf = BytesMut::with_capacity(1500);
        b.iter(|| {
            buf.clear();
            black_box(&packet).serialize(&mut buf);
            black_box(&buf);
        });
    });

    let bytes = packet.to_bytes();
    group.bench_function("parse", |b| {
        b.iter(|| {
            let packet = RtpPacket::parse(black_box(&bytes)).unwrap();
            black_box(packet);
        });
    });
    group.finish();
}

fn bench_rtcp_compound(c: &mut Criterion) {
    let block = ReportBlock {
        ssrc: 0xABCD,
        fraction_lost: 12,
        cumulative_lost: 40,
        highest_seq: 70_000,
        jitter: 33,
        last_sr: 0x1234_5678,
        delay_since_last_sr: 0x0001_0000,
    };
    let packets = vec![
        RtcpPacket::SenderReport(SenderReport {
            ssrc: 0x1234,
            ntp: NtpTime::now(),
            rtp_timestamp: 90_000,
            packet_count: 500,
            octet_count: 600_000,
            reports: vec![block; 4],
        }),
        RtcpPacket::SourceDescription(vec![SdesChunk {
            ssrc: 0x1234,
            cname: "bench@example".to_string(),
        }]),
    ];

    c.bench_function("rtcp_compound_serialize", |b| {
        b.iter(|| black_box(serialize_compound(black_box(&packets))));
    });

    let bytes = serialize_compound(&packets);
    c.bench_function("rtcp_compound_parse", |b| {
        b.iter(|| black_box(parse_compound(black_box(&bytes)).unwrap()));
    });
}

fn bench_h264_packetize(c: &mut Criterion) {
    let mut frame = vec![0, 0, 0, 1, 0x65];
    frame.extend(std::iter::repeat(0xAB).take(20_000));

    let mut group = c.benchmark_group("h264");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("packetize_idr", |b| {
        b.iter(|| black_box(H264Packetizer.packetize(black_box(&frame), 3000).unwrap()));
    });
    group.finish();
}

fn bench_seq_number_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequence_number");

    group.bench_function("next", |b| {
        let mut seq = SeqNumber::new(1000);
        b.iter(|| {
            seq = seq.next();
            black_box(seq);
        });
    });

    group.bench_function("forward_diff", |b| {
        let a = SeqNumber::new(65_000);
        let z = SeqNumber::new(200);
        b.iter(|| black_box(black_box(a).forward_diff(black_box(z))));
    });

    group.bench_function("is_ahead_of", |b| {
        let a = SeqNumber::new(65_000);
        let z = SeqNumber::new(200);
        b.iter(|| black_box(black_box(z).is_ahead_of(black_box(a))));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_rtp_packet_serialize,
    bench_rtcp_compound,
    bench_h264_packetize,
    bench_seq_number_ops
);
criterion_main!(benches);
