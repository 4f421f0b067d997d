//! RTP Loopback - pushes a media file through a lossy in-process link
//!
//! A sender stream packetizes the input, a link thread drops some of the RTP
//! packets, and a receiver stream reassembles frames with NACK recovery while
//! both sides exchange RTCP reports.

use anyhow::Context;
use clap::Parser;
use parking_lot::Mutex;
use rtp::transport::ChannelTransport;
use rtp::{Codec, Format, Frame, KeyframeRequestKind, MediaStream, StreamEvents};
use rtp_cli::{display_compact_stats, display_receiver_stats, display_sender_stats, split_access_units};
use rtp_cli::{Config, LossyLink};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rtp-loopback")]
#[command(about = "Send a media file through RTP over a simulated lossy link", long_about = None)]
struct Args {
    /// Input file (Annex-B for H.264, raw frames otherwise)
    #[arg(short, long)]
    input: PathBuf,

    /// Codec: h264, vp8, aac, latm, pcma, pcmu, g722, opus
    #[arg(short, long, default_value = "h264")]
    codec: String,

    /// Output file for reconstructed frames
    #[arg(short, long)]
    output: PathBuf,

    /// Packet loss on the forward path, in percent
    #[arg(long)]
    loss: Option<f64>,

    /// Bytes per frame for non-H.264 input
    #[arg(long, default_value = "0")]
    frame_size: usize,

    /// RTP payload type
    #[arg(long, default_value = "96")]
    payload_type: u8,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write an example configuration to this path and exit
    #[arg(long)]
    write_config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn parse_codec(name: &str) -> anyhow::Result<Codec> {
    let codec = match name.to_ascii_lowercase().as_str() {
        "aac" => Codec::Mpeg4Generic,
        "latm" => Codec::Mp4aLatm,
        other => Codec::from_encoding_name(other),
    };
    if codec == Codec::Other {
        anyhow::bail!("Unsupported codec '{}'", name);
    }
    Ok(codec)
}

/// Writes frames arriving at the receiver stream to the output file
struct FrameSink {
    writer: Mutex<BufWriter<File>>,
    frames: AtomicU64,
    keyframe_requests: AtomicU64,
}

impl StreamEvents for FrameSink {
    fn on_frame(&self, ssrc: u32, _format: &Format, frame: &Frame) {
        if let Err(e) = self.writer.lock().write_all(&frame.data) {
            tracing::error!(ssrc = format_args!("{:#010X}", ssrc), error = %e, "Failed to write frame");
            return;
        }
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    fn on_keyframe_required(&self, ssrc: u32, kind: KeyframeRequestKind) {
        tracing::info!(ssrc = format_args!("{:#010X}", ssrc), ?kind, "Peer requested a key frame");
        self.keyframe_requests.fetch_add(1, Ordering::Relaxed);
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Some(path) = &args.write_config {
        Config::example().to_file(path)?;
        tracing::info!("Wrote example configuration to {}", path.display());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(loss) = args.loss {
        config.link.loss_percent = loss;
    }
    config.validate()?;

    let codec = parse_codec(&args.codec)?;
    let format = Format::with_defaults(codec, args.payload_type);
    let input = fs::read(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let units = split_access_units(codec, &input, args.frame_size);
    tracing::info!(
        codec = %codec,
        units = units.len(),
        loss = config.link.loss_percent,
        "RTP loopback starting"
    );

    let (near_transport, near_rx) = ChannelTransport::new();
    let (far_transport, far_rx) = ChannelTransport::new();
    let near = Arc::new(MediaStream::new("loopback-sender", Arc::new(near_transport)));
    let far = Arc::new(MediaStream::new("loopback-receiver", Arc::new(far_transport)));

    let sink = Arc::new(FrameSink {
        writer: Mutex::new(BufWriter::new(File::create(&args.output)?)),
        frames: AtomicU64::new(0),
        keyframe_requests: AtomicU64::new(0),
    });
    far.subscribe(sink.clone());
    near.subscribe(sink.clone());

    let ssrc = near.add_sender(format)?;
    far.add_receiver(ssrc, format, config.receiver.to_receiver_config())?;

    let link = LossyLink::spawn(&config.link, near_rx, far_rx, Arc::clone(&near), Arc::clone(&far));

    let start = Instant::now();
    let mut last_report = start;
    let mut last_stats = start;
    for unit in &units {
        if let Err(e) = near.send_frame(ssrc, &unit.data, unit.duration) {
            tracing::warn!(error = %e, "Skipping frame");
        }

        if last_report.elapsed() >= config.session.report_interval() {
            near.send_report()?;
            far.send_report()?;
            last_report = Instant::now();
        }
        if let Some(interval) = config.session.stats_interval() {
            if last_stats.elapsed() >= interval {
                if let (Some(s), Some(r)) = (near.sender_stats(ssrc), far.receiver_stats(ssrc)) {
                    display_compact_stats(&s, &r, start.elapsed());
                }
                last_stats = Instant::now();
            }
        }
        thread::sleep(config.session.frame_interval());
    }

    tracing::info!("End of input reached, draining");
    let drain_until = Instant::now() + config.session.drain();
    while Instant::now() < drain_until {
        far.poll();
        if last_report.elapsed() >= config.session.report_interval() {
            near.send_report()?;
            far.send_report()?;
            last_report = Instant::now();
        }
        thread::sleep(config.session.frame_interval().max(std::time::Duration::from_millis(10)));
    }
    near.send_bye(Some("end of input"))?;

    let link_stats = link.shutdown();
    sink.writer.lock().flush()?;

    if let Some(stats) = near.sender_stats(ssrc) {
        display_sender_stats(&stats);
    }
    if let Some(stats) = far.receiver_stats(ssrc) {
        display_receiver_stats(&stats);
    }
    println!(
        "\nLink: {} RTP forwarded / {} dropped, {} RTCP forward / {} back",
        link_stats.rtp_forwarded,
        link_stats.rtp_dropped,
        link_stats.rtcp_forwarded,
        link_stats.rtcp_returned
    );
    println!(
        "Wrote {} frames to {} in {:.1}s",
        sink.frames.load(Ordering::Relaxed),
        args.output.display(),
        start.elapsed().as_secs_f64()
    );

    Ok(())
}
