//! Statistics display and formatting

use rtp::{ReceiverStats, SenderStats};
use std::io::Write;
use std::time::Duration;

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format RTT in human-readable form
pub fn format_rtt(rtt: Option<Duration>) -> String {
    let Some(rtt) = rtt else {
        return "N/A".to_string();
    };
    let micros = rtt.as_micros();
    if micros >= 1_000_000 {
        format!("{:.2}s", rtt.as_secs_f64())
    } else if micros >= 1_000 {
        format!("{:.2}ms", micros as f64 / 1_000.0)
    } else {
        format!("{}µs", micros)
    }
}

/// Fraction lost (1/256 units) as a percentage
pub fn format_fraction(fraction: u8) -> String {
    format!("{:.1}%", fraction as f64 * 100.0 / 256.0)
}

/// Format duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Display sender statistics
pub fn display_sender_stats(stats: &SenderStats) {
    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ SENDER {:#010X}                                          │", stats.ssrc);
    println!("├─────────────────────────────────────────────────────────────┤");
    println!(
        "│ Sent:          {} packets / {}",
        stats.packets_sent,
        format_bytes(stats.bytes_sent)
    );
    println!("│ Retransmitted: {} packets", stats.packets_retransmitted);
    println!(
        "│ Feedback:      {} NACK / {} PLI / {} FIR",
        stats.nacks, stats.plis, stats.firs
    );
    println!(
        "│ Peer report:   lost {} ({}) / jitter {} / RTT {}",
        stats.remote_lost,
        format_fraction(stats.remote_fraction_lost),
        stats.remote_jitter,
        format_rtt(stats.rtt)
    );
    println!("└─────────────────────────────────────────────────────────────┘");
}

/// Display receiver statistics
pub fn display_receiver_stats(stats: &ReceiverStats) {
    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ RECEIVER {:#010X}                                        │", stats.ssrc);
    println!("├─────────────────────────────────────────────────────────────┤");
    println!(
        "│ Received:      {} packets / {} ({} stale)",
        stats.packets_received,
        format_bytes(stats.bytes_received),
        stats.packets_stale
    );
    println!(
        "│ Frames:        {} delivered / {} dropped",
        stats.frames_received, stats.frames_dropped
    );
    println!(
        "│ Loss:          {} cumulative ({} last period)",
        stats.lost,
        format_fraction(stats.fraction_lost)
    );
    println!("│ Jitter:        {} units", stats.jitter);
    println!(
        "│ Feedback:      {} NACK / {} PLI / {} FIR",
        stats.nacks, stats.plis, stats.firs
    );
    println!(
        "│ Peer sent:     {} packets / {}",
        stats.remote_packets_sent,
        format_bytes(stats.remote_bytes_sent)
    );
    println!("└─────────────────────────────────────────────────────────────┘");
}

/// Display compact stats on one line (for continuous updates)
pub fn display_compact_stats(sender: &SenderStats, receiver: &ReceiverStats, elapsed: Duration) {
    print!(
        "\r[{:8}] Sent: {} pkts | Resent: {} | Recv: {} pkts | Frames: {} ok / {} dropped         ",
        format_duration(elapsed),
        sender.packets_sent,
        sender.packets_retransmitted,
        receiver.packets_received,
        receiver.frames_received,
        receiver.frames_dropped
    );
    let _ = std::io::stdout().flush();
}
