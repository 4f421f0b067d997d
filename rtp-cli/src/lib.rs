//! RTP CLI Library
//!
//! Shared functionality for the RTP command-line tools.

pub mod config;
pub mod frames;
pub mod link;
pub mod stats;

pub use config::{Config, ConfigError, LinkConfig, ReceiverTuning, SessionConfig};
pub use frames::{split_access_units, AccessUnit};
pub use link::{LinkStats, LossyLink};
pub use stats::{display_compact_stats, display_receiver_stats, display_sender_stats, format_bytes};
