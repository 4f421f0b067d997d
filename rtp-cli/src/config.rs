//! Configuration file support for the loopback tool

use rtp::protocol::MAX_RING_CAPACITY;
use rtp::ReceiverConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Simulated network link between the two streams
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Share of RTP packets dropped on the way to the receiver, in percent
    #[serde(default)]
    pub loss_percent: f64,
    /// One-way delay added to every datagram
    #[serde(default = "default_latency")]
    pub latency_ms: u64,
    /// Seed for the loss generator; random when absent
    pub seed: Option<u64>,
}

fn default_latency() -> u64 {
    5
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            loss_percent: 0.0,
            latency_ms: default_latency(),
            seed: None,
        }
    }
}

impl LinkConfig {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

/// Receiver tuning; absent fields keep the library defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceiverTuning {
    pub delay_ms: Option<u64>,
    pub max_nack_retries: Option<u32>,
    pub nack_flush_threshold: Option<usize>,
    pub keyframe_interval_ms: Option<u64>,
    pub capacity: Option<usize>,
}

impl ReceiverTuning {
    /// Merge onto the library defaults
    pub fn to_receiver_config(&self) -> ReceiverConfig {
        let mut config = ReceiverConfig::default();
        if let Some(ms) = self.delay_ms {
            config.delay = Duration::from_millis(ms);
        }
        if self.max_nack_retries.is_some() {
            config.max_nack_retries = self.max_nack_retries;
        }
        if let Some(threshold) = self.nack_flush_threshold {
            config.nack_flush_threshold = threshold;
        }
        if let Some(ms) = self.keyframe_interval_ms {
            config.keyframe_interval = Duration::from_millis(ms);
        }
        if let Some(capacity) = self.capacity {
            config.capacity = capacity;
        }
        config
    }
}

/// Session timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Interval between RTCP reports
    #[serde(default = "default_report_interval")]
    pub report_interval_ms: u64,
    /// Wall time between consecutive frames
    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: u64,
    /// Time allowed for retransmissions after the last frame
    #[serde(default = "default_drain")]
    pub drain_ms: u64,
    /// Statistics interval in seconds; 0 prints only the final summary
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

fn default_report_interval() -> u64 {
    500
}

fn default_frame_interval() -> u64 {
    2
}

fn default_drain() -> u64 {
    1500
}

fn default_stats_interval() -> u64 {
    1
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            report_interval_ms: default_report_interval(),
            frame_interval_ms: default_frame_interval(),
            drain_ms: default_drain(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

impl SessionConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }
}

/// Combined configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub receiver: ReceiverTuning,
    #[serde(default)]
    pub session: SessionConfig,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Configuration with a lossy link, for trying out recovery
    pub fn example() -> Self {
        Config {
            link: LinkConfig {
                loss_percent: 5.0,
                latency_ms: 20,
                seed: Some(7),
            },
            receiver: ReceiverTuning {
                delay_ms: Some(500),
                max_nack_retries: Some(3),
                ..Default::default()
            },
            session: SessionConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..100.0).contains(&self.link.loss_percent) {
            return Err(ConfigError::Invalid(format!(
                "loss_percent must be in [0, 100), got {}",
                self.link.loss_percent
            )));
        }
        if let Some(capacity) = self.receiver.capacity {
            if !capacity.is_power_of_two() || capacity > MAX_RING_CAPACITY {
                return Err(ConfigError::Invalid(format!(
                    "capacity must be a power of two no larger than {}, got {}",
                    MAX_RING_CAPACITY, capacity
                )));
            }
        }
        if self.session.report_interval_ms == 0 {
            return Err(ConfigError::Invalid("report_interval_ms must be non-zero".into()));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
