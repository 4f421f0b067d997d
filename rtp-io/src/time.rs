//! Time utilities for RTP media transport
//!
//! Provides a monotonic clock for reassembly timeouts and RTP timestamp
//! derivation, plus NTP wall-clock values used in RTCP sender reports.

use std::ops::{Add, Sub};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970)
pub const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Monotonic timestamp
///
/// Wraps `std::time::Instant` and adds conversion to RTP media clock units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(Instant);

impl Timestamp {
    /// Get the current timestamp
    #[inline]
    pub fn now() -> Self {
        Timestamp(Instant::now())
    }

    /// Create a timestamp from a base instant
    #[inline]
    pub fn from_instant(instant: Instant) -> Self {
        Timestamp(instant)
    }

    /// Get the underlying instant
    #[inline]
    pub fn as_instant(&self) -> Instant {
        self.0
    }

    /// Duration since an earlier timestamp (zero if `earlier` is later)
    #[inline]
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }

    /// Elapsed time since this timestamp
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }

    /// Ticks of a `clock_rate` Hz media clock elapsed since `reference`
    ///
    /// The result wraps at 32 bits like the RTP timestamp field.
    pub fn as_rtp_units_since(&self, reference: Timestamp, clock_rate: u32) -> u32 {
        let elapsed = self.duration_since(reference);
        let ticks = elapsed.as_micros() * clock_rate as u128 / 1_000_000;
        ticks as u32
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, duration: Duration) -> Timestamp {
        Timestamp(self.0 + duration)
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    fn sub(self, other: Timestamp) -> Duration {
        self.duration_since(other)
    }
}

/// 64-bit NTP timestamp: seconds since 1900 and a 32-bit binary fraction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NtpTime {
    pub seconds: u32,
    pub fraction: u32,
}

impl NtpTime {
    /// Current wall-clock time
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Convert a wall-clock time; times before 1970 clamp to the Unix epoch
    pub fn from_system_time(time: SystemTime) -> Self {
        let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self::from_unix_duration(since_epoch)
    }

    /// Build from a duration since the Unix epoch
    pub fn from_unix_duration(since_epoch: Duration) -> Self {
        let seconds = since_epoch.as_secs().wrapping_add(NTP_UNIX_OFFSET) as u32;
        let fraction = ((since_epoch.subsec_nanos() as u64) << 32) / 1_000_000_000;
        NtpTime {
            seconds,
            fraction: fraction as u32,
        }
    }

    /// Duration since the Unix epoch (era 0)
    pub fn to_unix_duration(self) -> Duration {
        let secs = (self.seconds as u64).saturating_sub(NTP_UNIX_OFFSET);
        let nanos = ((self.fraction as u64) * 1_000_000_000) >> 32;
        Duration::new(secs, nanos as u32)
    }

    /// Pack into the 64-bit wire representation
    #[inline]
    pub fn as_u64(self) -> u64 {
        ((self.seconds as u64) << 32) | self.fraction as u64
    }

    #[inline]
    pub fn from_u64(value: u64) -> Self {
        NtpTime {
            seconds: (value >> 32) as u32,
            fraction: value as u32,
        }
    }

    /// Middle 32 bits, as carried in the LSR field of a report block
    #[inline]
    pub fn middle_32(self) -> u32 {
        (self.seconds << 16) | (self.fraction >> 16)
    }
}

/// Encode a duration in 1/65536 second units (the DLSR field format)
pub fn duration_to_compact(duration: Duration) -> u32 {
    let secs = duration.as_secs().min(0xFFFF) as u32;
    let frac = (duration.subsec_nanos() as u64 * 65_536) / 1_000_000_000;
    (secs << 16) | frac as u32
}

/// Decode a 1/65536 second value back into a duration
pub fn compact_to_duration(compact: u32) -> Duration {
    let secs = (compact >> 16) as u64;
    let nanos = ((compact & 0xFFFF) as u64 * 1_000_000_000) >> 16;
    Duration::new(secs, nanos as u32)
}

/// Timer for periodic operations
///
/// Used for report intervals and keyframe request rate limiting.
pub struct Timer {
    interval: Duration,
    last_fire: Timestamp,
}

impl Timer {
    /// Create a new timer with the given interval
    pub fn new(interval: Duration) -> Self {
        Timer {
            interval,
            last_fire: Timestamp::now(),
        }
    }

    /// Check if the timer has expired
    pub fn expired(&self) -> bool {
        self.last_fire.elapsed() >= self.interval
    }

    /// Reset the timer
    pub fn reset(&mut self) {
        self.last_fire = Timestamp::now();
    }

    /// Get time until next expiration
    pub fn time_until_expiration(&self) -> Duration {
        self.interval.saturating_sub(self.last_fire.elapsed())
    }

    /// Fire the timer if expired, returning true if it fired
    pub fn try_fire(&mut self) -> bool {
        if self.expired() {
            self.reset();
            true
        } else {
            false
        }
    }
}
