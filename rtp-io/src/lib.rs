//! RTP I/O and Platform Abstraction
//!
//! Clock and threading helpers shared by the protocol crate: monotonic and
//! NTP time, periodic timers, and the wake signal used by background workers.
//! Socket I/O lives with the embedding application.

pub mod signal;
pub mod time;

pub use signal::Signal;
pub use time::{compact_to_duration, duration_to_compact, NtpTime, Timer, Timestamp};
