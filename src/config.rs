// Compile-time kernel configuration
use log::LevelFilter;

/// PIT frequency driving the round-robin scheduler
pub const SCHEDULER_HZ: u32 = 100;

/// Periodic interrupt rate the RTC is programmed with
pub const RTC_BASE_HZ: u32 = 1024;

/// Virtual RTC rate a freshly opened `rtc` descriptor starts at
pub const RTC_DEFAULT_HZ: u32 = 2;

/// Program each terminal starts, and restarts when it exits
pub const ROOT_PROGRAM: &[u8] = b"shell";

/// Upper bound handed to `log::set_max_level`; the `log-*` cargo features
/// cap it further at compile time.
pub const LOG_LEVEL: LevelFilter = LevelFilter::Trace;
