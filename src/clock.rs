use std::time::{SystemTime, UNIX_EPOCH};

/// A source of millisecond timestamps for the append path.
///
/// This trait allows the user to choose between wall-clock time (slower, but
/// standard) and TSC-based time (faster, monotonic, but requires calibration).
/// The buffer additionally clamps assigned timestamps to be non-decreasing,
/// so a clock that jumps backward never produces out-of-order records.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current time in milliseconds since the UNIX epoch.
    fn now_ms(&self) -> i64;
}

/// A clock that uses `std::time::SystemTime`.
///
/// This is the default implementation. It is susceptible to NTP adjustments
/// but requires no calibration.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before UNIX epoch");
        i64::try_from(timestamp.as_millis()).expect("system time exceeds timestamp range")
    }
}

/// A clock that uses the CPU's Time-Stamp Counter (TSC) via the `quanta`
/// crate.
///
/// Significantly cheaper per call and monotonic. It anchors to SystemTime at
/// initialization and then uses TSC ticks to progress, ensuring no backward
/// jumps.
#[derive(Debug, Clone)]
pub struct QuantaClock {
    clock: quanta::Clock,
    start_wall_ms: i64,
    start_instant: quanta::Instant,
}

impl Default for QuantaClock {
    fn default() -> Self {
        let clock = quanta::Clock::new();
        let start_instant = clock.now();
        let start_wall_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before UNIX epoch")
            .as_millis() as i64;

        Self {
            clock,
            start_wall_ms,
            start_instant,
        }
    }
}

impl QuantaClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for QuantaClock {
    fn now_ms(&self) -> i64 {
        let delta = self.clock.now().duration_since(self.start_instant);
        self.start_wall_ms + delta.as_millis() as i64
    }
}
