//! Controller timing configuration.

use format_dectape::WORD_LINES;

/// Tape-motion timing in simulated ticks.
///
/// `line_time` is the tick cost of one 3-bit tape line at speed
/// (nominally 33 µs of simulated time). `accel_time` and `decel_time` are
/// the full ramp durations from stop to speed and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingParams {
    line_time: u64,
    accel_time: u64,
    decel_time: u64,
}

impl TimingParams {
    /// Build validated timing parameters. `line_time` must be nonzero and
    /// both ramps must last at least one line time.
    #[must_use]
    pub const fn new(line_time: u64, accel_time: u64, decel_time: u64) -> Option<Self> {
        if line_time == 0 || accel_time < line_time || decel_time < line_time {
            return None;
        }
        Some(Self {
            line_time,
            accel_time,
            decel_time,
        })
    }

    #[must_use]
    pub const fn line_time(&self) -> u64 {
        self.line_time
    }

    #[must_use]
    pub const fn accel_time(&self) -> u64 {
        self.accel_time
    }

    #[must_use]
    pub const fn decel_time(&self) -> u64 {
        self.decel_time
    }

    /// Ticks between word events at speed.
    #[must_use]
    pub const fn word_time(&self) -> u64 {
        WORD_LINES as u64 * self.line_time
    }
}

impl Default for TimingParams {
    fn default() -> Self {
        Self {
            line_time: 12,
            accel_time: 54_000,
            decel_time: 72_000,
        }
    }
}
