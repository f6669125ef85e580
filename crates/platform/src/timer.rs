//! Free-running timestamp counter
//!
//! Samples are stamped with a 32-bit tick count taken at trigger time.
//! The counter wraps; consumers compare timestamps with wrapping arithmetic.

/// Free-running monotonic tick source.
pub trait TimestampCounter {
    /// Current tick count (wraps at `u32::MAX`).
    fn now(&self) -> u32;

    /// Tick frequency in Hz.
    fn frequency_hz(&self) -> u32;
}

impl<T: TimestampCounter + ?Sized> TimestampCounter for &T {
    fn now(&self) -> u32 {
        (**self).now()
    }

    fn frequency_hz(&self) -> u32 {
        (**self).frequency_hz()
    }
}

/// Timestamp counter backed by the Embassy time driver.
///
/// On hardware the time driver runs from a hardware timer, so this is the
/// same tick base the executor uses for [`embassy_time::Ticker`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbassyTimestamp;

impl TimestampCounter for EmbassyTimestamp {
    #[allow(clippy::cast_possible_truncation)] // wrapping 32-bit stamp is intended
    fn now(&self) -> u32 {
        embassy_time::Instant::now().as_ticks() as u32
    }

    #[allow(clippy::cast_possible_truncation)] // TICK_HZ is at most a few MHz
    fn frequency_hz(&self) -> u32 {
        embassy_time::TICK_HZ as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embassy_timestamp_is_monotonic_over_short_interval() {
        let counter = EmbassyTimestamp;
        let first = counter.now();
        let second = counter.now();
        assert!(second.wrapping_sub(first) < counter.frequency_hz());
    }
}
