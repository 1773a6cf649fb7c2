//! Wall-clock time and NTP conversion
//!
//! [`WallTime`] is a microsecond-resolution point on the Unix time line,
//! normalized so that the microsecond part is always below one million.
//! Statistics take it as an explicit argument so callers (and tests) control
//! the clock.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MICROS_PER_SEC: i64 = 1_000_000;

/// Seconds from 1900-01-01 (NTP epoch) to 1970-01-01 (Unix epoch)
pub const NTP_UNIX_OFFSET: u32 = 0x83AA_7E80;

/// Microsecond-resolution wall-clock time
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WallTime {
    secs: i64,
    micros: u32,
}

impl WallTime {
    /// Build a time from possibly unnormalized parts
    pub fn new(secs: i64, micros: i64) -> Self {
        let secs = secs.saturating_add(micros.div_euclid(MICROS_PER_SEC));
        let micros = micros.rem_euclid(MICROS_PER_SEC) as u32;
        WallTime { secs, micros }
    }

    pub fn from_micros(total: i64) -> Self {
        Self::new(0, total)
    }

    /// Current system time
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(since) => Self::new(since.as_secs() as i64, since.subsec_micros() as i64),
            Err(err) => {
                let before = err.duration();
                Self::new(-(before.as_secs() as i64), -(before.subsec_micros() as i64))
            }
        }
    }

    /// Convert a 64-bit NTP timestamp given as its two 32-bit halves
    ///
    /// The fraction is rounded to the nearest microsecond. Seconds wrap at
    /// 2^32 the way NTP era arithmetic does, covering 1970 through 2106.
    pub fn from_ntp(msw: u32, lsw: u32) -> Self {
        let secs = msw.wrapping_sub(NTP_UNIX_OFFSET) as i64;
        // lsw * 10^6 / 2^32 == lsw * 15625 / 2^26
        let micros = ((lsw as u64 * 15625 + (1 << 25)) >> 26) as i64;
        Self::new(secs, micros)
    }

    pub fn secs(&self) -> i64 {
        self.secs
    }

    pub fn subsec_micros(&self) -> u32 {
        self.micros
    }

    pub fn is_zero(&self) -> bool {
        self.secs == 0 && self.micros == 0
    }

    pub fn as_micros(&self) -> i64 {
        self.secs
            .saturating_mul(MICROS_PER_SEC)
            .saturating_add(self.micros as i64)
    }

    /// Signed microseconds from `earlier` to `self`
    pub fn micros_since(&self, earlier: WallTime) -> i64 {
        self.as_micros().saturating_sub(earlier.as_micros())
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future
    pub fn saturating_duration_since(&self, earlier: WallTime) -> Duration {
        let micros = self.micros_since(earlier).max(0);
        Duration::from_micros(micros as u64)
    }

    /// Shift by a signed offset in seconds
    ///
    /// Whole seconds and the microsecond remainder are each truncated toward
    /// zero before being applied.
    pub fn offset_by_secs_f64(&self, offset: f64) -> WallTime {
        let magnitude = offset.abs();
        let whole = magnitude.trunc();
        let whole_secs = whole as i64;
        let micros = ((magnitude - whole) * MICROS_PER_SEC as f64) as i64;

        if offset >= 0.0 {
            WallTime::new(self.secs.saturating_add(whole_secs), self.micros as i64 + micros)
        } else {
            WallTime::new(self.secs.saturating_sub(whole_secs), self.micros as i64 - micros)
        }
    }
}

impl fmt::Debug for WallTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WallTime({}.{:06})", self.secs, self.micros)
    }
}

impl fmt::Display for WallTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.secs, self.micros)
    }
}

impl From<SystemTime> for WallTime {
    fn from(time: SystemTime) -> Self {
        Self::from_system_time(time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(WallTime::new(1, 1_500_000), WallTime::new(2, 500_000));
        assert_eq!(WallTime::new(2, -1), WallTime::new(1, 999_999));
        assert_eq!(WallTime::from_micros(-1).secs(), -1);
        assert_eq!(WallTime::from_micros(-1).subsec_micros(), 999_999);
    }

    #[test]
    fn test_from_ntp() {
        assert_eq!(WallTime::from_ntp(NTP_UNIX_OFFSET, 0), WallTime::new(0, 0));
        // Half a second
        assert_eq!(
            WallTime::from_ntp(NTP_UNIX_OFFSET + 10, 0x8000_0000),
            WallTime::new(10, 500_000)
        );
        // Rounds up into the next second
        assert_eq!(
            WallTime::from_ntp(NTP_UNIX_OFFSET, u32::MAX),
            WallTime::new(1, 0)
        );
    }

    #[test]
    fn test_from_ntp_next_era() {
        // 2036-02-07 rolls the NTP seconds counter over
        let t = WallTime::from_ntp(5, 0);
        assert_eq!(t.secs(), (u32::MAX - NTP_UNIX_OFFSET) as i64 + 6);
    }

    #[test]
    fn test_offsets() {
        let base = WallTime::new(100, 900_000);
        assert_eq!(base.offset_by_secs_f64(0.25), WallTime::new(101, 150_000));
        assert_eq!(base.offset_by_secs_f64(-1.5), WallTime::new(99, 400_000));
        assert_eq!(base.offset_by_secs_f64(-0.125), WallTime::new(100, 775_000));
        assert_eq!(base.offset_by_secs_f64(0.0), base);
    }

    #[test]
    fn test_durations() {
        let a = WallTime::new(10, 0);
        let b = WallTime::new(10, 250);
        assert_eq!(b.micros_since(a), 250);
        assert_eq!(a.micros_since(b), -250);
        assert_eq!(b.saturating_duration_since(a), Duration::from_micros(250));
        assert_eq!(a.saturating_duration_since(b), Duration::ZERO);
    }

    #[test]
    fn test_system_time_conversion() {
        let t = UNIX_EPOCH + Duration::new(5, 123_456_789);
        assert_eq!(WallTime::from(t), WallTime::new(5, 123_456));
    }
}
