//! Sequence Number Handling
//!
//! RTP uses 16-bit sequence numbers that wrap every 65536 packets. This
//! module provides the serial-number comparison used to order them, and the
//! extended-sequence window that unwraps them into a monotonically growing
//! 32-bit space (cycle count in the high half).

use std::fmt;
use std::ops::{Add, Sub};

/// Half of the 16-bit sequence space
const HALF_SPACE: i32 = 0x8000;

/// One full 16-bit cycle in the extended space
const CYCLE: u32 = 0x1_0000;

/// Sequence number with 16-bit wraparound semantics
///
/// Ordering follows serial-number arithmetic: `a` precedes `b` when `b` is
/// less than half the sequence space ahead of it. Two numbers exactly half
/// the space apart precede each other in neither direction.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct SeqNum(u16);

impl SeqNum {
    #[inline]
    pub const fn new(value: u16) -> Self {
        SeqNum(value)
    }

    #[inline]
    pub fn as_raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub fn next(self) -> Self {
        SeqNum(self.0.wrapping_add(1))
    }

    /// Serial "less than": true if `other` is ahead of `self`
    pub fn lt(self, other: SeqNum) -> bool {
        let diff = other.0 as i32 - self.0 as i32;
        if diff > 0 {
            diff < HALF_SPACE
        } else if diff < 0 {
            diff < -HALF_SPACE
        } else {
            false
        }
    }

    /// Serial "greater than"
    #[inline]
    pub fn gt(self, other: SeqNum) -> bool {
        other.lt(self)
    }

    /// Number of steps forward from `self` to `other`, modulo 2^16
    #[inline]
    pub fn forward_distance(self, other: SeqNum) -> u16 {
        other.0.wrapping_sub(self.0)
    }
}

impl fmt::Debug for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeqNum({})", self.0)
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for SeqNum {
    fn from(value: u16) -> Self {
        SeqNum(value)
    }
}

impl From<SeqNum> for u16 {
    fn from(seq: SeqNum) -> u16 {
        seq.0
    }
}

impl Add<u16> for SeqNum {
    type Output = SeqNum;

    fn add(self, rhs: u16) -> SeqNum {
        SeqNum(self.0.wrapping_add(rhs))
    }
}

impl Sub<u16> for SeqNum {
    type Output = SeqNum;

    fn sub(self, rhs: u16) -> SeqNum {
        SeqNum(self.0.wrapping_sub(rhs))
    }
}

/// How the extended sequence window follows incoming sequence numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequencePolicy {
    /// Serial comparison against the highest number seen. Newer packets
    /// advance the highest, starting a new cycle on wrap; late packets may
    /// lower the base into their own cycle; duplicates change nothing.
    #[default]
    Rfc3550,
    /// Advance by the forward distance from the previously received raw
    /// number, whatever its order. The base is never corrected, and a
    /// duplicate counts as a full cycle.
    DeltaOnly,
}

/// Extended sequence window for one source
///
/// `highest - base + 1` is the number of sequence slots spanned and never
/// underflows: the base only moves down, below the highest.
#[derive(Debug, Clone, Default)]
pub struct SequenceWindow {
    base: u32,
    highest: u32,
    /// Highest number at the last reset; `None` until the first reset
    last_reset: Option<u32>,
    previous: Option<SeqNum>,
}

impl SequenceWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the first sequence number has been seen
    pub fn is_seeded(&self) -> bool {
        self.previous.is_some()
    }

    /// Account for `seq` and return how far the highest number moved forward
    pub fn observe(&mut self, seq: SeqNum, policy: SequencePolicy) -> u32 {
        let previous = match self.previous.replace(seq) {
            Some(previous) => previous,
            None => {
                self.base = CYCLE | seq.as_raw() as u32;
                self.highest = self.base;
                return 0;
            }
        };

        match policy {
            SequencePolicy::Rfc3550 => self.observe_serial(seq),
            SequencePolicy::DeltaOnly => {
                let delta = if seq.as_raw() > previous.as_raw() {
                    (seq.as_raw() - previous.as_raw()) as u32
                } else {
                    seq.as_raw() as u32 + CYCLE - previous.as_raw() as u32
                };
                self.highest = self.highest.wrapping_add(delta);
                delta
            }
        }
    }

    fn observe_serial(&mut self, seq: SeqNum) -> u32 {
        let old = SeqNum(self.highest as u16);
        let mut cycle = self.highest & 0xFFFF_0000;
        let numeric_diff = seq.as_raw() as i32 - old.as_raw() as i32;

        if old.lt(seq) {
            if numeric_diff < 0 {
                cycle = cycle.wrapping_add(CYCLE);
            }
            let extended = cycle | seq.as_raw() as u32;
            if extended > self.highest {
                self.highest = extended;
            }
            old.forward_distance(seq) as u32
        } else {
            // Late or duplicate packet
            if numeric_diff >= HALF_SPACE {
                cycle = cycle.wrapping_sub(CYCLE);
            }
            let extended = cycle | seq.as_raw() as u32;
            if extended < self.base {
                self.base = extended;
            }
            0
        }
    }

    /// Snapshot the highest number as the baseline for interval statistics
    pub fn reset(&mut self) {
        self.last_reset = Some(self.highest);
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn highest(&self) -> u32 {
        self.highest
    }

    /// Baseline for interval statistics
    ///
    /// Before the first reset this sits one below the base, so the first
    /// packet's slot counts toward the interval.
    pub fn last_reset(&self) -> u32 {
        self.last_reset.unwrap_or(self.base.wrapping_sub(1))
    }

    /// Sequence slots spanned since the first packet
    pub fn expected(&self) -> u32 {
        self.highest.wrapping_sub(self.base).wrapping_add(1)
    }

    /// Sequence slots the highest number advanced since the last reset
    pub fn expected_since_reset(&self) -> u32 {
        self.highest.wrapping_sub(self.last_reset())
    }
}
