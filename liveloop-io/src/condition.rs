//! Socket readiness conditions
//!
//! A condition set is the bit mask a handler asks to be woken for, and also
//! what the multiplexer reports back for each descriptor.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Set of readiness conditions on a socket
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Condition(u8);

impl Condition {
    /// No condition. Registering with this mask removes the handler.
    pub const NONE: Condition = Condition(0);
    /// Socket has data to read (or hung up)
    pub const READABLE: Condition = Condition(0b001);
    /// Socket can accept writes
    pub const WRITABLE: Condition = Condition(0b010);
    /// Exceptional condition (out-of-band data, error)
    pub const EXCEPTION: Condition = Condition(0b100);
    /// Every condition
    pub const ALL: Condition = Condition(0b111);

    /// Build a condition set from raw bits, dropping unknown bits
    #[inline]
    pub const fn from_bits(bits: u8) -> Self {
        Condition(bits & Self::ALL.0)
    }

    /// Raw bit representation
    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    #[inline]
    pub const fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    #[inline]
    pub const fn is_exception(self) -> bool {
        self.0 & Self::EXCEPTION.0 != 0
    }

    /// Returns true if every bit of `other` is also set in `self`
    #[inline]
    pub const fn contains(self, other: Condition) -> bool {
        self.0 & other.0 == other.0
    }

    /// Conditions present in both sets
    #[inline]
    pub const fn intersection(self, other: Condition) -> Condition {
        Condition(self.0 & other.0)
    }

    /// Conditions present in either set
    #[inline]
    pub const fn union(self, other: Condition) -> Condition {
        Condition(self.0 | other.0)
    }
}

impl BitOr for Condition {
    type Output = Condition;

    fn bitor(self, rhs: Condition) -> Condition {
        self.union(rhs)
    }
}

impl BitOrAssign for Condition {
    fn bitor_assign(&mut self, rhs: Condition) {
        *self = self.union(rhs);
    }
}

impl BitAnd for Condition {
    type Output = Condition;

    fn bitand(self, rhs: Condition) -> Condition {
        self.intersection(rhs)
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Condition({})", self)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        if self.is_readable() {
            f.write_str("r")?;
        }
        if self.is_writable() {
            f.write_str("w")?;
        }
        if self.is_exception() {
            f.write_str("e")?;
        }
        Ok(())
    }
}
