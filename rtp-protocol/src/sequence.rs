//! Sequence Number Handling
//!
//! RTP sequence numbers (16-bit) and timestamps (32-bit) wrap around, so
//! ordering is only meaningful relative to a nearby value. The free functions
//! here implement wrap-aware distance and ordering over any unsigned width and
//! an arbitrary modulus (`0` selects the type's natural range). [`SeqNumber`]
//! exposes them for the 16-bit RTP sequence space.
//!
//! Values passed with a non-zero modulus must already be reduced below it.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Unsigned integer usable with the wrap-aware primitives
pub trait SeqUint: Copy + Eq + fmt::Debug {
    /// Width of the type in bits
    const BITS: u32;

    fn to_u128(self) -> u128;

    /// Truncating conversion back from the wide representation
    fn from_u128(value: u128) -> Self;
}

macro_rules! impl_seq_uint {
    ($($ty:ty),*) => {
        $(
            impl SeqUint for $ty {
                const BITS: u32 = <$ty>::BITS;

                #[inline]
                fn to_u128(self) -> u128 {
                    self as u128
                }

                #[inline]
                fn from_u128(value: u128) -> Self {
                    value as $ty
                }
            }
        )*
    };
}

impl_seq_uint!(u8, u16, u32, u64);

#[inline]
fn modulus_of<T: SeqUint>(modulus: u64) -> u128 {
    if modulus == 0 {
        1u128 << T::BITS
    } else {
        modulus as u128
    }
}

/// Steps needed to go forward from `a` to `b`
#[inline]
pub fn forward_diff<T: SeqUint>(a: T, b: T, modulus: u64) -> T {
    let m = modulus_of::<T>(modulus);
    let (a, b) = (a.to_u128(), b.to_u128());
    let diff = if a <= b { b - a } else { m - (a - b) };
    T::from_u128(diff % m)
}

/// Steps needed to go backward from `a` to `b`
#[inline]
pub fn reverse_diff<T: SeqUint>(a: T, b: T, modulus: u64) -> T {
    forward_diff(b, a, modulus)
}

/// The shorter of the forward and backward distances between `a` and `b`
#[inline]
pub fn min_diff<T: SeqUint>(a: T, b: T, modulus: u64) -> T {
    let fwd = forward_diff(a, b, modulus).to_u128();
    let rev = reverse_diff(a, b, modulus).to_u128();
    T::from_u128(fwd.min(rev))
}

/// True when `a` is not behind `b`
///
/// `a` is ahead of `b` if it lies within half the modulus going forward from
/// `b`. When the modulus is even and the two values are exactly half of it
/// apart, the numerically larger one is considered ahead.
#[inline]
pub fn ahead_or_at<T: SeqUint>(a: T, b: T, modulus: u64) -> bool {
    let m = modulus_of::<T>(modulus);
    let half = m / 2;
    let fwd = forward_diff(b, a, modulus).to_u128();
    if m % 2 == 0 && fwd == half {
        b.to_u128() < a.to_u128()
    } else {
        fwd <= half
    }
}

/// True when `a` is strictly ahead of `b`
#[inline]
pub fn ahead_of<T: SeqUint>(a: T, b: T, modulus: u64) -> bool {
    a != b && ahead_or_at(a, b, modulus)
}

/// `a + n` modulo the modulus
#[inline]
pub fn add<T: SeqUint>(a: T, n: T, modulus: u64) -> T {
    let m = modulus_of::<T>(modulus);
    T::from_u128((a.to_u128() + n.to_u128() % m) % m)
}

/// `a - n` modulo the modulus
#[inline]
pub fn subtract<T: SeqUint>(a: T, n: T, modulus: u64) -> T {
    let m = modulus_of::<T>(modulus);
    T::from_u128((a.to_u128() + m - n.to_u128() % m) % m)
}

/// 16-bit RTP sequence number with wraparound semantics
///
/// Intentionally not `PartialOrd`: ordering between sequence numbers is
/// circular and must go through [`SeqNumber::is_ahead_of`] and friends.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct SeqNumber(u16);

impl SeqNumber {
    #[inline]
    pub const fn new(value: u16) -> Self {
        SeqNumber(value)
    }

    /// Get the raw sequence number value
    #[inline]
    pub fn as_raw(self) -> u16 {
        self.0
    }

    /// Get the next sequence number
    #[inline]
    pub fn next(self) -> Self {
        SeqNumber(self.0.wrapping_add(1))
    }

    /// Get the previous sequence number
    #[inline]
    pub fn prev(self) -> Self {
        SeqNumber(self.0.wrapping_sub(1))
    }

    /// Steps forward from `self` to `other`
    #[inline]
    pub fn forward_diff(self, other: SeqNumber) -> u16 {
        forward_diff(self.0, other.0, 0)
    }

    /// Shorter distance between `self` and `other` in either direction
    #[inline]
    pub fn min_diff(self, other: SeqNumber) -> u16 {
        min_diff(self.0, other.0, 0)
    }

    #[inline]
    pub fn is_ahead_of(self, other: SeqNumber) -> bool {
        ahead_of(self.0, other.0, 0)
    }

    #[inline]
    pub fn is_ahead_or_at(self, other: SeqNumber) -> bool {
        ahead_or_at(self.0, other.0, 0)
    }

    /// Circular ordering, valid for values less than half the space apart
    pub fn cmp_wrapping(self, other: SeqNumber) -> Ordering {
        if self == other {
            Ordering::Equal
        } else if self.is_ahead_of(other) {
            Ordering::Greater
        } else {
            Ordering::Less
        }
    }

    /// Slot index in a ring buffer of `capacity` entries
    #[inline]
    pub fn slot(self, capacity: usize) -> usize {
        self.0 as usize % capacity
    }

    /// Iterate `self..=end` going forward (empty if `end` is behind `self`)
    pub fn range_inclusive(self, end: SeqNumber) -> impl Iterator<Item = SeqNumber> {
        let count = if end.is_ahead_or_at(self) {
            self.forward_diff(end) as u32 + 1
        } else {
            0
        };
        (0..count).map(move |i| self + i as u16)
    }
}

impl fmt::Debug for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeqNumber({})", self.0)
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for SeqNumber {
    fn from(value: u16) -> Self {
        SeqNumber(value)
    }
}

impl From<SeqNumber> for u16 {
    fn from(seq: SeqNumber) -> u16 {
        seq.0
    }
}

impl Add<u16> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: u16) -> SeqNumber {
        SeqNumber(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u16> for SeqNumber {
    fn add_assign(&mut self, rhs: u16) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl Sub<u16> for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, rhs: u16) -> SeqNumber {
        SeqNumber(self.0.wrapping_sub(rhs))
    }
}
