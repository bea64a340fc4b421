//! Nanosecond timestamps and NTP 32.32 fixed-point conversion.
//!
//! All clocks in this crate count nanoseconds in an unsigned 64-bit
//! value whose epoch is implementation-defined (for the local side it
//! is process start, for the remote side whatever the server uses).
//! The wire formats carry either the raw nanosecond count (simple
//! variant) or an NTP-style 32.32 fixed-point value (seconds in the
//! high word, fractional seconds in the low word).

use std::fmt;
use std::time::Duration;

/// Nanoseconds per second.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A point in time, in nanoseconds since an implementation-defined epoch.
///
/// `Timestamp::NONE` is the "unknown/invalid" sentinel; arithmetic on
/// a `NONE` timestamp is a caller bug and is guarded at the call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Sentinel for "unknown/invalid".
    pub const NONE: Timestamp = Timestamp(u64::MAX);

    /// The epoch itself.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Create from a raw nanosecond count.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Raw nanosecond count.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Whether this is the `NONE` sentinel.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }

    /// Whether this is a real time value.
    #[must_use]
    pub const fn is_some(self) -> bool {
        !self.is_none()
    }

    /// Saturating add of a duration.
    #[must_use]
    pub fn saturating_add(self, d: Duration) -> Self {
        #[allow(clippy::cast_possible_truncation, reason = "u64 nanoseconds cover ~584 years")]
        let d = d.as_nanos() as u64;
        Self(self.0.saturating_add(d))
    }

    /// Saturating difference to an earlier timestamp, as a duration.
    #[must_use]
    pub fn saturating_since(self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    /// Signed difference `self - other` in nanoseconds.
    #[must_use]
    #[allow(clippy::cast_possible_wrap, reason = "differences of real clocks fit in i64")]
    pub fn diff_nanos(self, other: Timestamp) -> i64 {
        self.0.wrapping_sub(other.0) as i64
    }

    /// Midpoint between this timestamp and a later one.
    ///
    /// Computed as `self + (later - self) / 2` to stay overflow-free
    /// for any pair of valid inputs.
    #[must_use]
    pub fn midpoint(self, later: Timestamp) -> Self {
        Self(self.0 + later.0.saturating_sub(self.0) / 2)
    }

    /// Convert to NTP 32.32 fixed point.
    ///
    /// The `NONE` sentinel maps to an all-ones field, which no real
    /// server will produce (it would be the very last representable
    /// instant at full fractional precision).
    #[must_use]
    pub fn to_ntp_fixed(self) -> u64 {
        if self.is_none() {
            return u64::MAX;
        }
        let seconds = self.0 / NANOS_PER_SEC;
        let nanos = self.0 % NANOS_PER_SEC;
        let fraction = (u128::from(nanos) << 32) / u128::from(NANOS_PER_SEC);
        #[allow(clippy::cast_possible_truncation, reason = "fraction < 2^32 by construction")]
        let fraction = fraction as u64;
        (seconds << 32) | fraction
    }

    /// Convert from NTP 32.32 fixed point.
    ///
    /// Round-trips through [`Timestamp::to_ntp_fixed`] with at most one
    /// tick (2^-32 s) of error per conversion.
    #[must_use]
    pub fn from_ntp_fixed(fixed: u64) -> Self {
        if fixed == u64::MAX {
            return Self::NONE;
        }
        let seconds = fixed >> 32;
        let fraction = fixed & 0xffff_ffff;
        let nanos = (u128::from(fraction) * u128::from(NANOS_PER_SEC)) >> 32;
        #[allow(clippy::cast_possible_truncation, reason = "nanos < 10^9 by construction")]
        let nanos = nanos as u64;
        Self(seconds * NANOS_PER_SEC + nanos)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return write!(f, "<none>");
        }
        let s = self.0 / NANOS_PER_SEC;
        let ns = self.0 % NANOS_PER_SEC;
        write!(f, "{}:{:02}:{:02}.{:09}", s / 3600, (s / 60) % 60, s % 60, ns)
    }
}

impl From<Duration> for Timestamp {
    fn from(d: Duration) -> Self {
        #[allow(clippy::cast_possible_truncation, reason = "u64 nanoseconds cover ~584 years")]
        let nanos = d.as_nanos() as u64;
        Self(nanos)
    }
}
