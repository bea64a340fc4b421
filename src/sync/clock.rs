//! Local monotonic clock source.

use std::time::Instant;

use crate::protocol::Timestamp;

/// Monotonic nanosecond counter, anchored at construction time.
///
/// All handles for one endpoint share the same instance so their
/// local tick values are directly comparable.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    /// Create a clock anchored at now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Nanoseconds elapsed since the anchor.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        #[allow(clippy::cast_possible_truncation, reason = "u64 nanoseconds cover ~584 years")]
        let nanos = self.epoch.elapsed().as_nanos() as u64;
        Timestamp::from_nanos(nanos)
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
