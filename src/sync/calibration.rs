//! Affine clock calibration and the linear-regression clock fit.
//!
//! A calibration maps local monotonic ticks to estimated remote time:
//!
//! ```text
//! remote = external + (tick - internal) * rate_num / rate_den
//! ```
//!
//! The fit keeps a sliding window of (local midpoint, remote midpoint)
//! pairs and produces a candidate calibration by ordinary least
//! squares, together with the goodness-of-fit r². The estimator
//! decides whether a candidate is actually committed.

use std::collections::VecDeque;

use crate::protocol::Timestamp;

/// Number of observation pairs retained for the regression.
const FIT_WINDOW: usize = 32;

/// Minimum pairs before the fit produces a candidate.
const FIT_THRESHOLD: usize = 4;

/// Fixed denominator used when converting the fitted slope to a
/// rational rate. 2^30 keeps `tick_delta * rate_num` within u128 for
/// any realistic tick values.
const RATE_DENOM: u64 = 1 << 30;

/// Affine mapping from local monotonic ticks to estimated remote time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    /// Local tick the mapping is anchored at.
    pub internal: Timestamp,
    /// Remote time corresponding to `internal`.
    pub external: Timestamp,
    /// Rate numerator.
    pub rate_num: u64,
    /// Rate denominator.
    pub rate_den: u64,
}

impl Calibration {
    /// Identity mapping anchored at the epoch.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            internal: Timestamp::ZERO,
            external: Timestamp::ZERO,
            rate_num: 1,
            rate_den: 1,
        }
    }

    /// Anchor a 1:1 mapping at the given (local, remote) pair.
    #[must_use]
    pub fn anchored(internal: Timestamp, external: Timestamp) -> Self {
        Self {
            internal,
            external,
            rate_num: 1,
            rate_den: 1,
        }
    }

    /// Map a local tick to estimated remote time.
    ///
    /// Ticks before the anchor extrapolate backwards, saturating at 0.
    #[must_use]
    pub fn adjust(&self, tick: Timestamp) -> Timestamp {
        let internal = self.internal.as_nanos();
        let external = self.external.as_nanos();
        let tick = tick.as_nanos();
        if tick >= internal {
            let delta = scale(tick - internal, self.rate_num, self.rate_den);
            Timestamp::from_nanos(external.saturating_add(delta))
        } else {
            let delta = scale(internal - tick, self.rate_num, self.rate_den);
            Timestamp::from_nanos(external.saturating_sub(delta))
        }
    }

    /// Rate as a floating-point ratio, for reporting only.
    #[must_use]
    #[allow(clippy::cast_precision_loss, reason = "diagnostic value only")]
    pub fn rate(&self) -> f64 {
        self.rate_num as f64 / self.rate_den as f64
    }
}

/// `value * num / den` without intermediate overflow.
fn scale(value: u64, num: u64, den: u64) -> u64 {
    let scaled = u128::from(value) * u128::from(num) / u128::from(den);
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

/// Sliding-window least-squares fit of remote time over local ticks.
#[derive(Debug, Default)]
pub struct ClockFit {
    window: VecDeque<(u64, u64)>,
}

impl ClockFit {
    /// Create an empty fit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pairs currently in the window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Whether the window is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Add one (local midpoint, remote midpoint) observation pair.
    pub fn add(&mut self, local: Timestamp, remote: Timestamp) {
        if self.window.len() == FIT_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back((local.as_nanos(), remote.as_nanos()));
    }

    /// Produce a candidate calibration and its r².
    ///
    /// Returns `None` while the window holds fewer than the threshold
    /// number of pairs, or when the fitted slope is not a plausible
    /// clock rate (zero or negative).
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap,
        reason = "offsets from the window mean are small"
    )]
    pub fn fit(&self) -> Option<(Calibration, f64)> {
        let n = self.window.len();
        if n < FIT_THRESHOLD {
            return None;
        }

        // Work on offsets from the window means so f64 keeps full
        // precision on nanosecond-scale values.
        #[allow(clippy::cast_possible_truncation, reason = "window sums fit in u128 exactly")]
        let mean_x = (self.window.iter().map(|&(x, _)| u128::from(x)).sum::<u128>()
            / n as u128) as u64;
        #[allow(clippy::cast_possible_truncation, reason = "window sums fit in u128 exactly")]
        let mean_y = (self.window.iter().map(|&(_, y)| u128::from(y)).sum::<u128>()
            / n as u128) as u64;

        let mut sxx = 0.0f64;
        let mut syy = 0.0f64;
        let mut sxy = 0.0f64;
        for &(x, y) in &self.window {
            let dx = x.wrapping_sub(mean_x) as i64 as f64;
            let dy = y.wrapping_sub(mean_y) as i64 as f64;
            sxx += dx * dx;
            syy += dy * dy;
            sxy += dx * dy;
        }

        if sxx <= 0.0 {
            // All local ticks identical; no slope to be had.
            return None;
        }

        let slope = sxy / sxx;
        if slope <= 0.0 {
            return None;
        }

        let r_squared = if syy <= 0.0 {
            // Perfectly flat remote values still "fit" exactly.
            0.999_999
        } else {
            ((sxy * sxy) / (sxx * syy)).clamp(0.0, 0.999_999)
        };

        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "slope is near 1.0 for any physical clock pair"
        )]
        let rate_num = (slope * RATE_DENOM as f64).round() as u64;
        if rate_num == 0 {
            return None;
        }

        // The regression line passes through the window's mean point.
        let candidate = Calibration {
            internal: Timestamp::from_nanos(mean_x),
            external: Timestamp::from_nanos(mean_y),
            rate_num,
            rate_den: RATE_DENOM,
        };
        Some((candidate, r_squared))
    }
}
