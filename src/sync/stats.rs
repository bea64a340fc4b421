//! Statistics records emitted after every processed observation.

use std::time::Duration;

use crate::protocol::Timestamp;

use super::calibration::Calibration;

/// Why an observation was rejected without touching the calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The remote clock was observed to move backwards; the estimator
    /// is permanently corrupted.
    Corrupted,
    /// Local receive before local send, or remote send before remote
    /// receive.
    CausalityViolation,
    /// Round trip exceeded the configured absolute limit.
    RoundTripLimit,
    /// Round trip more than twice the median of the recent window.
    MedianOutlier,
    /// Round trip more than twice the running average.
    AverageOutlier,
}

/// One record per observation handed to the estimator.
///
/// Delivered on a broadcast channel; handles that do not subscribe pay
/// nothing, slow subscribers lose old records rather than blocking the
/// polling loop.
///
/// Records are emitted for rejected observations too, going beyond the
/// log line the filters write: `rejected` names the filter that fired
/// and `calibration` then carries the unchanged mapping. Subscribers
/// that only care about accepted exchanges can filter on
/// `rejected.is_none()`.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Measured round-trip time of this exchange.
    pub rtt: Duration,
    /// Running-average round-trip time after this exchange.
    pub rtt_avg: Duration,
    /// Local midpoint of the exchange.
    pub local_mid: Timestamp,
    /// Remote midpoint of the exchange.
    pub remote_mid: Timestamp,
    /// What the (pre-update) calibration estimated for `local_mid`.
    pub estimated_remote: Timestamp,
    /// Signed change in reported clock value at local receive time,
    /// comparing pre- and post-commit calibration. Zero when nothing
    /// was committed.
    pub discontinuity_ns: i64,
    /// Whether the estimator considers itself synchronized.
    pub synced: bool,
    /// Goodness of fit of the regression candidate, when available.
    pub r_squared: f64,
    /// Calibration in effect after this observation.
    pub calibration: Calibration,
    /// Poll timeout chosen for the next exchange.
    pub next_timeout: Duration,
    /// Whether a (possibly clamped) candidate calibration was committed.
    pub committed: bool,
    /// Set when the observation was rejected by one of the filters.
    pub rejected: Option<RejectReason>,
}
