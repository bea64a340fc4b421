//! The synchronization estimator.
//!
//! Turns one request/response exchange (four raw timestamps) into a
//! filtered update of the affine calibration, and decides how long to
//! wait before the next poll. The filtering pipeline rejects single
//! bad packets without ever permanently de-synchronizing on one
//! outlier, and the discontinuity clamp keeps the reported clock
//! smooth even when a still-plausible observation disagrees with the
//! recent trend.
//!
//! All mutation happens on the endpoint's polling task (single
//! writer); handles only ever read the published snapshot.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{broadcast, watch};

use crate::protocol::Timestamp;

use super::calibration::{Calibration, ClockFit};
use super::clock::MonotonicClock;
use super::handle::ClockConfig;
use super::stats::{RejectReason, SyncReport};

/// Length of the RTT window used by the median pre-filter.
const MEDIAN_WINDOW: usize = 9;

/// Consecutive skipped commits before a resync is forced.
const MAX_SKIPPED_UPDATES: u32 = 5;

/// Retry delay after a rejected sample.
const QUICK_RETRY: Duration = Duration::from_millis(250);

/// Cap on r² in the poll-interval formula; keeps the computed interval
/// finite (at most 100 s before the configured clamp).
const R_SQUARED_CAP: f64 = 0.99999;

/// Capacity of the statistics broadcast channel.
const STATS_CHANNEL_CAPACITY: usize = 16;

/// The four raw timestamps of one request/response exchange.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Observation {
    /// Local time the request left.
    pub local_send: Timestamp,
    /// Remote time the request arrived.
    pub remote_receive: Timestamp,
    /// Remote time the response left.
    pub remote_send: Timestamp,
    /// Local time the response arrived.
    pub local_receive: Timestamp,
}

/// Effective filter limits, merged over all attached handles.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits {
    /// Absolute round-trip bound; `None` means unlimited.
    pub roundtrip_limit: Option<Duration>,
    /// Floor on the time between two polls.
    pub minimum_update_interval: Duration,
}

/// Per-endpoint estimator state. Owned by the polling task.
#[derive(Debug)]
pub(crate) struct Estimator {
    poll_timeout: Duration,
    rtt_window: [u64; MEDIAN_WINDOW],
    rtt_fill: usize,
    rtt_idx: usize,
    window_primed: bool,
    rtt_avg: Option<u64>,
    last_remote_receive: Option<u64>,
    corrupted: bool,
    calibration: Option<Calibration>,
    fit: ClockFit,
    skipped_updates: u32,
    synced: bool,
    last_committed_remote_mid: Option<u64>,
}

impl Estimator {
    /// Create an estimator. `poll_timeout` is the upper bound on the
    /// computed poll interval and the fallback wait after a send.
    pub(crate) fn new(poll_timeout: Duration) -> Self {
        Self {
            poll_timeout,
            rtt_window: [0; MEDIAN_WINDOW],
            rtt_fill: 0,
            rtt_idx: 0,
            window_primed: false,
            rtt_avg: None,
            last_remote_receive: None,
            corrupted: false,
            calibration: None,
            fit: ClockFit::new(),
            skipped_updates: 0,
            synced: false,
            last_committed_remote_mid: None,
        }
    }

    /// Whether the remote clock has been observed moving backwards.
    pub(crate) fn is_corrupted(&self) -> bool {
        self.corrupted
    }

    /// Calibration currently in effect, if any commit has happened.
    pub(crate) fn calibration(&self) -> Option<Calibration> {
        self.calibration
    }

    /// Whether the estimator currently considers itself synchronized.
    pub(crate) fn is_synced(&self) -> bool {
        self.synced
    }

    /// Process one observation and produce the statistics record,
    /// which carries the poll timeout to use for the next exchange.
    pub(crate) fn observe(&mut self, obs: Observation, limits: &Limits) -> SyncReport {
        // 1. Monotonicity guard: a remote clock that moves backwards
        // has reset (or is being fed bad data) and can never be
        // trusted again.
        if self.corrupted {
            return self.reject(RejectReason::Corrupted, 0);
        }
        if let Some(last) = self.last_remote_receive {
            if obs.remote_receive.as_nanos() < last {
                tracing::warn!(
                    remote_receive = obs.remote_receive.as_nanos(),
                    last_remote_receive = last,
                    "remote clock moved backwards, marking estimator corrupted"
                );
                self.corrupted = true;
                return self.reject(RejectReason::Corrupted, 0);
            }
        }

        // 2. Causality: the response cannot arrive before the request
        // left, on either side's own bookkeeping.
        if obs.local_receive < obs.local_send || obs.remote_send < obs.remote_receive {
            tracing::debug!("rejecting observation violating causality");
            return self.reject(RejectReason::CausalityViolation, 0);
        }

        let local_span = obs.local_receive.as_nanos() - obs.local_send.as_nanos();
        let remote_span = obs.remote_send.as_nanos() - obs.remote_receive.as_nanos();
        let rtt = local_span.saturating_sub(remote_span);

        // 3. Absolute round-trip bound.
        if let Some(limit) = limits.roundtrip_limit {
            #[allow(clippy::cast_possible_truncation, reason = "limits are well below u64 range")]
            if rtt > limit.as_nanos() as u64 {
                tracing::debug!(rtt, limit = ?limit, "round trip over configured limit");
                return self.reject(RejectReason::RoundTripLimit, rtt);
            }
        }

        // 4. Median pre-filter over the last few round trips. Only
        // meaningful once the ring has filled at least once.
        self.rtt_window[self.rtt_idx] = rtt;
        self.rtt_idx = (self.rtt_idx + 1) % MEDIAN_WINDOW;
        if self.rtt_fill < MEDIAN_WINDOW {
            self.rtt_fill += 1;
            if self.rtt_fill == MEDIAN_WINDOW {
                self.window_primed = true;
            }
        }
        if self.window_primed {
            let mut sorted = self.rtt_window;
            sorted.sort_unstable();
            let median = sorted[MEDIAN_WINDOW / 2];
            if rtt > 2 * median {
                tracing::debug!(rtt, median, "round trip too far above median");
                return self.reject(RejectReason::MedianOutlier, rtt);
            }
        }

        // 5. Running average, updated asymmetrically before the bound
        // check so genuine improvements are tracked even when this
        // sample is subsequently thrown away.
        let avg = match self.rtt_avg {
            None => rtt,
            Some(avg) if rtt < avg => (3 * avg + rtt) / 4,
            Some(avg) => (15 * avg + rtt) / 16,
        };
        self.rtt_avg = Some(avg);
        if rtt > 2 * avg {
            tracing::debug!(rtt, avg, "round trip too far above running average");
            return self.reject(RejectReason::AverageOutlier, rtt);
        }

        // The sample is good; it now feeds the monotonicity guard.
        self.last_remote_receive = Some(obs.remote_receive.as_nanos());

        // 6. Candidate calibration from the regression over midpoints.
        let local_mid = obs.local_send.midpoint(obs.local_receive);
        let remote_mid = obs.remote_receive.midpoint(obs.remote_send);
        self.fit.add(local_mid, remote_mid);

        let Some(current) = self.calibration else {
            // First accepted observation: anchor an initial 1:1
            // local-remote relation. Counts as a commit.
            let calibration = Calibration::anchored(local_mid, remote_mid);
            self.calibration = Some(calibration);
            self.synced = true;
            self.last_committed_remote_mid = Some(remote_mid.as_nanos());
            let next_timeout = self.next_timeout(None, rtt, limits);
            return SyncReport {
                rtt: Duration::from_nanos(rtt),
                rtt_avg: Duration::from_nanos(avg),
                local_mid,
                remote_mid,
                estimated_remote: remote_mid,
                discontinuity_ns: 0,
                synced: self.synced,
                r_squared: 0.0,
                calibration,
                next_timeout,
                committed: true,
                rejected: None,
            };
        };

        let estimated_remote = current.adjust(local_mid);

        let Some((mut candidate, r_squared)) = self.fit.fit() else {
            // Regression still warming up; keep the anchored relation.
            let next_timeout = self.next_timeout(None, rtt, limits);
            return SyncReport {
                rtt: Duration::from_nanos(rtt),
                rtt_avg: Duration::from_nanos(avg),
                local_mid,
                remote_mid,
                estimated_remote,
                discontinuity_ns: 0,
                synced: self.synced,
                r_squared: 0.0,
                calibration: current,
                next_timeout,
                committed: false,
                rejected: None,
            };
        };

        // 7. Discontinuity clamp. The current calibration brackets
        // this round trip: what the clock would have reported at send
        // and at receive, widened by a quarter of the average RTT.
        let max_discont = avg / 4;
        let in_sync = |cal: &Calibration| {
            let min_guess = cal.adjust(obs.local_send).as_nanos();
            let max_guess = cal.adjust(obs.local_receive).as_nanos();
            let mid = remote_mid.as_nanos();
            mid >= min_guess.saturating_sub(max_discont)
                && mid <= max_guess.saturating_add(max_discont)
        };
        let synced_before = in_sync(&current);

        let mut discont = candidate
            .adjust(obs.local_receive)
            .diff_nanos(current.adjust(obs.local_receive));
        #[allow(clippy::cast_possible_wrap, reason = "quarter-RTT fits in i64")]
        let bound = max_discont as i64;
        if discont > bound {
            // Too large a forward step; pull the candidate back so the
            // jump is capped at exactly the bound.
            #[allow(clippy::cast_sign_loss, reason = "discont > bound >= 0 here")]
            let excess = (discont - bound) as u64;
            candidate.external =
                Timestamp::from_nanos(candidate.external.as_nanos().saturating_sub(excess));
            discont = bound;
        } else if discont < -bound {
            #[allow(clippy::cast_sign_loss, reason = "-discont > bound >= 0 here")]
            let excess = (-discont - bound) as u64;
            candidate.external =
                Timestamp::from_nanos(candidate.external.as_nanos().saturating_add(excess));
            discont = -bound;
        }

        let synced_after = in_sync(&candidate);

        // 8. Commit decision: the exchange was already consistent with
        // the running clock, or the clamped candidate is, or too many
        // candidates have been skipped in a row.
        let force = self.skipped_updates >= MAX_SKIPPED_UPDATES;
        let committed = synced_before || synced_after || force;
        if committed {
            if force && !(synced_before || synced_after) {
                tracing::info!(
                    skipped = self.skipped_updates,
                    "forcing resync after too many skipped updates"
                );
            }
            self.calibration = Some(candidate);
            self.skipped_updates = 0;

            // 9. Synced flag: committed remote midpoints must never
            // run backwards; if they do, the server restarted behind a
            // consistent-looking stream of packets.
            match self.last_committed_remote_mid {
                Some(prev) if remote_mid.as_nanos() < prev => {
                    if self.synced {
                        tracing::warn!("committed remote time went backwards, clearing sync");
                    }
                    self.synced = false;
                }
                _ => self.synced = true,
            }
            self.last_committed_remote_mid = Some(remote_mid.as_nanos());
        } else {
            self.skipped_updates += 1;
            discont = 0;
        }

        // 10. Poll interval: the better the fit, the slower we poll,
        // clamped to the configured timeout and floored so the
        // exchange rate never exceeds the minimum update interval.
        let next_timeout = self.next_timeout(Some(r_squared), rtt, limits);

        SyncReport {
            rtt: Duration::from_nanos(rtt),
            rtt_avg: Duration::from_nanos(avg),
            local_mid,
            remote_mid,
            estimated_remote,
            discontinuity_ns: discont,
            synced: self.synced,
            r_squared,
            calibration: self.calibration.unwrap_or(current),
            next_timeout,
            committed,
            rejected: None,
        }
    }

    fn next_timeout(&self, r_squared: Option<f64>, rtt: u64, limits: &Limits) -> Duration {
        let base = match r_squared {
            Some(r) => Duration::from_secs_f64(1e-3 / (1.0 - r.min(R_SQUARED_CAP))),
            // No fit yet: poll again as soon as the interval floor allows.
            None => Duration::ZERO,
        };
        let mut timeout = base.min(self.poll_timeout);
        let rtt = Duration::from_nanos(rtt);
        if rtt < limits.minimum_update_interval {
            timeout = timeout.max(limits.minimum_update_interval - rtt);
        }
        timeout
    }

    fn reject(&self, reason: RejectReason, rtt: u64) -> SyncReport {
        SyncReport {
            rtt: Duration::from_nanos(rtt),
            rtt_avg: Duration::from_nanos(self.rtt_avg.unwrap_or(0)),
            local_mid: Timestamp::NONE,
            remote_mid: Timestamp::NONE,
            estimated_remote: Timestamp::NONE,
            discontinuity_ns: 0,
            synced: self.synced,
            r_squared: 0.0,
            calibration: self.calibration.unwrap_or_else(Calibration::identity),
            next_timeout: QUICK_RETRY,
            committed: false,
            rejected: Some(reason),
        }
    }
}

/// Per-handle filter configuration, merged into the shared limits.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HandleLimits {
    pub roundtrip_limit: Option<Duration>,
    pub minimum_update_interval: Duration,
}

#[derive(Debug)]
struct LimitsState {
    /// Limits requested by each live handle, keyed by handle id.
    handles: HashMap<u64, HandleLimits>,
    /// Defaults from the endpoint's construction-time config, used
    /// when no handles are attached (teardown window).
    base: HandleLimits,
    /// Set once by the first RATE kiss-of-death; carries the server's
    /// suggested poll interval when it sent one.
    rate_penalty: Option<Option<Duration>>,
}

/// Estimator state shared between the polling task, the registry and
/// any number of clock handles.
#[derive(Debug)]
pub(crate) struct SharedEstimator {
    clock: MonotonicClock,
    poll_timeout: Duration,
    base_time_offset_ns: i64,
    snapshot: RwLock<Option<Calibration>>,
    corrupted: AtomicBool,
    limits: StdMutex<LimitsState>,
    synced_tx: watch::Sender<bool>,
    stats_tx: broadcast::Sender<SyncReport>,
}

impl SharedEstimator {
    pub(crate) fn new(config: &ClockConfig) -> Self {
        let (synced_tx, _) = watch::channel(false);
        let (stats_tx, _) = broadcast::channel(STATS_CHANNEL_CAPACITY);
        let base = HandleLimits {
            roundtrip_limit: config.roundtrip_limit,
            minimum_update_interval: config.minimum_update_interval,
        };
        Self {
            clock: MonotonicClock::new(),
            poll_timeout: config.poll_timeout,
            base_time_offset_ns: config.base_time_offset_ns,
            snapshot: RwLock::new(None),
            corrupted: AtomicBool::new(false),
            limits: StdMutex::new(LimitsState {
                handles: HashMap::new(),
                base,
                rate_penalty: None,
            }),
            synced_tx,
            stats_tx,
        }
    }

    pub(crate) fn clock(&self) -> MonotonicClock {
        self.clock
    }

    pub(crate) fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    /// Current estimated remote time. Never blocks, never fails:
    /// before the first commit this is the local monotonic time plus
    /// the configured base offset.
    pub(crate) fn now(&self) -> Timestamp {
        let internal = self.clock.now();
        let snapshot = self
            .snapshot
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match *snapshot {
            Some(calibration) => calibration.adjust(internal),
            None => {
                let base = internal.as_nanos();
                let shifted = base.saturating_add_signed(self.base_time_offset_ns);
                Timestamp::from_nanos(shifted)
            }
        }
    }

    /// Publish the outcome of one observation to all readers.
    pub(crate) fn publish(&self, report: &SyncReport, estimator: &Estimator) {
        if estimator.calibration().is_some() {
            let mut snapshot = self
                .snapshot
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *snapshot = estimator.calibration();
        }
        if estimator.is_corrupted() {
            self.corrupted.store(true, Ordering::Release);
        }
        self.synced_tx.send_if_modified(|synced| {
            let changed = *synced != report.synced;
            *synced = report.synced;
            changed
        });
        // Nobody listening is fine.
        let _ = self.stats_tx.send(report.clone());
    }

    pub(crate) fn mark_corrupted(&self) {
        self.corrupted.store(true, Ordering::Release);
    }

    pub(crate) fn is_corrupted(&self) -> bool {
        self.corrupted.load(Ordering::Acquire)
    }

    pub(crate) fn is_synced(&self) -> bool {
        *self.synced_tx.borrow()
    }

    pub(crate) fn synced_watch(&self) -> watch::Receiver<bool> {
        self.synced_tx.subscribe()
    }

    pub(crate) fn subscribe_stats(&self) -> broadcast::Receiver<SyncReport> {
        self.stats_tx.subscribe()
    }

    /// Record (or replace) one handle's limits.
    pub(crate) fn set_handle_limits(&self, handle_id: u64, limits: HandleLimits) {
        let mut state = self
            .limits
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.handles.insert(handle_id, limits);
    }

    /// Drop a released handle's limits from the merge.
    pub(crate) fn remove_handle_limits(&self, handle_id: u64) {
        let mut state = self
            .limits
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.handles.remove(&handle_id);
    }

    /// Merge of all attached handles' limits: the loosest round-trip
    /// limit and the tightest update interval govern the shared poll
    /// behaviour, with the rate-limit penalty applied on top.
    pub(crate) fn effective_limits(&self) -> Limits {
        let state = self
            .limits
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // Outer None = no handle seen yet; inner None = unlimited.
        let mut roundtrip_limit: Option<Option<Duration>> = None;
        let mut minimum_update_interval = None;
        for limits in state.handles.values() {
            roundtrip_limit = Some(match (roundtrip_limit, limits.roundtrip_limit) {
                (None, first) => first,
                // Unlimited on any handle wins the max.
                (Some(None), _) | (Some(_), None) => None,
                (Some(Some(a)), Some(b)) => Some(a.max(b)),
            });
            minimum_update_interval = Some(match minimum_update_interval {
                Some(current) => std::cmp::min(current, limits.minimum_update_interval),
                None => limits.minimum_update_interval,
            });
        }
        let roundtrip_limit = roundtrip_limit.unwrap_or(state.base.roundtrip_limit);
        let mut minimum_update_interval =
            minimum_update_interval.unwrap_or(state.base.minimum_update_interval);
        if let Some(server_poll) = state.rate_penalty {
            minimum_update_interval *= 2;
            if let Some(poll) = server_poll {
                minimum_update_interval = minimum_update_interval.max(poll);
            }
        }
        Limits {
            roundtrip_limit,
            minimum_update_interval,
        }
    }

    /// Apply the RATE kiss-of-death penalty: double the minimum update
    /// interval, raising it further to the server's advertised poll
    /// interval if that is larger. Applied at most once per endpoint.
    pub(crate) fn apply_rate_penalty(&self, server_poll: Option<Duration>) -> bool {
        let mut state = self
            .limits
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.rate_penalty.is_some() {
            return false;
        }
        state.rate_penalty = Some(server_poll);
        true
    }
}
