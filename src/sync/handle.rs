//! Public clock handle and per-endpoint configuration.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::{broadcast, watch};

use crate::protocol::{ProtocolVariant, Timestamp};

use super::estimator::{HandleLimits, SharedEstimator};
use super::registry::{EndpointKey, RegistryInner};
use super::stats::SyncReport;

/// Default floor on the time between two polls.
pub const DEFAULT_MINIMUM_UPDATE_INTERVAL: Duration = Duration::from_millis(50);

/// Default upper bound on the poll interval, also the fallback wait
/// after an unanswered request.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for one synchronized clock.
#[derive(Debug, Clone)]
pub struct ClockConfig {
    /// Remote time source address.
    pub address: IpAddr,
    /// Remote time source port.
    pub port: u16,
    /// Wire format the endpoint speaks.
    pub variant: ProtocolVariant,
    /// Absolute round-trip limit; `None` means unlimited.
    pub roundtrip_limit: Option<Duration>,
    /// Floor on the time between two polls.
    pub minimum_update_interval: Duration,
    /// Offset added to the local monotonic time reported before the
    /// first successful synchronization.
    pub base_time_offset_ns: i64,
    /// Upper bound on the computed poll interval and fallback wait
    /// after a send.
    pub poll_timeout: Duration,
}

impl ClockConfig {
    /// Configuration with default filtering for the given endpoint.
    #[must_use]
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self {
            address,
            port,
            variant: ProtocolVariant::default(),
            roundtrip_limit: None,
            minimum_update_interval: DEFAULT_MINIMUM_UPDATE_INTERVAL,
            base_time_offset_ns: 0,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

/// A synchronized clock against one remote time source.
///
/// Handles are cheap: any number of them may point at the same
/// (address, port) pair and they all share one estimator and one
/// polling task. Reading the time never blocks and never fails;
/// before the first sync it falls back to the local monotonic clock
/// plus the configured base offset. Synchronization quality is
/// observable through [`NetClientClock::is_synced`] and the
/// statistics stream, never through errors.
#[derive(Debug)]
pub struct NetClientClock {
    shared: Arc<SharedEstimator>,
    registry: Arc<RegistryInner>,
    key: EndpointKey,
    generation: u64,
    handle_id: u64,
    limits: StdMutex<HandleLimits>,
    runtime: tokio::runtime::Handle,
}

impl NetClientClock {
    pub(crate) fn attach(
        shared: Arc<SharedEstimator>,
        registry: Arc<RegistryInner>,
        key: EndpointKey,
        generation: u64,
        handle_id: u64,
        limits: HandleLimits,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        shared.set_handle_limits(handle_id, limits);
        Self {
            shared,
            registry,
            key,
            generation,
            handle_id,
            limits: StdMutex::new(limits),
            runtime,
        }
    }

    /// Current estimated remote time.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.shared.now()
    }

    /// Raw local monotonic time feeding the calibration.
    #[must_use]
    pub fn internal_time(&self) -> Timestamp {
        self.shared.clock().now()
    }

    /// Whether the estimator currently considers itself synchronized.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.shared.is_synced()
    }

    /// Watch channel tracking the synced flag.
    #[must_use]
    pub fn synced_watch(&self) -> watch::Receiver<bool> {
        self.shared.synced_watch()
    }

    /// Wait until the estimator reports synchronized.
    pub async fn wait_synced(&self) {
        let mut watch = self.shared.synced_watch();
        // The sender lives in the shared state we hold, so this only
        // fails if the estimator is torn down mid-wait.
        let _ = watch.wait_for(|synced| *synced).await;
    }

    /// Subscribe to per-observation statistics records.
    #[must_use]
    pub fn reports(&self) -> broadcast::Receiver<SyncReport> {
        self.shared.subscribe_stats()
    }

    /// Set this handle's absolute round-trip limit (`None` = unlimited).
    ///
    /// The shared estimator applies the loosest limit over all
    /// attached handles.
    pub fn set_roundtrip_limit(&self, limit: Option<Duration>) {
        let mut limits = self
            .limits
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        limits.roundtrip_limit = limit;
        self.shared.set_handle_limits(self.handle_id, *limits);
    }

    /// Set this handle's minimum update interval.
    ///
    /// The shared estimator applies the tightest interval over all
    /// attached handles.
    pub fn set_minimum_update_interval(&self, interval: Duration) {
        let mut limits = self
            .limits
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        limits.minimum_update_interval = interval;
        self.shared.set_handle_limits(self.handle_id, *limits);
    }

    #[cfg(test)]
    pub(crate) fn estimator_state(&self) -> &Arc<SharedEstimator> {
        &self.shared
    }
}

impl Drop for NetClientClock {
    fn drop(&mut self) {
        self.shared.remove_handle_limits(self.handle_id);
        let registry = Arc::clone(&self.registry);
        let key = self.key;
        let generation = self.generation;
        // Release must take the async registry lock; hand it to the
        // runtime the clock was created on.
        self.runtime.spawn(async move {
            registry.release(key, generation).await;
        });
    }
}
