//! Shared clock registry.
//!
//! Deduplicates estimators by remote endpoint: any number of clock
//! handles for the same (address, port) pair share one estimator and
//! one polling task. After the last handle is released the endpoint
//! survives a grace period so short-lived handles against the same
//! server do not pay restart cost; a corrupted endpoint is torn down
//! immediately instead.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::NetSyncError;

use super::estimator::{HandleLimits, SharedEstimator};
use super::handle::{ClockConfig, NetClientClock};
use super::transport::Transport;

/// Default grace period before an unreferenced endpoint is torn down.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Registry key: one estimator per remote endpoint.
pub(crate) type EndpointKey = (IpAddr, u16);

/// Registry tuning knobs.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long an endpoint with no handles stays alive before its
    /// polling task is stopped.
    pub grace_period: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

#[derive(Debug)]
struct Entry {
    shared: Arc<SharedEstimator>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    refcount: usize,
    generation: u64,
    /// Pending deferred-teardown timer, cancelled by a re-acquire.
    grace: Option<CancellationToken>,
}

/// Registry of shared synchronized clocks.
///
/// Owned by the caller and passed to whichever component needs to
/// share clocks; there is no process-wide singleton. Cloning is cheap
/// and clones share the same endpoint map.
#[derive(Clone)]
pub struct ClockRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug)]
pub(crate) struct RegistryInner {
    config: RegistryConfig,
    entries: Mutex<HashMap<EndpointKey, Entry>>,
    next_generation: AtomicU64,
    next_handle_id: AtomicU64,
}

impl ClockRegistry {
    /// Create a registry with the given configuration.
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                entries: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                next_handle_id: AtomicU64::new(0),
            }),
        }
    }

    /// Obtain a clock handle for the endpoint in `config`.
    ///
    /// Reuses a running, non-corrupted estimator for the same
    /// (address, port) when one exists, cancelling any pending
    /// teardown; otherwise binds a socket and starts a new polling
    /// task. The first acquire for an endpoint fixes its protocol
    /// variant and poll timing.
    ///
    /// # Errors
    /// [`NetSyncError::Io`] when the socket cannot be bound or
    /// connected.
    pub async fn acquire(&self, config: ClockConfig) -> Result<NetClientClock, NetSyncError> {
        let key = (config.address, config.port);
        let limits = HandleLimits {
            roundtrip_limit: config.roundtrip_limit,
            minimum_update_interval: config.minimum_update_interval,
        };
        let runtime = tokio::runtime::Handle::current();

        let mut entries = self.inner.entries.lock().await;

        let corrupted = entries
            .get(&key)
            .is_some_and(|entry| entry.shared.is_corrupted());
        if corrupted {
            // A corrupted estimator is never handed out again.
            tracing::info!(?key, "discarding corrupted estimator on acquire");
            if let Some(entry) = entries.remove(&key) {
                RegistryInner::teardown(entry).await;
            }
        } else if let Some(entry) = entries.get_mut(&key) {
            if let Some(grace) = entry.grace.take() {
                grace.cancel();
            }
            entry.refcount += 1;
            let handle_id = self.inner.next_handle_id.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(?key, refcount = entry.refcount, "reusing shared estimator");
            return Ok(NetClientClock::attach(
                Arc::clone(&entry.shared),
                Arc::clone(&self.inner),
                key,
                entry.generation,
                handle_id,
                limits,
                runtime,
            ));
        }

        let socket = Self::connect(config.address, config.port).await?;
        let shared = Arc::new(SharedEstimator::new(&config));
        let cancel = CancellationToken::new();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let transport = Transport::new(socket, config.variant, Arc::clone(&shared));
        let task = tokio::spawn(transport.run(cancel.clone()));
        tracing::info!(?key, variant = ?config.variant, "started polling loop");

        entries.insert(
            key,
            Entry {
                shared: Arc::clone(&shared),
                cancel,
                task: Some(task),
                refcount: 1,
                generation,
                grace: None,
            },
        );

        let handle_id = self.inner.next_handle_id.fetch_add(1, Ordering::Relaxed);
        Ok(NetClientClock::attach(
            shared,
            Arc::clone(&self.inner),
            key,
            generation,
            handle_id,
            limits,
            runtime,
        ))
    }

    /// Number of endpoints with a live polling loop (including those
    /// inside their teardown grace period).
    pub async fn active_endpoints(&self) -> usize {
        self.inner.entries.lock().await.len()
    }

    async fn connect(address: IpAddr, port: u16) -> std::io::Result<UdpSocket> {
        let bind_addr = if address.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect((address, port)).await?;
        Ok(socket)
    }
}

impl Default for ClockRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl RegistryInner {
    /// Drop one handle's reference. At zero the endpoint is torn down
    /// immediately when corrupted, otherwise after the grace period
    /// unless re-acquired first.
    pub(crate) async fn release(self: Arc<Self>, key: EndpointKey, generation: u64) {
        let mut entries = self.entries.lock().await;
        let corrupted = {
            let Some(entry) = entries.get_mut(&key) else {
                return;
            };
            if entry.generation != generation {
                return;
            }
            entry.refcount = entry.refcount.saturating_sub(1);
            if entry.refcount > 0 {
                return;
            }
            entry.shared.is_corrupted()
        };

        if corrupted {
            tracing::info!(?key, "last handle released, corrupted estimator torn down");
            if let Some(entry) = entries.remove(&key) {
                drop(entries);
                Self::teardown(entry).await;
            }
            return;
        }

        tracing::debug!(?key, "last handle released, arming teardown timer");
        let grace = CancellationToken::new();
        if let Some(entry) = entries.get_mut(&key) {
            entry.grace = Some(grace.clone());
        }
        let grace_period = self.config.grace_period;
        let inner = Arc::clone(&self);
        drop(entries);
        tokio::spawn(async move {
            tokio::select! {
                () = grace.cancelled() => {}
                () = tokio::time::sleep(grace_period) => inner.finalize(key, generation).await,
            }
        });
    }

    /// Tear an endpoint down if it is still unreferenced.
    async fn finalize(&self, key: EndpointKey, generation: u64) {
        let entry = {
            let mut entries = self.entries.lock().await;
            match entries.get(&key) {
                Some(entry) if entry.generation == generation && entry.refcount == 0 => {
                    entries.remove(&key)
                }
                _ => None,
            }
        };
        if let Some(entry) = entry {
            tracing::info!(?key, "grace period elapsed, stopping polling loop");
            Self::teardown(entry).await;
        }
    }

    /// Cancel the polling task and wait for it to exit. The socket is
    /// owned by the task and dies with it.
    async fn teardown(mut entry: Entry) {
        entry.cancel.cancel();
        if let Some(task) = entry.task.take() {
            let _ = task.await;
        }
    }
}
