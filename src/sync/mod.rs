//! Clock synchronization engine.
//!
//! One background polling task per remote endpoint exchanges
//! timestamped packets with a time server and feeds the resulting
//! four-timestamp observations to a statistical estimator, which
//! maintains an affine mapping from the local monotonic clock to
//! estimated remote time. The [`registry::ClockRegistry`] deduplicates
//! estimators so that any number of [`handle::NetClientClock`] handles
//! against one endpoint share a single polling loop.
//!
//! ## Sync flow
//!
//! ```text
//! Client                               Server
//!   |--- request (local_send) --------->|  records remote_receive
//!   |<-- response (remote_send) --------|  client records local_receive
//!   |
//!   |  rtt    = (local_receive - local_send) - (remote_send - remote_receive)
//!   |  offset from midpoints, smoothed by a regression over the
//!   |  recent window, clamped to a quarter of the average RTT
//! ```

pub mod calibration;
pub mod clock;
pub(crate) mod estimator;
pub mod handle;
pub mod registry;
pub mod stats;
pub(crate) mod transport;

#[cfg(test)]
mod tests;

// Re-exports for convenient access.
pub use calibration::Calibration;
pub use clock::MonotonicClock;
pub use handle::{
    ClockConfig, DEFAULT_MINIMUM_UPDATE_INTERVAL, DEFAULT_POLL_TIMEOUT, NetClientClock,
};
pub use registry::{ClockRegistry, DEFAULT_GRACE_PERIOD, RegistryConfig};
pub use stats::{RejectReason, SyncReport};
