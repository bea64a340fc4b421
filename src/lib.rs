//! # netsync-clock
//!
//! A pure Rust client-side network clock synchronization engine: derive
//! a continuously-adjusted estimate of a remote reference clock's time
//! from the local monotonic clock, by periodically exchanging
//! timestamped packets with a time server over UDP.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::net::{IpAddr, Ipv4Addr};
//!
//! use netsync_clock::{ClockConfig, ClockRegistry, ProtocolVariant};
//!
//! # async fn example() -> Result<(), netsync_clock::NetSyncError> {
//! let registry = ClockRegistry::default();
//!
//! let mut config = ClockConfig::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)), 123);
//! config.variant = ProtocolVariant::Ntp;
//!
//! let clock = registry.acquire(config).await?;
//! clock.wait_synced().await;
//!
//! // Never blocks, never fails.
//! let remote_now = clock.now();
//! # let _ = remote_now;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Packet codecs** ([`protocol`]): a bare two-field time packet and
//!   an NTP-like 48-byte packet with Kiss-of-Death handling.
//! - **Estimator** ([`sync`]): median and running-average RTT filters,
//!   a regression-based clock fit and a discontinuity clamp that keeps
//!   the reported clock smooth.
//! - **Registry**: one estimator and one polling task per remote
//!   endpoint, shared by all handles and kept alive through a grace
//!   period after the last release.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Error types
pub mod error;
/// Wire formats
pub mod protocol;
/// Synchronization engine
pub mod sync;

// Re-exports
pub use error::{NetSyncError, PacketError};
pub use protocol::{NtpPacket, ProtocolVariant, SimplePacket, Timestamp};
pub use sync::{
    Calibration, ClockConfig, ClockRegistry, NetClientClock, RegistryConfig, RejectReason,
    SyncReport,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
